use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::engine::InitialPopulation;
use crate::error::ConfigurationError;
use crate::records::load_records;
use crate::ruleset::{RuleSet, RuleSetParams};

/// How the first population of every run is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialPopulationConfig {
    pub total_count: usize,
    /// One fraction per phenotype, summing to 1.
    pub distribution: Vec<f64>,
    /// Record file (`phenotype invasive site x y` per line). Replaces synthetic
    /// generation when set.
    pub records_path: Option<PathBuf>,
}

impl Default for InitialPopulationConfig {
    fn default() -> Self {
        Self {
            total_count: 2000,
            distribution: vec![0.75, 0.25],
            records_path: None,
        }
    }
}

impl InitialPopulationConfig {
    /// Resolve into an engine input, reading the record file if there is one.
    /// Also returns the number of record lines that could not be parsed.
    pub fn to_initial_population(&self) -> Result<(InitialPopulation, usize)> {
        match &self.records_path {
            Some(path) => {
                let load = load_records(path)?;
                Ok((InitialPopulation::Records(load.records), load.skipped))
            }
            None => Ok((
                InitialPopulation::Synthetic {
                    total_count: self.total_count,
                    distribution: self.distribution.clone(),
                },
                0,
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub steps: usize,
    pub runs: usize,
    /// Entity snapshots every this many completed steps. 0 keeps only the
    /// initial and final snapshots.
    pub snapshot_every: usize,
    /// Base seed; run `r` uses `seed + r`. Drawn at random when absent.
    pub seed: Option<u64>,
    pub checkpoint_every: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
    pub parallel_runs: bool,
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            runs: 1,
            snapshot_every: 1,
            seed: None,
            checkpoint_every: None,
            checkpoint_dir: None,
            parallel_runs: false,
            show_progress: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub rules: RuleSetParams,
    pub initial: InitialPopulationConfig,
    pub batch: BatchConfig,
}

impl SimulationConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Check the rule set and the synthetic distribution without building a
    /// population.
    pub fn validate(&self) -> Result<RuleSet, ConfigurationError> {
        let rules = RuleSet::new(self.rules.clone())?;
        if self.initial.records_path.is_none()
            && self.initial.distribution.len() != rules.number_types()
        {
            return Err(ConfigurationError::InvalidDistribution(format!(
                "{} fractions for {} phenotypes",
                self.initial.distribution.len(),
                rules.number_types()
            )));
        }
        Ok(rules)
    }
}

/// Parse `"3/4"`, `"0.75"` or `"1"` into a fraction.
pub fn parse_fraction(s: &str) -> Result<f64, ConfigurationError> {
    let bad = || ConfigurationError::InvalidDistribution(format!("cannot parse fraction {s:?}"));
    let value = match s.trim().split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| bad())?;
            let den: f64 = den.trim().parse().map_err(|_| bad())?;
            if den == 0.0 {
                return Err(bad());
            }
            num / den
        }
        None => s.trim().parse().map_err(|_| bad())?,
    };
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(bad());
    }
    Ok(value)
}
