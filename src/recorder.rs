use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::engine::StepStats;
use crate::entity::{EntityRecord, Position};
use crate::population::Distribution;
use crate::ruleset::RuleSetParams;

/// Parameters of one run, written once before the first step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub run: usize,
    pub seed: u64,
    pub initial_population_size: usize,
    pub skipped_records: usize,
    pub rules: RuleSetParams,
    /// Absolute site centers, index 0 = primary tumor.
    pub site_centers: Vec<Position>,
}

// ── Recorder trait ────────────────────────────────────────────────────────────

/// Sink for everything a run reports. Any error aborts the run.
///
/// Call order per run: `record_settings`, `record_population` after
/// initialization and after every step, `record_entities` on snapshot steps,
/// `record_statistics` after every step, then `finalize` once.
pub trait Recorder: Send {
    fn record_settings(&mut self, _settings: &RunSettings) -> Result<()> {
        Ok(())
    }
    /// `step` counts completed steps: 0 right after initialization.
    fn record_population(&mut self, step: usize, distribution: &Distribution, size: usize)
    -> Result<()>;
    fn record_entities(&mut self, step: usize, entities: &[EntityRecord]) -> Result<()>;
    fn record_statistics(&mut self, stats: &StepStats) -> Result<()>;
    fn finalize(&mut self) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record_population(&mut self, _: usize, _: &Distribution, _: usize) -> Result<()> {
        Ok(())
    }
    fn record_entities(&mut self, _: usize, _: &[EntityRecord]) -> Result<()> {
        Ok(())
    }
    fn record_statistics(&mut self, _: &StepStats) -> Result<()> {
        Ok(())
    }
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub settings: Option<RunSettings>,
    /// `(step, distribution, size)`
    pub populations: Vec<(usize, Distribution, usize)>,
    pub entity_snapshots: Vec<(usize, Vec<EntityRecord>)>,
    pub statistics: Vec<StepStats>,
    pub finalized: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for MemoryRecorder {
    fn record_settings(&mut self, settings: &RunSettings) -> Result<()> {
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn record_population(
        &mut self,
        step: usize,
        distribution: &Distribution,
        size: usize,
    ) -> Result<()> {
        self.populations.push((step, distribution.clone(), size));
        Ok(())
    }

    fn record_entities(&mut self, step: usize, entities: &[EntityRecord]) -> Result<()> {
        self.entity_snapshots.push((step, entities.to_vec()));
        Ok(())
    }

    fn record_statistics(&mut self, stats: &StepStats) -> Result<()> {
        self.statistics.push(stats.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finalized = true;
        Ok(())
    }
}

// ── JSONL files ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DistributionLine<'a> {
    step: usize,
    size: usize,
    sites: &'a Distribution,
}

#[derive(Serialize)]
struct LocationLine<'a> {
    step: usize,
    #[serde(flatten)]
    record: &'a EntityRecord,
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn append_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(BufWriter::new(file))
}

#[derive(Deserialize)]
struct StepField {
    step: usize,
}

fn json_step(line: &str) -> Option<usize> {
    serde_json::from_str::<StepField>(line).ok().map(|s| s.step)
}

/// Rewrite `path` keeping only the lines `keep` accepts. A missing file is
/// left missing.
fn retain_lines(path: &Path, keep: impl Fn(&str) -> bool) -> Result<()> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let mut kept = String::with_capacity(text.len());
    for line in text.lines().filter(|l| keep(l)) {
        kept.push_str(line);
        kept.push('\n');
    }
    fs::write(path, kept).with_context(|| format!("rewriting {}", path.display()))
}

fn write_line<T: Serialize>(writer: &mut BufWriter<File>, item: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, item)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Writes one set of files per run into an output directory, one JSON object
/// per line:
/// - `distribution_run{r}.jsonl`: per-site, per-phenotype counts and total size
/// - `statistics_run{r}.jsonl`: one [`StepStats`] per step
/// - `locations_run{r}.jsonl`: entity records on snapshot steps
/// - `snapshot_steps_run{r}.txt`: the steps that have a location snapshot
/// - `settings_run{r}.json`: the run's [`RunSettings`]
pub struct JsonlRecorder {
    dir: PathBuf,
    run: usize,
    distribution: BufWriter<File>,
    statistics: BufWriter<File>,
    locations: BufWriter<File>,
    snapshot_steps: BufWriter<File>,
}

impl JsonlRecorder {
    fn distribution_path(dir: &Path, run: usize) -> PathBuf {
        dir.join(format!("distribution_run{run}.jsonl"))
    }

    fn statistics_path(dir: &Path, run: usize) -> PathBuf {
        dir.join(format!("statistics_run{run}.jsonl"))
    }

    fn locations_path(dir: &Path, run: usize) -> PathBuf {
        dir.join(format!("locations_run{run}.jsonl"))
    }

    fn snapshot_steps_path(dir: &Path, run: usize) -> PathBuf {
        dir.join(format!("snapshot_steps_run{run}.txt"))
    }

    fn open(
        dir: &Path,
        run: usize,
        opener: fn(&Path) -> Result<BufWriter<File>>,
    ) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            run,
            distribution: opener(&Self::distribution_path(dir, run))?,
            statistics: opener(&Self::statistics_path(dir, run))?,
            locations: opener(&Self::locations_path(dir, run))?,
            snapshot_steps: opener(&Self::snapshot_steps_path(dir, run))?,
        })
    }

    /// Start fresh files for `run`, truncating any left from an earlier run.
    pub fn create(dir: &Path, run: usize) -> Result<Self> {
        Self::open(dir, run, create_writer)
    }

    /// Reopen the files of `run` to continue it from a checkpoint taken at
    /// `next_step`. Anything recorded after that step, including a torn last
    /// line, is dropped first so the continued files match an uninterrupted
    /// run.
    pub fn append(dir: &Path, run: usize, next_step: usize) -> Result<Self> {
        let up_to_checkpoint = |line: &str| json_step(line).is_some_and(|s| s <= next_step);
        retain_lines(&Self::distribution_path(dir, run), up_to_checkpoint)?;
        retain_lines(&Self::locations_path(dir, run), up_to_checkpoint)?;
        // Statistics carry the 0-based index of the step they describe.
        retain_lines(&Self::statistics_path(dir, run), |line| {
            json_step(line).is_some_and(|s| s < next_step)
        })?;
        retain_lines(&Self::snapshot_steps_path(dir, run), |line| {
            line.trim().parse::<usize>().is_ok_and(|s| s <= next_step)
        })?;
        Self::open(dir, run, append_writer)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(format!("settings_run{}.json", self.run))
    }
}

impl Recorder for JsonlRecorder {
    fn record_settings(&mut self, settings: &RunSettings) -> Result<()> {
        let path = self.settings_path();
        let mut writer = create_writer(&path)?;
        serde_json::to_writer_pretty(&mut writer, settings)?;
        writer.flush()?;
        Ok(())
    }

    fn record_population(
        &mut self,
        step: usize,
        distribution: &Distribution,
        size: usize,
    ) -> Result<()> {
        write_line(
            &mut self.distribution,
            &DistributionLine {
                step,
                size,
                sites: distribution,
            },
        )
    }

    fn record_entities(&mut self, step: usize, entities: &[EntityRecord]) -> Result<()> {
        for record in entities {
            write_line(&mut self.locations, &LocationLine { step, record })?;
        }
        writeln!(self.snapshot_steps, "{step}")?;
        Ok(())
    }

    fn record_statistics(&mut self, stats: &StepStats) -> Result<()> {
        write_line(&mut self.statistics, stats)
    }

    fn finalize(&mut self) -> Result<()> {
        for writer in [
            &mut self.distribution,
            &mut self.statistics,
            &mut self.locations,
            &mut self.snapshot_steps,
        ] {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_lines_are_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = JsonlRecorder::create(dir.path(), 3).unwrap();
        rec.record_population(0, &vec![vec![2, 1], vec![0, 0]], 3).unwrap();
        rec.record_entities(
            0,
            &[EntityRecord {
                phenotype: 1,
                invasive: true,
                site: 0,
                x: 1.5,
                y: -2.0,
            }],
        )
        .unwrap();
        rec.record_statistics(&StepStats {
            step: 0,
            offspring_created: 4,
            ..StepStats::default()
        })
        .unwrap();
        rec.finalize().unwrap();

        let dist = fs::read_to_string(dir.path().join("distribution_run3.jsonl")).unwrap();
        let v: serde_json::Value = serde_json::from_str(dist.trim()).unwrap();
        assert_eq!(v["size"], 3);
        assert_eq!(v["sites"][0][0], 2);

        let loc = fs::read_to_string(dir.path().join("locations_run3.jsonl")).unwrap();
        let v: serde_json::Value = serde_json::from_str(loc.trim()).unwrap();
        assert_eq!(v["step"], 0);
        assert_eq!(v["phenotype"], 1);
        assert_eq!(v["x"], 1.5);

        let stats = fs::read_to_string(dir.path().join("statistics_run3.jsonl")).unwrap();
        let back: StepStats = serde_json::from_str(stats.trim()).unwrap();
        assert_eq!(back.offspring_created, 4);

        let steps = fs::read_to_string(dir.path().join("snapshot_steps_run3.txt")).unwrap();
        assert_eq!(steps, "0\n");
    }

    #[test]
    fn append_drops_lines_past_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = JsonlRecorder::create(dir.path(), 0).unwrap();
        for step in 0..5 {
            rec.record_population(step, &vec![vec![step]], step).unwrap();
            rec.record_entities(step, &[]).unwrap();
            rec.record_statistics(&StepStats {
                step,
                ..StepStats::default()
            })
            .unwrap();
        }
        rec.finalize().unwrap();
        drop(rec);
        // A crash mid-write leaves a torn line behind.
        let dist_path = dir.path().join("distribution_run0.jsonl");
        let mut torn = fs::read_to_string(&dist_path).unwrap();
        torn.push_str("{\"step\":5,\"si");
        fs::write(&dist_path, torn).unwrap();

        let mut rec = JsonlRecorder::append(dir.path(), 0, 2).unwrap();
        rec.record_population(3, &vec![vec![9]], 9).unwrap();
        rec.finalize().unwrap();

        let steps: Vec<u64> = fs::read_to_string(&dist_path)
            .unwrap()
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["step"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(steps, vec![0, 1, 2, 3]);
        let stats = fs::read_to_string(dir.path().join("statistics_run0.jsonl")).unwrap();
        assert_eq!(stats.lines().count(), 2);
        let snaps = fs::read_to_string(dir.path().join("snapshot_steps_run0.txt")).unwrap();
        assert_eq!(snaps, "0\n1\n2\n");
    }

    #[test]
    fn memory_recorder_keeps_order() {
        let mut rec = MemoryRecorder::new();
        rec.record_population(0, &vec![vec![1]], 1).unwrap();
        rec.record_population(1, &vec![vec![2]], 2).unwrap();
        rec.finalize().unwrap();
        assert_eq!(rec.populations[1].0, 1);
        assert_eq!(rec.populations[1].2, 2);
        assert!(rec.finalized);
    }
}
