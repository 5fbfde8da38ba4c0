use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::entity::Entity;
use crate::rng::RandomState;
use crate::treatment::TreatmentState;

/// Everything needed to continue a run exactly where it stopped: the committed
/// population (same shape as a step's commit payload), treatment state and the
/// random stream position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// First step still to execute.
    pub next_step: usize,
    pub sites: Vec<Vec<Entity>>,
    pub treatment: TreatmentState,
    pub rng: RandomState,
    pub initial_population_size: usize,
    /// Start of the current adaptive cycle, as held by the rule set.
    pub adaptive_cycle_start: Option<usize>,
    /// Initial-population records skipped when the run started. The engine
    /// leaves this at 0; the driver fills it in.
    #[serde(default)]
    pub skipped_records: usize,
}

impl Checkpoint {
    /// Write as JSON. Goes through a sibling temp file and a rename so a crash
    /// mid-write never clobbers the previous checkpoint.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(
                File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?,
            );
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)
            .with_context(|| format!("moving checkpoint into {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        );
        serde_json::from_reader(reader)
            .with_context(|| format!("parsing checkpoint {}", path.display()))
    }
}
