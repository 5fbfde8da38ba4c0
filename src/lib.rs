//! Spatial stochastic model of a growing tumor: phenotype-structured cells on a
//! plane that die, interact with nearby cells, reproduce and migrate to
//! metastatic sites, under optional cytotoxic (continuous or adaptive) and
//! anti-migratory treatment.

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod engine;
pub mod entity;
pub mod error;
pub mod population;
pub mod recorder;
pub mod records;
pub mod rng;
pub mod ruleset;
pub mod spatial;
pub mod treatment;

pub use checkpoint::Checkpoint;
pub use config::{BatchConfig, InitialPopulationConfig, SimulationConfig, parse_fraction};
pub use driver::{CancelToken, Driver, RunSummary, checkpoint_path};
pub use engine::{InitReport, InitialPopulation, SimulationEngine, StepStats};
pub use entity::{Entity, EntityRecord, Phenotype, Position};
pub use error::{ConfigurationError, StoreError};
pub use population::{Distribution, PopulationStore, apportion};
pub use recorder::{JsonlRecorder, MemoryRecorder, NullRecorder, Recorder, RunSettings};
pub use records::{RecordLoad, load_records, parse_record, read_records};
pub use rng::{RandomSource, RandomState};
pub use ruleset::{MAX_MIGRATION_SITES, RuleSet, RuleSetParams};
pub use treatment::{TreatmentController, TreatmentDecision, TreatmentState};

/// Install a `tracing` subscriber that honors `RUST_LOG` (default `info`).
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
