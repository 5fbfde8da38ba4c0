use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::config::SimulationConfig;
use crate::engine::{InitialPopulation, SimulationEngine};
use crate::recorder::{Recorder, RunSettings};
use crate::rng::RandomSource;
use crate::ruleset::RuleSet;

/// Cooperative cancellation flag, checked between steps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run: usize,
    pub seed: u64,
    /// Steps completed when the run stopped, counted from step 0 even for a
    /// resumed run.
    pub steps_completed: usize,
    pub final_population: usize,
    pub skipped_records: usize,
    pub cancelled: bool,
}

pub fn checkpoint_path(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("checkpoint_run{run}.json"))
}

/// Executes the runs of one [`SimulationConfig`]. Every run gets its own engine
/// and random stream, seeded `base_seed + run`.
pub struct Driver {
    config: SimulationConfig,
    rules: RuleSet,
    initial: InitialPopulation,
    skipped_records: usize,
    base_seed: u64,
}

impl Driver {
    /// Validate the configuration and read the initial record file, if any.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let rules = config.validate().context("invalid simulation config")?;
        let (initial, skipped_records) = config.initial.to_initial_population()?;
        let base_seed = config
            .batch
            .seed
            .unwrap_or_else(|| rand::rng().random_range(1..u64::MAX));
        Ok(Self {
            config,
            rules,
            initial,
            skipped_records,
            base_seed,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn seed_for(&self, run: usize) -> u64 {
        self.base_seed.wrapping_add(run as u64)
    }

    fn settings(
        &self,
        run: usize,
        engine: &SimulationEngine,
        skipped_records: usize,
    ) -> RunSettings {
        RunSettings {
            run,
            seed: engine.seed(),
            initial_population_size: engine.initial_population_size(),
            skipped_records,
            rules: engine.rules().params().clone(),
            site_centers: engine.rules().site_centers().to_vec(),
        }
    }

    /// One independent run from a fresh population.
    pub fn run(
        &self,
        run: usize,
        recorder: &mut dyn Recorder,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let seed = self.seed_for(run);
        let mut engine = SimulationEngine::new(self.rules.clone(), RandomSource::seeded(seed));
        let report = engine
            .initialize(&self.initial)
            .with_context(|| format!("initializing run {run}"))?;
        info!(
            run,
            seed,
            population = report.population_size,
            skipped = report.skipped_records,
            "run started"
        );
        // Unparseable lines plus records the store refused.
        let skipped = self.skipped_records + report.skipped_records;

        recorder.record_settings(&self.settings(run, &engine, skipped))?;
        let population = engine.population();
        recorder.record_population(
            0,
            &population.distribution_snapshot(),
            population.size_snapshot(),
        )?;
        recorder.record_entities(0, &population.entities_snapshot())?;

        self.advance(run, engine, 0, skipped, recorder, cancel)
    }

    /// Continue a run from a checkpoint file written by an earlier
    /// [`Driver::run`] with the same configuration.
    pub fn resume(
        &self,
        checkpoint: &Path,
        run: usize,
        recorder: &mut dyn Recorder,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let checkpoint = Checkpoint::load(checkpoint)?;
        self.resume_from(checkpoint, run, recorder, cancel)
    }

    /// Like [`Driver::resume`] for an already loaded checkpoint. Reports start
    /// with the first step after the checkpoint; the population at
    /// `next_step` was already recorded before the checkpoint was written.
    pub fn resume_from(
        &self,
        checkpoint: Checkpoint,
        run: usize,
        recorder: &mut dyn Recorder,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let next_step = checkpoint.next_step;
        let skipped = checkpoint.skipped_records;
        let engine = SimulationEngine::resume(self.rules.clone(), checkpoint)
            .with_context(|| format!("restoring run {run}"))?;
        info!(run, next_step, seed = engine.seed(), "run resumed");

        recorder.record_settings(&self.settings(run, &engine, skipped))?;
        self.advance(run, engine, next_step, skipped, recorder, cancel)
    }

    fn advance(
        &self,
        run: usize,
        mut engine: SimulationEngine,
        first_step: usize,
        skipped_records: usize,
        recorder: &mut dyn Recorder,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let batch = &self.config.batch;
        let steps = batch.steps;
        let bar = if batch.show_progress {
            ProgressBar::new(steps as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_position(first_step.min(steps) as u64);

        let mut completed = first_step;
        let mut cancelled = false;
        for step in first_step..steps {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let stats = engine
                .step(step)
                .with_context(|| format!("run {run}, step {step}"))?;
            completed = step + 1;
            bar.inc(1);

            recorder.record_statistics(&stats)?;
            let population = engine.population();
            recorder.record_population(
                completed,
                &population.distribution_snapshot(),
                population.size_snapshot(),
            )?;
            let snapshot_due = batch.snapshot_every > 0 && completed % batch.snapshot_every == 0;
            if snapshot_due || completed == steps {
                recorder.record_entities(completed, &population.entities_snapshot())?;
            }
            if let (Some(every), Some(_)) = (batch.checkpoint_every, &batch.checkpoint_dir) {
                if every > 0 && completed % every == 0 && completed < steps {
                    self.save_checkpoint(run, &engine, completed, skipped_records)?;
                }
            }
        }
        bar.finish();

        if cancelled {
            warn!(run, completed, "run cancelled");
            if batch.checkpoint_dir.is_some() {
                self.save_checkpoint(run, &engine, completed, skipped_records)?;
            }
        }
        recorder.finalize()?;

        let summary = RunSummary {
            run,
            seed: engine.seed(),
            steps_completed: completed,
            final_population: engine.population().total_size(),
            skipped_records,
            cancelled,
        };
        info!(
            run,
            steps = summary.steps_completed,
            population = summary.final_population,
            "run finished"
        );
        Ok(summary)
    }

    fn save_checkpoint(
        &self,
        run: usize,
        engine: &SimulationEngine,
        next_step: usize,
        skipped_records: usize,
    ) -> Result<()> {
        let Some(dir) = &self.config.batch.checkpoint_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = checkpoint_path(dir, run);
        let checkpoint = Checkpoint {
            skipped_records,
            ..engine.checkpoint(next_step)
        };
        checkpoint.save(&path)?;
        info!(run, next_step, path = %path.display(), "checkpoint written");
        Ok(())
    }

    /// All configured runs, each with the recorder `make_recorder(run)` builds.
    /// Summaries come back in run order whether or not runs execute in
    /// parallel.
    pub fn run_batch<R, F>(&self, make_recorder: F, cancel: &CancelToken) -> Result<Vec<RunSummary>>
    where
        R: Recorder,
        F: Fn(usize) -> Result<R> + Sync,
    {
        let runs = self.config.batch.runs;
        info!(
            runs,
            base_seed = self.base_seed,
            parallel = self.config.batch.parallel_runs,
            "batch started"
        );
        let one = |run: usize| -> Result<RunSummary> {
            let mut recorder = make_recorder(run)?;
            self.run(run, &mut recorder, cancel)
        };
        if self.config.batch.parallel_runs {
            (0..runs).into_par_iter().map(one).collect()
        } else {
            (0..runs).map(one).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::recorder::MemoryRecorder;

    fn config(steps: usize, runs: usize) -> SimulationConfig {
        let mut cfg = SimulationConfig::default();
        cfg.initial.total_count = 150;
        cfg.batch = BatchConfig {
            steps,
            runs,
            snapshot_every: 2,
            seed: Some(5),
            ..BatchConfig::default()
        };
        cfg
    }

    #[test]
    fn records_every_step_and_snapshots_on_cadence() {
        let driver = Driver::new(config(5, 1)).unwrap();
        let mut rec = MemoryRecorder::new();
        let summary = driver.run(0, &mut rec, &CancelToken::new()).unwrap();

        assert_eq!(summary.steps_completed, 5);
        assert!(!summary.cancelled);
        assert_eq!(rec.statistics.len(), 5);
        assert_eq!(rec.populations.len(), 6);
        let snap_steps: Vec<usize> = rec.entity_snapshots.iter().map(|(s, _)| *s).collect();
        assert_eq!(snap_steps, vec![0, 2, 4, 5]);
        assert!(rec.finalized);
        assert_eq!(rec.settings.as_ref().unwrap().seed, 5);
        assert_eq!(rec.populations.last().unwrap().2, summary.final_population);
    }

    #[test]
    fn cancelled_before_start_runs_no_steps() {
        let driver = Driver::new(config(5, 1)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut rec = MemoryRecorder::new();
        let summary = driver.run(0, &mut rec, &cancel).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.steps_completed, 0);
        assert!(rec.statistics.is_empty());
        assert!(rec.finalized);
    }

    #[test]
    fn parallel_batch_matches_sequential() {
        let mut seq = config(4, 3);
        seq.batch.parallel_runs = false;
        let mut par = seq.clone();
        par.batch.parallel_runs = true;

        let a = Driver::new(seq)
            .unwrap()
            .run_batch(|_| Ok(MemoryRecorder::new()), &CancelToken::new())
            .unwrap();
        let b = Driver::new(par)
            .unwrap()
            .run_batch(|_| Ok(MemoryRecorder::new()), &CancelToken::new())
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.iter().map(|s| s.seed).collect::<Vec<_>>(), vec![5, 6, 7]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = config(1, 1);
        cfg.rules.death_probability = 1.5;
        assert!(Driver::new(cfg).is_err());
    }
}
