use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ruleset::RuleSet;

/// Persistent treatment state of one run. Survives across steps; a fresh run
/// starts from `Default`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentState {
    pub cytotoxic_active: bool,
    pub adaptive_active: bool,
    pub kill_fraction: f64,
}

/// What the death/migration phase applies during one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreatmentDecision {
    pub cytotoxic_active: bool,
    pub kill_fraction: f64,
    pub migration_probability: f64,
    pub adaptive_active: bool,
}

/// Owns both cytotoxic schedules so MTD and adaptive therapy cannot drift apart.
///
/// Precedence per step: MTD first (sticky once on), then adaptive therapy,
/// which may override it, then the independent anti-migratory switch.
#[derive(Clone, Debug, Default)]
pub struct TreatmentController {
    state: TreatmentState,
}

impl TreatmentController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: TreatmentState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> TreatmentState {
        self.state
    }

    /// Advance the controller for `step`. `current_size` is the population at
    /// the start of the step, `initial_size` the population right after
    /// initialization. Records restarted adaptive cycles in `rules`.
    pub fn update(
        &mut self,
        step: usize,
        current_size: usize,
        initial_size: usize,
        rules: &mut RuleSet,
    ) -> TreatmentDecision {
        let s = &mut self.state;

        if let Some(mtd_start) = rules.mtd_start_step() {
            if step >= mtd_start {
                if !s.cytotoxic_active && step == mtd_start {
                    info!(step, "MTD treatment started");
                }
                s.cytotoxic_active = true;
                s.kill_fraction = rules.kill_fraction();
            }
        }

        if let Some(adaptive_start) = rules.adaptive_start_step() {
            let current = current_size as f64;
            let initial = initial_size as f64;
            if step == adaptive_start {
                s.cytotoxic_active = true;
                s.adaptive_active = true;
                s.kill_fraction = rules.kill_fraction();
                rules.set_adaptive_cycle_start(step);
                info!(step, "adaptive therapy started");
            } else if step > adaptive_start {
                if s.adaptive_active && current <= initial * rules.adaptive_stop_threshold() {
                    s.cytotoxic_active = false;
                    s.adaptive_active = false;
                    info!(step, current_size, "adaptive therapy paused");
                } else if !s.adaptive_active && current >= initial * rules.adaptive_start_threshold()
                {
                    s.cytotoxic_active = true;
                    s.adaptive_active = true;
                    s.kill_fraction = rules.kill_fraction();
                    rules.set_adaptive_cycle_start(step);
                    info!(step, current_size, "adaptive therapy restarted");
                }
            }
        }

        let migration_probability = match rules.anti_migratory_start_step() {
            Some(start) if step >= start => rules.migration_probability_under_treatment(),
            _ => rules.migration_probability(),
        };

        TreatmentDecision {
            cytotoxic_active: s.cytotoxic_active,
            kill_fraction: s.kill_fraction,
            migration_probability,
            adaptive_active: s.adaptive_active,
        }
    }
}
