use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::entity::{Entity, EntityRecord, Position};
use crate::error::{ConfigurationError, StoreError};
use crate::population::PopulationStore;
use crate::rng::RandomSource;
use crate::ruleset::RuleSet;
use crate::spatial::NeighborGrid;
use crate::treatment::{TreatmentController, TreatmentDecision, TreatmentState};

// ── Inputs and outputs ────────────────────────────────────────────────────────

/// Where a run's first population comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum InitialPopulation {
    /// `total_count` cells on the tumor disk, split over phenotypes by
    /// `distribution` (one fraction per phenotype).
    Synthetic {
        total_count: usize,
        distribution: Vec<f64>,
    },
    Records(Vec<EntityRecord>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitReport {
    pub population_size: usize,
    pub skipped_records: usize,
}

/// Counters of one step, handed to the recorder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub step: usize,
    /// Entities whose neighborhood was too dense to reproduce.
    pub blocked_by_capacity: usize,
    pub offspring_created: usize,
    pub migrations_succeeded: usize,
    /// Migrants that did not survive arrival.
    pub migrations_lost: usize,
    pub natural_deaths: usize,
    pub treatment_deaths: usize,
    /// Entities that passed both death checks, migrants included.
    pub survivors_after_phase1: usize,
    pub population_size: usize,
    pub cytotoxic_active: bool,
    pub adaptive_active: bool,
    pub kill_fraction: f64,
    pub migration_probability: f64,
}

#[derive(Debug, Default)]
struct Phase1Counts {
    natural_deaths: usize,
    treatment_deaths: usize,
    survivors: usize,
    migrations_succeeded: usize,
    migrations_lost: usize,
}

#[derive(Debug, Default)]
struct Phase2Counts {
    blocked_by_capacity: usize,
    offspring_created: usize,
}

// ── Phases ────────────────────────────────────────────────────────────────────

/// Natural death, treatment kill and migration for every entity present at the
/// start of the step. Returns the per-site survivor lists, with migrants already
/// moved to their destination site.
fn death_and_migration(
    rules: &RuleSet,
    population: &PopulationStore,
    decision: &TreatmentDecision,
    rng: &mut RandomSource,
) -> (Vec<Vec<Entity>>, Phase1Counts) {
    let mut counts = Phase1Counts::default();
    let mut survivors: Vec<Vec<Entity>> = vec![Vec::new(); rules.number_sites()];
    let destinations = rules.number_migration_sites();

    for (site, entities) in population.sites().iter().enumerate() {
        for entity in entities {
            if rng.uniform() <= rules.death_probability() {
                counts.natural_deaths += 1;
                continue;
            }
            if decision.cytotoxic_active
                && !rules.is_resistant(entity.phenotype)
                && rng.uniform() <= decision.kill_fraction
            {
                counts.treatment_deaths += 1;
                continue;
            }
            counts.survivors += 1;

            // No metastatic sites means nowhere to go.
            if entity.invasive && destinations > 0 && rng.uniform() < decision.migration_probability
            {
                if rng.uniform() < rules.survival_at_destination() {
                    let destination = 1 + rng.below(destinations);
                    let position = rng.point_in_disk(Position::ORIGIN, rules.interaction_radius());
                    survivors[destination].push(Entity { position, ..*entity });
                    counts.migrations_succeeded += 1;
                } else {
                    counts.migrations_lost += 1;
                }
                continue;
            }
            survivors[site].push(*entity);
        }
    }
    (survivors, counts)
}

/// Shuffle each site's survivors, then let them interact one by one. Offspring
/// placed earlier in the step count towards the density seen by later entities,
/// so processing order matters and is fixed by the shuffle.
fn interact_and_reproduce(
    rules: &RuleSet,
    survivors: &mut [Vec<Entity>],
    rng: &mut RandomSource,
) -> (Vec<Vec<Entity>>, Phase2Counts) {
    let mut counts = Phase2Counts::default();
    let radius = rules.interaction_radius();
    let offspring_radius = rules.offspring_radius();
    let offspring_area = PI * offspring_radius * offspring_radius;
    let mut newborn: Vec<Vec<Entity>> = Vec::with_capacity(survivors.len());

    for site_survivors in survivors.iter_mut() {
        rng.shuffle(site_survivors);
        let adults: &[Entity] = &site_survivors[..];
        let adult_grid = NeighborGrid::build(radius, adults.iter().map(|e| &e.position));
        let mut offspring: Vec<Entity> = Vec::new();
        let mut offspring_grid = NeighborGrid::new(radius);

        for (i, me) in adults.iter().enumerate() {
            // Includes `me` itself at distance zero.
            let candidates = adult_grid.within(me.position, radius, |j| adults[j].position);
            let other_adults = candidates.len() - usize::from(candidates.contains(&i));
            let density = other_adults
                + offspring_grid.count_within(me.position, radius, |j| offspring[j].position);

            if density as f64 / offspring_area >= rules.carrying_capacity() {
                counts.blocked_by_capacity += 1;
                continue;
            }
            if candidates.len() < 2 {
                continue;
            }
            let mates: Vec<usize> = candidates
                .into_iter()
                .filter(|&j| j != i && !adults[j].indistinguishable_from(me))
                .collect();
            if mates.is_empty() {
                continue;
            }
            let mate = &adults[mates[rng.below(mates.len())]];

            if rng.uniform() < rules.payoff(me.phenotype, mate.phenotype) {
                let invasive = rng.uniform() < rules.invasive_fraction();
                let position = rng.point_in_disk(me.position, offspring_radius);
                offspring_grid.insert(offspring.len(), position);
                offspring.push(Entity::new(me.phenotype, position, invasive));
                counts.offspring_created += 1;
            }
        }
        newborn.push(offspring);
    }
    (newborn, counts)
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// One independent simulation run: rules, population, treatment state and the
/// run's random stream.
#[derive(Clone, Debug)]
pub struct SimulationEngine {
    rules: RuleSet,
    population: PopulationStore,
    controller: TreatmentController,
    rng: RandomSource,
    initial_population_size: usize,
}

impl SimulationEngine {
    /// Engine with an empty population. Call [`SimulationEngine::initialize`]
    /// before stepping.
    pub fn new(rules: RuleSet, rng: RandomSource) -> Self {
        Self {
            population: PopulationStore::for_rules(&rules),
            controller: TreatmentController::new(),
            rules,
            rng,
            initial_population_size: 0,
        }
    }

    /// Build the starting population and reset treatment state.
    pub fn initialize(
        &mut self,
        initial: &InitialPopulation,
    ) -> Result<InitReport, ConfigurationError> {
        let skipped_records = match initial {
            InitialPopulation::Synthetic {
                total_count,
                distribution,
            } => {
                self.population.initialize_synthetic(
                    *total_count,
                    distribution,
                    self.rules.tumor_radius(),
                    self.rules.invasive_fraction(),
                    &self.rules,
                    &mut self.rng,
                )?;
                0
            }
            InitialPopulation::Records(records) => self
                .population
                .initialize_from_records(records.iter().copied()),
        };
        self.controller = TreatmentController::new();
        self.initial_population_size = self.population.total_size();
        Ok(InitReport {
            population_size: self.initial_population_size,
            skipped_records,
        })
    }

    /// Advance the population by one step.
    pub fn step(&mut self, step: usize) -> Result<StepStats, StoreError> {
        let decision = self.controller.update(
            step,
            self.population.total_size(),
            self.initial_population_size,
            &mut self.rules,
        );

        let (mut survivors, phase1) =
            death_and_migration(&self.rules, &self.population, &decision, &mut self.rng);
        let (newborn, phase2) = interact_and_reproduce(&self.rules, &mut survivors, &mut self.rng);
        self.population.commit(newborn, survivors)?;

        let stats = StepStats {
            step,
            blocked_by_capacity: phase2.blocked_by_capacity,
            offspring_created: phase2.offspring_created,
            migrations_succeeded: phase1.migrations_succeeded,
            migrations_lost: phase1.migrations_lost,
            natural_deaths: phase1.natural_deaths,
            treatment_deaths: phase1.treatment_deaths,
            survivors_after_phase1: phase1.survivors,
            population_size: self.population.total_size(),
            cytotoxic_active: decision.cytotoxic_active,
            adaptive_active: decision.adaptive_active,
            kill_fraction: decision.kill_fraction,
            migration_probability: decision.migration_probability,
        };
        debug!(
            step,
            population = stats.population_size,
            offspring = stats.offspring_created,
            blocked = stats.blocked_by_capacity,
            migrations = stats.migrations_succeeded,
            "step complete"
        );
        Ok(stats)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn population(&self) -> &PopulationStore {
        &self.population
    }

    pub fn treatment_state(&self) -> TreatmentState {
        self.controller.state()
    }

    pub fn initial_population_size(&self) -> usize {
        self.initial_population_size
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Full run state, to continue later from `next_step`.
    pub fn checkpoint(&self, next_step: usize) -> Checkpoint {
        Checkpoint {
            next_step,
            sites: self.population.sites().to_vec(),
            treatment: self.controller.state(),
            rng: self.rng.state(),
            initial_population_size: self.initial_population_size,
            adaptive_cycle_start: self.rules.adaptive_cycle_start(),
            skipped_records: 0,
        }
    }

    /// Rebuild an engine from `checkpoint`. `rules` must be the rule set the
    /// checkpointed run used.
    pub fn resume(mut rules: RuleSet, checkpoint: Checkpoint) -> Result<Self, StoreError> {
        if let Some(step) = checkpoint.adaptive_cycle_start {
            rules.set_adaptive_cycle_start(step);
        }
        let mut population = PopulationStore::for_rules(&rules);
        population.replace(checkpoint.sites)?;
        Ok(Self {
            rules,
            population,
            controller: TreatmentController::from_state(checkpoint.treatment),
            rng: RandomSource::from_state(checkpoint.rng),
            initial_population_size: checkpoint.initial_population_size,
        })
    }
}
