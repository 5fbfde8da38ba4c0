use serde::{Deserialize, Serialize};

use crate::entity::{Phenotype, Position};
use crate::error::ConfigurationError;

/// Metastatic sites sit at the eight compass points around the tumor.
pub const MAX_MIGRATION_SITES: usize = 8;

/// Gap between the tumor rim and each metastatic site center, on each axis.
pub const SITE_DISTANCE_FROM_TUMOR: f64 = 50.0;

/// Compass offsets of sites 1..=8 in units of `tumor_radius + 50`.
const SITE_DIRECTIONS: [(f64, f64); MAX_MIGRATION_SITES] = [
    (0.0, 1.0),
    (1.0, 1.0),
    (1.0, 0.0),
    (1.0, -1.0),
    (0.0, -1.0),
    (-1.0, -1.0),
    (-1.0, 0.0),
    (-1.0, 1.0),
];

// ── Parameters ────────────────────────────────────────────────────────────────

/// Raw simulation parameters, as read from a config file or the command line.
/// Validated into a [`RuleSet`] by [`RuleSet::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSetParams {
    pub number_types: usize,
    /// `payoff[i][j]`: probability that phenotype `i+1` reproduces after
    /// interacting with phenotype `j+1`.
    pub payoff: Vec<Vec<f64>>,
    pub interaction_radius: f64,
    pub offspring_radius: f64,
    /// Maximum local density (neighbors per unit area of the offspring disk).
    pub carrying_capacity: f64,
    pub death_probability: f64,
    pub number_migration_sites: usize,
    /// Radius of the initial tumor; also fixes the metastatic site geometry.
    pub tumor_radius: f64,
    pub migration_probability: f64,
    pub migration_probability_under_treatment: f64,
    pub survival_at_destination: f64,
    pub invasive_fraction: f64,
    /// Phenotype immune to cytotoxic killing. `None` makes all sensitive.
    pub resistant_phenotype: Option<Phenotype>,
    pub kill_fraction: f64,
    pub mtd_start_step: Option<usize>,
    pub anti_migratory_start_step: Option<usize>,
    pub adaptive_start_step: Option<usize>,
    /// Adaptive therapy restarts once size >= initial × this.
    pub adaptive_start_threshold: f64,
    /// Adaptive therapy pauses once size <= initial × this.
    pub adaptive_stop_threshold: f64,
}

impl Default for RuleSetParams {
    fn default() -> Self {
        Self {
            number_types: 2,
            payoff: vec![vec![0.7, 0.3], vec![0.2, 0.2]],
            interaction_radius: 1.0,
            offspring_radius: 1.0,
            carrying_capacity: 6.0,
            death_probability: 0.2,
            number_migration_sites: 8,
            tumor_radius: 10.0,
            migration_probability: 0.1,
            migration_probability_under_treatment: 0.01,
            survival_at_destination: 0.1,
            invasive_fraction: 0.1,
            resistant_phenotype: Some(2),
            kill_fraction: 0.9,
            mtd_start_step: None,
            anti_migratory_start_step: None,
            adaptive_start_step: None,
            adaptive_start_threshold: 1.0,
            adaptive_stop_threshold: 0.5,
        }
    }
}

// ── RuleSet ───────────────────────────────────────────────────────────────────

/// Validated, immutable simulation rules plus derived site geometry.
///
/// The only mutable piece is the start step of the current adaptive-therapy
/// cycle, which the treatment controller records as cycles restart.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet {
    params: RuleSetParams,
    /// Absolute centers, index 0 = primary tumor.
    site_centers: Vec<Position>,
    adaptive_cycle_start: Option<usize>,
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::ProbabilityOutOfRange { name, value })
    }
}

fn check_radius(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidRadius { name, value })
    }
}

fn check_threshold(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidThreshold { name, value })
    }
}

impl RuleSet {
    pub fn new(params: RuleSetParams) -> Result<Self, ConfigurationError> {
        let n = params.number_types;
        if n == 0 {
            return Err(ConfigurationError::NoPhenotypes);
        }
        if n > Phenotype::MAX as usize {
            return Err(ConfigurationError::TooManyPhenotypes(n));
        }
        let bad_row_len = params.payoff.iter().map(Vec::len).find(|&len| len != n);
        if params.payoff.len() != n || bad_row_len.is_some() {
            return Err(ConfigurationError::PayoffDimension {
                expected: n,
                rows: params.payoff.len(),
                bad_row_len,
            });
        }
        for (row, entries) in params.payoff.iter().enumerate() {
            for (col, &value) in entries.iter().enumerate() {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigurationError::InvalidPayoff { row, col, value });
                }
            }
        }
        if params.number_migration_sites > MAX_MIGRATION_SITES {
            return Err(ConfigurationError::TooManySites {
                requested: params.number_migration_sites,
                max: MAX_MIGRATION_SITES,
            });
        }

        check_probability("death_probability", params.death_probability)?;
        check_probability("kill_fraction", params.kill_fraction)?;
        check_probability("migration_probability", params.migration_probability)?;
        check_probability(
            "migration_probability_under_treatment",
            params.migration_probability_under_treatment,
        )?;
        check_probability("survival_at_destination", params.survival_at_destination)?;
        check_probability("invasive_fraction", params.invasive_fraction)?;

        check_radius("interaction_radius", params.interaction_radius)?;
        check_radius("offspring_radius", params.offspring_radius)?;
        check_threshold("tumor_radius", params.tumor_radius)?;
        if !params.carrying_capacity.is_finite() || params.carrying_capacity < 0.0 {
            return Err(ConfigurationError::InvalidCarryingCapacity(
                params.carrying_capacity,
            ));
        }
        check_threshold("adaptive_start_threshold", params.adaptive_start_threshold)?;
        check_threshold("adaptive_stop_threshold", params.adaptive_stop_threshold)?;

        if let Some(p) = params.resistant_phenotype {
            if p == 0 || p as usize > n {
                return Err(ConfigurationError::InvalidPhenotype {
                    phenotype: p,
                    number_types: n,
                });
            }
        }

        let d = params.tumor_radius + SITE_DISTANCE_FROM_TUMOR;
        let site_centers = std::iter::once(Position::ORIGIN)
            .chain(
                SITE_DIRECTIONS
                    .iter()
                    .take(params.number_migration_sites)
                    .map(|&(dx, dy)| Position::new(dx * d, dy * d)),
            )
            .collect();

        Ok(Self {
            adaptive_cycle_start: params.adaptive_start_step,
            site_centers,
            params,
        })
    }

    pub fn params(&self) -> &RuleSetParams {
        &self.params
    }

    pub fn number_types(&self) -> usize {
        self.params.number_types
    }

    /// Payoff for a `(row, column)` pair of 1-based phenotypes.
    pub fn payoff(&self, phenotype: Phenotype, partner: Phenotype) -> f64 {
        self.params.payoff[phenotype as usize - 1][partner as usize - 1]
    }

    pub fn interaction_radius(&self) -> f64 {
        self.params.interaction_radius
    }

    pub fn offspring_radius(&self) -> f64 {
        self.params.offspring_radius
    }

    pub fn carrying_capacity(&self) -> f64 {
        self.params.carrying_capacity
    }

    pub fn death_probability(&self) -> f64 {
        self.params.death_probability
    }

    pub fn number_migration_sites(&self) -> usize {
        self.params.number_migration_sites
    }

    /// Primary tumor plus metastatic sites.
    pub fn number_sites(&self) -> usize {
        self.params.number_migration_sites + 1
    }

    pub fn tumor_radius(&self) -> f64 {
        self.params.tumor_radius
    }

    pub fn migration_probability(&self) -> f64 {
        self.params.migration_probability
    }

    pub fn migration_probability_under_treatment(&self) -> f64 {
        self.params.migration_probability_under_treatment
    }

    pub fn survival_at_destination(&self) -> f64 {
        self.params.survival_at_destination
    }

    pub fn invasive_fraction(&self) -> f64 {
        self.params.invasive_fraction
    }

    pub fn is_resistant(&self, phenotype: Phenotype) -> bool {
        self.params.resistant_phenotype == Some(phenotype)
    }

    pub fn kill_fraction(&self) -> f64 {
        self.params.kill_fraction
    }

    pub fn mtd_start_step(&self) -> Option<usize> {
        self.params.mtd_start_step
    }

    pub fn anti_migratory_start_step(&self) -> Option<usize> {
        self.params.anti_migratory_start_step
    }

    pub fn adaptive_start_step(&self) -> Option<usize> {
        self.params.adaptive_start_step
    }

    pub fn adaptive_start_threshold(&self) -> f64 {
        self.params.adaptive_start_threshold
    }

    pub fn adaptive_stop_threshold(&self) -> f64 {
        self.params.adaptive_stop_threshold
    }

    /// Start step of the adaptive-therapy cycle currently (or last) running.
    pub fn adaptive_cycle_start(&self) -> Option<usize> {
        self.adaptive_cycle_start
    }

    pub fn set_adaptive_cycle_start(&mut self, step: usize) {
        self.adaptive_cycle_start = Some(step);
    }

    /// Absolute center of `site`. Panics on an out-of-range site.
    pub fn site_center(&self, site: usize) -> Position {
        self.site_centers[site]
    }

    pub fn site_centers(&self) -> &[Position] {
        &self.site_centers
    }

    /// Convert a site-local position to the absolute plane.
    pub fn absolute_position(&self, site: usize, local: Position) -> Position {
        let c = self.site_center(site);
        local.offset(c.x, c.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_type_params() -> RuleSetParams {
        RuleSetParams {
            number_types: 3,
            payoff: vec![vec![0.5; 3]; 3],
            ..RuleSetParams::default()
        }
    }

    #[test]
    fn defaults_validate() {
        let rs = RuleSet::new(RuleSetParams::default()).unwrap();
        assert_eq!(rs.number_sites(), 9);
        assert_eq!(rs.payoff(1, 2), 0.3);
        assert_eq!(rs.payoff(2, 1), 0.2);
        assert!(rs.is_resistant(2));
        assert!(!rs.is_resistant(1));
    }

    #[test]
    fn compass_geometry() {
        let rs = RuleSet::new(RuleSetParams {
            tumor_radius: 10.0,
            number_migration_sites: 8,
            ..RuleSetParams::default()
        })
        .unwrap();
        assert_eq!(rs.site_center(0), Position::new(0.0, 0.0));
        assert_eq!(rs.site_center(1), Position::new(0.0, 60.0));
        assert_eq!(rs.site_center(2), Position::new(60.0, 60.0));
        assert_eq!(rs.site_center(3), Position::new(60.0, 0.0));
        assert_eq!(rs.site_center(4), Position::new(60.0, -60.0));
        assert_eq!(rs.site_center(5), Position::new(0.0, -60.0));
        assert_eq!(rs.site_center(6), Position::new(-60.0, -60.0));
        assert_eq!(rs.site_center(7), Position::new(-60.0, 0.0));
        assert_eq!(rs.site_center(8), Position::new(-60.0, 60.0));
    }

    #[test]
    fn fewer_sites_truncates_geometry() {
        let rs = RuleSet::new(RuleSetParams {
            number_migration_sites: 3,
            ..RuleSetParams::default()
        })
        .unwrap();
        assert_eq!(rs.site_centers().len(), 4);
    }

    #[test]
    fn absolute_position_adds_site_center() {
        let rs = RuleSet::new(RuleSetParams::default()).unwrap();
        let p = rs.absolute_position(3, Position::new(1.0, -1.0));
        assert_eq!(p, Position::new(61.0, -1.0));
    }

    #[test]
    fn rejects_nine_sites() {
        let err = RuleSet::new(RuleSetParams {
            number_migration_sites: 9,
            ..RuleSetParams::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::TooManySites {
                requested: 9,
                max: 8
            }
        );
    }

    #[test]
    fn rejects_payoff_of_wrong_dimension() {
        let err = RuleSet::new(RuleSetParams {
            number_types: 3,
            ..RuleSetParams::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::PayoffDimension { expected: 3, .. }
        ));

        let mut ragged = three_type_params();
        ragged.payoff[1].pop();
        assert!(matches!(
            RuleSet::new(ragged),
            Err(ConfigurationError::PayoffDimension {
                bad_row_len: Some(2),
                ..
            })
        ));
        assert!(RuleSet::new(three_type_params()).is_ok());
    }

    #[test]
    fn rejects_probabilities_outside_unit_interval() {
        let cases = [
            RuleSetParams {
                death_probability: 1.5,
                ..RuleSetParams::default()
            },
            RuleSetParams {
                kill_fraction: -0.1,
                ..RuleSetParams::default()
            },
            RuleSetParams {
                survival_at_destination: f64::NAN,
                ..RuleSetParams::default()
            },
            RuleSetParams {
                invasive_fraction: 2.0,
                ..RuleSetParams::default()
            },
        ];
        for params in cases {
            assert!(matches!(
                RuleSet::new(params),
                Err(ConfigurationError::ProbabilityOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn rejects_unknown_resistant_phenotype() {
        let err = RuleSet::new(RuleSetParams {
            resistant_phenotype: Some(3),
            ..RuleSetParams::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPhenotype { phenotype: 3, .. }));
    }

    #[test]
    fn cycle_start_is_recorded() {
        let mut rs = RuleSet::new(RuleSetParams {
            adaptive_start_step: Some(5),
            ..RuleSetParams::default()
        })
        .unwrap();
        assert_eq!(rs.adaptive_cycle_start(), Some(5));
        rs.set_adaptive_cycle_start(40);
        assert_eq!(rs.adaptive_cycle_start(), Some(40));
        assert_eq!(rs.adaptive_start_step(), Some(5));
    }

    #[test]
    fn params_round_trip_through_json() {
        let params = RuleSetParams {
            mtd_start_step: Some(12),
            ..RuleSetParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: RuleSetParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
        let partial: RuleSetParams = serde_json::from_str(r#"{"death_probability":0.05}"#).unwrap();
        assert_eq!(partial.death_probability, 0.05);
        assert_eq!(partial.number_types, 2);
    }
}
