use tracing::{debug, warn};

use crate::entity::{Entity, EntityRecord, Phenotype, Position};
use crate::error::{ConfigurationError, StoreError};
use crate::rng::RandomSource;
use crate::ruleset::RuleSet;

/// `distribution[site][phenotype - 1]` = number of entities.
pub type Distribution = Vec<Vec<usize>>;

/// Fractions may miss 1.0 by this much before they are rejected.
const FRACTION_SUM_TOLERANCE: f64 = 1e-6;

/// Two fractional remainders closer than this count as a tie.
const REMAINDER_TIE_EPSILON: f64 = 1e-12;

// ── Apportionment ─────────────────────────────────────────────────────────────

/// Split `total` individuals over phenotypes by largest remainder.
///
/// Each phenotype first gets `floor(total × fraction)`. The shortfall is then
/// handed out one individual at a time to the phenotype with the largest
/// fractional remainder not yet topped up. On equal remainders the challenger
/// takes the slot only if its payoff against the current leader beats the
/// leader's payoff against it. `payoff` takes 0-based indices.
pub fn apportion(
    total: usize,
    fractions: &[f64],
    payoff: impl Fn(usize, usize) -> f64,
) -> Result<Vec<usize>, ConfigurationError> {
    if fractions.is_empty() {
        return Err(ConfigurationError::InvalidDistribution(
            "no phenotype fractions given".to_string(),
        ));
    }
    if let Some(f) = fractions.iter().find(|f| !f.is_finite() || **f < 0.0) {
        return Err(ConfigurationError::InvalidDistribution(format!(
            "fraction {f} must be finite and non-negative"
        )));
    }
    let sum: f64 = fractions.iter().sum();
    if (sum - 1.0).abs() > FRACTION_SUM_TOLERANCE {
        return Err(ConfigurationError::InvalidDistribution(format!(
            "fractions sum to {sum}, expected 1"
        )));
    }

    let exact: Vec<f64> = fractions.iter().map(|f| total as f64 * f).collect();
    let mut counts: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let remainders: Vec<f64> = exact
        .iter()
        .zip(&counts)
        .map(|(e, &c)| e - c as f64)
        .collect();

    let n = fractions.len();
    let mut assigned: usize = counts.iter().sum();
    // Fractions summing to slightly more than one can floor above `total`;
    // take the excess back from the smallest remainders.
    let mut trimmed = vec![false; n];
    while assigned > total {
        if (0..n).all(|k| trimmed[k] || counts[k] == 0) {
            trimmed.fill(false);
        }
        let Some(k) = (0..n)
            .filter(|&k| !trimmed[k] && counts[k] > 0)
            .min_by(|&a, &b| remainders[a].total_cmp(&remainders[b]))
        else {
            break;
        };
        counts[k] -= 1;
        trimmed[k] = true;
        assigned -= 1;
    }

    let mut shortfall = total.saturating_sub(assigned);
    let mut topped_up = vec![false; n];
    while shortfall > 0 {
        // Only reachable when the fractions sum to slightly less than one.
        if topped_up.iter().all(|&t| t) {
            topped_up.fill(false);
        }
        let mut leader: Option<usize> = None;
        for k in (0..n).filter(|&k| !topped_up[k]) {
            leader = match leader {
                None => Some(k),
                Some(l) => {
                    let (rk, rl) = (remainders[k], remainders[l]);
                    if rk > rl + REMAINDER_TIE_EPSILON {
                        Some(k)
                    } else if (rk - rl).abs() <= REMAINDER_TIE_EPSILON && payoff(k, l) > payoff(l, k)
                    {
                        Some(k)
                    } else {
                        Some(l)
                    }
                }
            };
        }
        let Some(l) = leader else { break };
        counts[l] += 1;
        topped_up[l] = true;
        shortfall -= 1;
    }
    Ok(counts)
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Per-site entity collections plus the per-site, per-phenotype counts derived
/// from them.
///
/// Readers only ever see a fully consistent store: every mutation replaces the
/// whole content and recomputes the counts before returning.
#[derive(Clone, Debug, PartialEq)]
pub struct PopulationStore {
    number_types: usize,
    sites: Vec<Vec<Entity>>,
    distribution: Distribution,
    total_size: usize,
}

impl PopulationStore {
    pub fn new(number_sites: usize, number_types: usize) -> Self {
        Self {
            number_types,
            sites: vec![Vec::new(); number_sites],
            distribution: vec![vec![0; number_types]; number_sites],
            total_size: 0,
        }
    }

    pub fn for_rules(rules: &RuleSet) -> Self {
        Self::new(rules.number_sites(), rules.number_types())
    }

    pub fn number_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn number_types(&self) -> usize {
        self.number_types
    }

    pub fn site(&self, site: usize) -> &[Entity] {
        &self.sites[site]
    }

    pub fn sites(&self) -> &[Vec<Entity>] {
        &self.sites
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn distribution_snapshot(&self) -> Distribution {
        self.distribution.clone()
    }

    pub fn size_snapshot(&self) -> usize {
        self.total_size
    }

    /// Every entity as a `(phenotype, invasive, site, x, y)` record, site by
    /// site in storage order.
    pub fn entities_snapshot(&self) -> Vec<EntityRecord> {
        self.sites
            .iter()
            .enumerate()
            .flat_map(|(site, entities)| entities.iter().map(move |e| e.to_record(site)))
            .collect()
    }

    fn phenotype_in_range(&self, phenotype: Phenotype) -> bool {
        phenotype >= 1 && phenotype as usize <= self.number_types
    }

    /// Populate site 0 with `total_count` individuals spread uniformly over the
    /// tumor disk; every other site starts empty.
    pub fn initialize_synthetic(
        &mut self,
        total_count: usize,
        fractions: &[f64],
        tumor_radius: f64,
        invasive_fraction: f64,
        rules: &RuleSet,
        rng: &mut RandomSource,
    ) -> Result<(), ConfigurationError> {
        if fractions.len() != self.number_types {
            return Err(ConfigurationError::InvalidDistribution(format!(
                "{} fractions given for {} phenotypes",
                fractions.len(),
                self.number_types
            )));
        }
        let counts = apportion(total_count, fractions, |a, b| {
            rules.payoff(a as Phenotype + 1, b as Phenotype + 1)
        })?;
        debug!(?counts, total_count, "apportioned initial population");

        let mut tumor = Vec::with_capacity(total_count);
        for (k, &count) in counts.iter().enumerate() {
            let phenotype = k as Phenotype + 1;
            for _ in 0..count {
                let position = rng.point_in_disk(Position::ORIGIN, tumor_radius);
                let invasive = rng.uniform() < invasive_fraction;
                tumor.push(Entity::new(phenotype, position, invasive));
            }
        }

        let mut sites = vec![Vec::new(); self.sites.len()];
        sites[0] = tumor;
        self.install(sites);
        Ok(())
    }

    /// Place each record in its named site. Records naming an unknown site or
    /// phenotype, or carrying non-finite coordinates, are skipped; the number
    /// skipped is returned.
    pub fn initialize_from_records(
        &mut self,
        records: impl IntoIterator<Item = EntityRecord>,
    ) -> usize {
        let mut sites = vec![Vec::new(); self.sites.len()];
        let mut skipped = 0;
        for record in records {
            let entity = record.entity();
            if record.site >= sites.len()
                || !self.phenotype_in_range(record.phenotype)
                || !entity.position.is_finite()
            {
                warn!(?record, "skipping initial-population record");
                skipped += 1;
                continue;
            }
            sites[record.site].push(entity);
        }
        self.install(sites);
        skipped
    }

    /// Replace every site with `new[s] ++ surviving[s]`. The payload is checked
    /// in full before anything changes, so a failed commit leaves the store as
    /// it was.
    pub fn commit(
        &mut self,
        new: Vec<Vec<Entity>>,
        surviving: Vec<Vec<Entity>>,
    ) -> Result<(), StoreError> {
        let expected = self.sites.len();
        for found in [new.len(), surviving.len()] {
            if found != expected {
                return Err(StoreError::SiteCountMismatch { expected, found });
            }
        }
        let sites: Vec<Vec<Entity>> = new
            .into_iter()
            .zip(surviving)
            .map(|(mut born, kept)| {
                born.extend(kept);
                born
            })
            .collect();
        self.replace(sites)
    }

    /// Replace the whole population with `sites`, validating phenotypes first.
    pub fn replace(&mut self, sites: Vec<Vec<Entity>>) -> Result<(), StoreError> {
        if sites.len() != self.sites.len() {
            return Err(StoreError::SiteCountMismatch {
                expected: self.sites.len(),
                found: sites.len(),
            });
        }
        for (site, entities) in sites.iter().enumerate() {
            if let Some(e) = entities.iter().find(|e| !self.phenotype_in_range(e.phenotype)) {
                return Err(StoreError::UnknownPhenotype {
                    site,
                    phenotype: e.phenotype,
                    number_types: self.number_types,
                });
            }
        }
        self.install(sites);
        Ok(())
    }

    /// Swap in already-validated sites and recount.
    fn install(&mut self, sites: Vec<Vec<Entity>>) {
        let mut distribution = vec![vec![0; self.number_types]; sites.len()];
        for (counts, entities) in distribution.iter_mut().zip(&sites) {
            for e in entities {
                counts[e.phenotype as usize - 1] += 1;
            }
        }
        self.total_size = sites.iter().map(Vec::len).sum();
        self.distribution = distribution;
        self.sites = sites;
    }
}
