use serde::{Deserialize, Serialize};

/// 1-based phenotype index, `1..=number_types`.
pub type Phenotype = u16;

/// Two positions closer than this on both axes are treated as the same point
/// when guarding against self-mating.
pub const POSITION_EPSILON: f64 = 1e-9;

// ── Position ──────────────────────────────────────────────────────────────────

/// Point in a site-local frame (relative to the site's center).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Position) -> f64 {
        self.distance_sq(other).sqrt()
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Position {
        Position::new(self.x + dx, self.y + dy)
    }

    pub fn approx_eq(&self, other: &Position) -> bool {
        (self.x - other.x).abs() <= POSITION_EPSILON && (self.y - other.y).abs() <= POSITION_EPSILON
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

// ── Entity ────────────────────────────────────────────────────────────────────

/// One simulated cell. Value-like: no identity beyond the current step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub phenotype: Phenotype,
    pub position: Position,
    pub invasive: bool,
}

impl Entity {
    pub fn new(phenotype: Phenotype, position: Position, invasive: bool) -> Self {
        Self {
            phenotype,
            position,
            invasive,
        }
    }

    /// Same phenotype at the same point: a mate choice that would pair a cell
    /// with itself.
    pub fn indistinguishable_from(&self, other: &Entity) -> bool {
        self.phenotype == other.phenotype && self.position.approx_eq(&other.position)
    }

    pub fn to_record(&self, site: usize) -> EntityRecord {
        EntityRecord {
            phenotype: self.phenotype,
            invasive: self.invasive,
            site,
            x: self.position.x,
            y: self.position.y,
        }
    }
}

// ── Exchange record ───────────────────────────────────────────────────────────

/// Flat `(phenotype, invasive, site, x, y)` tuple used to seed a population and
/// to export snapshots. Coordinates are site-local.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub phenotype: Phenotype,
    pub invasive: bool,
    pub site: usize,
    pub x: f64,
    pub y: f64,
}

impl EntityRecord {
    pub fn entity(&self) -> Entity {
        Entity::new(self.phenotype, Position::new(self.x, self.y), self.invasive)
    }
}
