use thiserror::Error;

/// Rejected simulation parameters. Raised before any step runs.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("payoff matrix must be {expected}x{expected}, found {rows} rows with {bad_row_len:?} columns")]
    PayoffDimension {
        expected: usize,
        rows: usize,
        /// Length of the first row whose width differs from `expected`, if any.
        bad_row_len: Option<usize>,
    },
    #[error("payoff entry ({row}, {col}) = {value} must be finite and non-negative")]
    InvalidPayoff { row: usize, col: usize, value: f64 },
    #[error("number_types must be at least 1")]
    NoPhenotypes,
    #[error("number_types {0} exceeds the supported maximum of 65535")]
    TooManyPhenotypes(usize),
    #[error("at most {max} migration sites are geometrically defined, got {requested}")]
    TooManySites { requested: usize, max: usize },
    #[error("{name} = {value} must lie in [0, 1]")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },
    #[error("{name} = {value} must be finite and positive")]
    InvalidRadius { name: &'static str, value: f64 },
    #[error("carrying capacity {0} must be finite and non-negative")]
    InvalidCarryingCapacity(f64),
    #[error("{name} = {value} must be finite and non-negative")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("phenotype {phenotype} is outside 1..={number_types}")]
    InvalidPhenotype { phenotype: u16, number_types: usize },
    #[error("invalid initial distribution: {0}")]
    InvalidDistribution(String),
}

/// Rejected population commit. The store is left untouched.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("commit payload covers {found} sites, store holds {expected}")]
    SiteCountMismatch { expected: usize, found: usize },
    #[error("entity at site {site} has phenotype {phenotype}, outside 1..={number_types}")]
    UnknownPhenotype {
        site: usize,
        phenotype: u16,
        number_types: usize,
    },
}
