//! Structured error types for the engine, per the error-kind taxonomy.
//!
//! Every fallible operation in this crate returns a variant of
//! [`EngineError`] (or a narrower sub-error convertible into it via
//! `#[from]`), never a bare `String`.

use crate::period::Period;
use thiserror::Error;

/// Root error type. Callers match on the outer kind first, then drill
/// into the nested variant for specifics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    GraphStructure(#[from] GraphStructureError),

    #[error(transparent)]
    Calculation(#[from] CalculationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphStructureError {
    #[error("vertex '{0}' already exists")]
    DuplicateVertex(String),

    #[error("vertex '{0}' is not known to the graph")]
    UnknownVertex(String),

    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("vertex '{vertex}' references unknown input '{input}'")]
    MissingInput { vertex: String, input: String },

    #[error("period '{0}' is not part of the graph's period sequence")]
    InvalidPeriod(String),

    #[error("strategy '{strategy}' cannot evaluate vertex '{vertex}': {reason}")]
    StrategyMismatch {
        vertex: String,
        strategy: String,
        reason: String,
    },

    #[error("cannot set a value directly on non-data vertex '{0}'")]
    NotADataVertex(String),

    #[error("cannot remove vertex '{vertex}': {dependents} dependent(s) remain (use force=true)")]
    DependentsRemain { vertex: String, dependents: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalculationError {
    #[error("variable '{0}' is unbound in this formula's scope")]
    UnboundVariable(String),

    #[error("division by zero evaluating '{0}'")]
    DivisionByZero(String),

    #[error("strategy '{strategy}' expected {expected} operand(s), got {actual}")]
    ArityMismatch {
        strategy: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{vertex}' at period '{period}' has no value")]
    MissingValue { vertex: String, period: Period },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown calculation strategy '{0}'")]
    UnknownStrategy(String),

    #[error("'{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("metric '{metric}' is missing input(s): {}", .missing.join(", "))]
    MissingInput { metric: String, missing: Vec<String> },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdjustmentError {
    #[error("invalid adjustment on '{vertex}' at '{period}': {reason}")]
    InvalidAdjustment {
        vertex: String,
        period: Period,
        reason: String,
    },

    #[error("unknown adjustment id '{0}'")]
    UnknownAdjustment(String),

    #[error("adjustment id '{0}' already exists")]
    DuplicateAdjustment(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("unknown forecast strategy '{0}'")]
    UnknownForecastStrategy(String),

    #[error("invalid forecast horizon: {0}")]
    InvalidHorizon(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SerializationError {
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("unsupported bundle version '{0}'")]
    UnsupportedVersion(String),
}
