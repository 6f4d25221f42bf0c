//!
//! Error definitions shared by every traffic-engineering component.
//!
use thiserror::Error;

/// Failure reported by an LP solver backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("model is infeasible")]
    Infeasible,
    #[error("model is unbounded")]
    Unbounded,
    #[error("solver failed: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum TeError {
    #[error("invalid distance metric: {0}; only \"inv-cap\" and \"min-hop\" are valid choices")]
    InvalidDistMetric(String),
    #[error("objective \"{0}\" not found")]
    InvalidObjective(String),
    #[error("split method \"{0}\" not found")]
    InvalidSplitMethod(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("node {0} is not in the topology")]
    UnknownNode(usize),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("solution is infeasible: {0}")]
    Infeasible(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TeError>;
