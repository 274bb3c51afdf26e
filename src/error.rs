//! Error types for the projection engine.

use crate::projection::{ConstraintId, VarId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("constraint {constraint} refers to unknown variable {variable}")]
    UnknownVariable {
        constraint: ConstraintId,
        variable: VarId,
    },

    #[error("constraint {constraint} has invalid gap {gap} (must be finite and non-negative)")]
    InvalidGap { constraint: ConstraintId, gap: f64 },

    #[error("variable {variable} has a non-finite position")]
    NonFinitePosition { variable: VarId },

    #[error("constraints {constraints:?} form a cycle with positive total gap")]
    InfeasibleCycle { constraints: Vec<ConstraintId> },

    #[error("starting positions violate a constraint by {max_violation}")]
    InfeasibleStart { max_violation: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("projection did not converge within {iterations} iterations")]
    IterationLimit { iterations: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
