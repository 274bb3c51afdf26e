//! Feasible projection onto separation constraints.
//!
//! Moves a set of one-dimensional variables as close as possible (in the
//! least-squares sense) to their desired positions subject to constraints
//! `right - left >= gap`, without ever leaving the feasible region.
//!
//! # Algorithm
//!
//! An active-set method over a partition of the variables into rigid
//! blocks. Each round every block computes its unconstrained optimum; the
//! move toward those optima is cut short at the first inactive constraint
//! that would be violated, which is then activated by merging its two
//! blocks. Lagrange multipliers computed over each block's spanning tree of
//! active constraints reveal constraints that are pushing the wrong way;
//! those are deactivated by splitting the block. The loop ends once the
//! full move is feasible and no multiplier is negative.
//!
//! # Key Components
//!
//! - [`ProjectionProblem`]: variable and constraint arenas
//! - [`ProjectionConfig`]: tolerances and limits
//! - [`ProjectionRunner`]: runs one projection pass
//!
//! # References
//!
//! - Dwyer, Marriott & Stuckey (2006), "Fast Node Overlap Removal"
//! - Dwyer (2007), "Scalable, Versatile and Simple Constrained Graph Layout"

mod block;
mod config;
mod problem;
mod runner;
mod types;

pub use config::ProjectionConfig;
pub use problem::ProjectionProblem;
pub use runner::{ProjectionResult, ProjectionRunner};
pub use types::{Constraint, ConstraintId, VarId, Variable};
