//! Variable placement with separation constraints (VPSC).
//!
//! Computes the feasible placement of one-dimensional variables closest to
//! their desired positions under pairwise minimum-separation constraints.
//! This is the per-axis core of constraint-based graph layout: variables
//! are node coordinates, constraints say "this node stays at least `gap`
//! to the right of that one".
//!
//! - **Projection**: incremental active-set projection that merges
//!   variables into rigid blocks as constraints become tight and splits
//!   them again when a Lagrange multiplier turns negative.
//!
//! # Example
//!
//! ```
//! use u_vpsc::projection::{ProjectionConfig, ProjectionProblem, ProjectionRunner};
//!
//! let mut problem = ProjectionProblem::new();
//! let a = problem.add_variable(0.0);
//! let b = problem.add_variable(0.0);
//! problem.add_constraint(a, b, 2.0)?;
//!
//! let result = ProjectionRunner::run(&mut problem, &ProjectionConfig::default())?;
//! assert!((problem.variable(a).current + 1.0).abs() < 1e-9);
//! assert!((problem.variable(b).current - 1.0).abs() < 1e-9);
//! assert_eq!(result.num_blocks(), 1);
//! # Ok::<(), u_vpsc::Error>(())
//! ```
//!
//! # Architecture
//!
//! Desired positions and constraint generation are the caller's concern;
//! this crate only owns the projection pass and leaves each variable's
//! `current` at the optimum.

pub mod error;
pub mod projection;

pub use error::{Error, Result};
