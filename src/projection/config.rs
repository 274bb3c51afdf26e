//! Projection configuration.

use crate::error::{Error, Result};

/// Configuration for the feasible projection.
///
/// # Examples
///
/// ```
/// use u_vpsc::projection::ProjectionConfig;
///
/// let config = ProjectionConfig::default()
///     .with_multiplier_tolerance(1e-6)
///     .with_max_iterations(10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Relative block velocities below this magnitude never trigger a merge.
    ///
    /// Guards the safe-step division `(gap + Al - Ar) / (Br - Bl)` against
    /// floating-point noise.
    pub degeneracy_epsilon: f64,

    /// A block is split only on multipliers below `-multiplier_tolerance`.
    pub multiplier_tolerance: f64,

    /// Violation accepted when checking the starting positions.
    pub feasibility_tolerance: f64,

    /// Push the starting positions into the feasible region when they
    /// violate a constraint. When `false`, an infeasible start is an error.
    pub repair_infeasible_start: bool,

    /// Run [`ProjectionProblem::validate`](super::ProjectionProblem::validate)
    /// (including the infeasible-cycle check) before projecting.
    pub validate_input: bool,

    /// Maximum number of outer iterations. 0 = no limit.
    pub max_iterations: usize,

    /// Scan inactive constraints in parallel (requires the `parallel` feature).
    pub parallel: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            degeneracy_epsilon: 1e-10,
            multiplier_tolerance: 1e-7,
            feasibility_tolerance: 1e-9,
            repair_infeasible_start: true,
            validate_input: true,
            max_iterations: 0,
            parallel: false,
        }
    }
}

impl ProjectionConfig {
    pub fn with_degeneracy_epsilon(mut self, eps: f64) -> Self {
        self.degeneracy_epsilon = eps;
        self
    }

    pub fn with_multiplier_tolerance(mut self, tol: f64) -> Self {
        self.multiplier_tolerance = tol;
        self
    }

    pub fn with_feasibility_tolerance(mut self, tol: f64) -> Self {
        self.feasibility_tolerance = tol;
        self
    }

    pub fn with_repair_infeasible_start(mut self, repair: bool) -> Self {
        self.repair_infeasible_start = repair;
        self
    }

    pub fn with_validate_input(mut self, validate: bool) -> Self {
        self.validate_input = validate;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("degeneracy_epsilon", self.degeneracy_epsilon),
            ("multiplier_tolerance", self.multiplier_tolerance),
            ("feasibility_tolerance", self.feasibility_tolerance),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProjectionConfig::default();
        assert!((config.degeneracy_epsilon - 1e-10).abs() < 1e-20);
        assert!(config.repair_infeasible_start);
        assert!(config.validate_input);
        assert_eq!(config.max_iterations, 0);
        assert!(!config.parallel);
    }

    #[test]
    fn test_validate_ok() {
        assert!(ProjectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_negative_tolerance() {
        let config = ProjectionConfig::default().with_multiplier_tolerance(-1.0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_nan_epsilon() {
        let config = ProjectionConfig::default().with_degeneracy_epsilon(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let config = ProjectionConfig::default()
            .with_feasibility_tolerance(1e-6)
            .with_repair_infeasible_start(false)
            .with_validate_input(false)
            .with_max_iterations(50)
            .with_parallel(true);
        assert!((config.feasibility_tolerance - 1e-6).abs() < 1e-18);
        assert!(!config.repair_infeasible_start);
        assert!(!config.validate_input);
        assert_eq!(config.max_iterations, 50);
        assert!(config.parallel);
    }
}
