//! Variables, separation constraints and the handles that link them.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle of a variable inside a [`ProjectionProblem`](super::ProjectionProblem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VarId(pub usize);

/// Handle of a separation constraint inside a
/// [`ProjectionProblem`](super::ProjectionProblem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintId(pub usize);

/// Handle of a block in the runner's block arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockId(pub usize);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl ConstraintId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A scalar unknown placed along one axis.
///
/// `desired` is the position the variable would take without constraints;
/// `current` is the feasible position maintained by the solver. The block
/// bookkeeping (`offset`, owning block) is only meaningful while a
/// projection is running.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Variable {
    /// Target position.
    pub desired: f64,
    /// Current (feasible) position.
    pub current: f64,
    /// Offset from the owning block's reference position.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) offset: f64,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) block: BlockId,
    /// Constraints with this variable on the left.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) outgoing: Vec<ConstraintId>,
    /// Constraints with this variable on the right.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) incoming: Vec<ConstraintId>,
}

impl Variable {
    /// Creates a variable whose starting position equals its desired position.
    pub fn new(desired: f64) -> Self {
        Self::at(desired, desired)
    }

    /// Creates a variable with an explicit starting position.
    pub fn at(desired: f64, current: f64) -> Self {
        Self {
            desired,
            current,
            offset: 0.0,
            block: BlockId::default(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Constraints for which this variable is the left endpoint.
    pub fn outgoing(&self) -> &[ConstraintId] {
        &self.outgoing
    }

    /// Constraints for which this variable is the right endpoint.
    pub fn incoming(&self) -> &[ConstraintId] {
        &self.incoming
    }

    /// Offset relative to the owning block after the last projection.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Squared displacement from the desired position.
    pub fn displacement_cost(&self) -> f64 {
        let d = self.current - self.desired;
        d * d
    }
}

/// Separation constraint `right - left >= gap`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Constraint {
    pub left: VarId,
    pub right: VarId,
    /// Minimum separation.
    pub gap: f64,
    /// Whether the constraint is part of a block's spanning tree.
    pub(crate) active: bool,
    /// Lagrange multiplier; meaningful only while active.
    pub(crate) multiplier: f64,
}

impl Constraint {
    pub fn new(left: VarId, right: VarId, gap: f64) -> Self {
        Self {
            left,
            right,
            gap,
            active: false,
            multiplier: 0.0,
        }
    }

    /// Whether the constraint ended the last projection as an equality
    /// inside a block.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Lagrange multiplier from the last multiplier computation.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Amount by which the constraint is violated at the given positions
    /// (zero or negative when satisfied).
    pub fn violation(&self, left: f64, right: f64) -> f64 {
        left + self.gap - right
    }

    /// Returns the endpoint opposite to `v`.
    pub(crate) fn other(&self, v: VarId) -> VarId {
        if self.left == v {
            self.right
        } else {
            self.left
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_new_starts_at_desired() {
        let v = Variable::new(3.5);
        assert_eq!(v.current, 3.5);
        assert_eq!(v.desired, 3.5);
        assert_eq!(v.displacement_cost(), 0.0);
        assert!(v.outgoing().is_empty());
    }

    #[test]
    fn test_variable_displacement_cost() {
        let v = Variable::at(1.0, 4.0);
        assert!((v.displacement_cost() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_constraint_violation_sign() {
        let c = Constraint::new(VarId(0), VarId(1), 2.0);
        assert!(c.violation(0.0, 2.0).abs() < 1e-12);
        assert!(c.violation(0.0, 5.0) < 0.0);
        assert!(c.violation(0.0, 1.0) > 0.0);
        assert!(!c.is_active());
    }

    #[test]
    fn test_constraint_other_endpoint() {
        let c = Constraint::new(VarId(4), VarId(7), 1.0);
        assert_eq!(c.other(VarId(4)), VarId(7));
        assert_eq!(c.other(VarId(7)), VarId(4));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(VarId(3).to_string(), "v3");
        assert_eq!(ConstraintId(12).to_string(), "c12");
    }
}
