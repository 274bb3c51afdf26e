//! Problem container: variable and constraint arenas.

use super::types::{BlockId, Constraint, ConstraintId, VarId, Variable};
use crate::error::{Error, Result};

/// A set of variables and the separation constraints between them.
///
/// Variables and constraints live in contiguous arenas and refer to each
/// other through [`VarId`] / [`ConstraintId`] handles. Adjacency lists are
/// maintained by [`add_constraint`](Self::add_constraint). With the `serde`
/// feature they are not serialized; deserialization checks every constraint
/// endpoint and rebuilds them.
///
/// # Examples
///
/// ```
/// use u_vpsc::projection::ProjectionProblem;
///
/// let mut problem = ProjectionProblem::new();
/// let a = problem.add_variable(0.0);
/// let b = problem.add_variable(0.0);
/// problem.add_constraint(a, b, 2.0).unwrap();
/// assert_eq!(problem.num_variables(), 2);
/// assert!(!problem.is_feasible(1e-9));
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "ProblemData"))]
pub struct ProjectionProblem {
    pub(crate) variables: Vec<Variable>,
    pub(crate) constraints: Vec<Constraint>,
}

/// Serialized form of a [`ProjectionProblem`], checked before use.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct ProblemData {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
}

#[cfg(feature = "serde")]
impl TryFrom<ProblemData> for ProjectionProblem {
    type Error = Error;

    fn try_from(data: ProblemData) -> Result<Self> {
        let mut problem = Self {
            variables: data.variables,
            constraints: data.constraints,
        };
        problem.check_endpoints()?;
        problem.rebuild_adjacency();
        problem.reset_solver_state();
        Ok(problem)
    }
}

impl ProjectionProblem {
    /// Creates an empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable that starts at its desired position.
    pub fn add_variable(&mut self, desired: f64) -> VarId {
        self.push_variable(Variable::new(desired))
    }

    /// Adds a variable with an explicit starting position.
    pub fn add_variable_at(&mut self, desired: f64, current: f64) -> VarId {
        self.push_variable(Variable::at(desired, current))
    }

    fn push_variable(&mut self, var: Variable) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(var);
        id
    }

    /// Adds the constraint `right - left >= gap` and links it into the
    /// endpoints' adjacency lists.
    ///
    /// Rejects unknown endpoints and negative or non-finite gaps.
    pub fn add_constraint(
        &mut self,
        left: VarId,
        right: VarId,
        gap: f64,
    ) -> Result<ConstraintId> {
        let id = ConstraintId(self.constraints.len());
        for v in [left, right] {
            if v.index() >= self.variables.len() {
                return Err(Error::UnknownVariable {
                    constraint: id,
                    variable: v,
                });
            }
        }
        if !gap.is_finite() || gap < 0.0 {
            return Err(Error::InvalidGap { constraint: id, gap });
        }

        self.variables[left.index()].outgoing.push(id);
        self.variables[right.index()].incoming.push(id);
        self.constraints.push(Constraint::new(left, right, gap));
        Ok(id)
    }

    /// Changes the desired position of a variable.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not returned by this problem.
    pub fn set_desired(&mut self, id: VarId, desired: f64) {
        self.variables[id.index()].desired = desired;
    }

    /// Changes the current position of a variable.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not returned by this problem.
    pub fn set_current(&mut self, id: VarId, current: f64) {
        self.variables[id.index()].current = current;
    }

    /// # Panics
    ///
    /// Panics if `id` was not returned by this problem.
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    /// # Panics
    ///
    /// Panics if `id` was not returned by this problem.
    pub fn constraint(&self, id: ConstraintId) -> &Constraint {
        &self.constraints[id.index()]
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Current position of every variable, in handle order.
    pub fn positions(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.current).collect()
    }

    /// Objective value `sum (current - desired)^2`.
    pub fn cost(&self) -> f64 {
        self.variables.iter().map(Variable::displacement_cost).sum()
    }

    /// Largest constraint violation at the current positions (0 if all hold).
    pub fn max_violation(&self) -> f64 {
        self.constraints
            .iter()
            .map(|c| {
                c.violation(
                    self.variables[c.left.index()].current,
                    self.variables[c.right.index()].current,
                )
            })
            .fold(0.0, f64::max)
    }

    /// Whether every constraint holds within `tolerance`.
    pub fn is_feasible(&self, tolerance: f64) -> bool {
        self.max_violation() <= tolerance
    }

    /// Makes the current positions the new desired positions.
    pub fn adopt_solution(&mut self) {
        for v in &mut self.variables {
            v.desired = v.current;
        }
    }

    /// Checks that the problem is well formed and that its constraint graph
    /// admits a solution.
    pub fn validate(&self) -> Result<()> {
        self.check_endpoints()?;
        for (i, v) in self.variables.iter().enumerate() {
            if !v.desired.is_finite() || !v.current.is_finite() {
                return Err(Error::NonFinitePosition { variable: VarId(i) });
            }
        }
        for (i, c) in self.constraints.iter().enumerate() {
            if !c.gap.is_finite() || c.gap < 0.0 {
                return Err(Error::InvalidGap {
                    constraint: ConstraintId(i),
                    gap: c.gap,
                });
            }
        }
        match self.find_infeasible_cycle() {
            Some(constraints) => Err(Error::InfeasibleCycle { constraints }),
            None => Ok(()),
        }
    }

    /// Looks for a directed cycle whose gaps sum to a positive amount.
    ///
    /// Longest-path Bellman-Ford relaxation from a virtual source at 0: a
    /// relaxation that still succeeds after `n` passes lies on or behind
    /// such a cycle. Cycles made only of zero gaps are feasible and are not
    /// reported.
    pub fn find_infeasible_cycle(&self) -> Option<Vec<ConstraintId>> {
        let n = self.variables.len();
        let mut dist = vec![0.0_f64; n];
        let mut pred: Vec<Option<ConstraintId>> = vec![None; n];

        let mut last_relaxed = None;
        for _ in 0..=n {
            last_relaxed = None;
            for (i, c) in self.constraints.iter().enumerate() {
                let candidate = dist[c.left.index()] + c.gap;
                if candidate > dist[c.right.index()] {
                    dist[c.right.index()] = candidate;
                    pred[c.right.index()] = Some(ConstraintId(i));
                    last_relaxed = Some(c.right);
                }
            }
            if last_relaxed.is_none() {
                return None;
            }
        }

        // Walk back n steps to land inside the cycle, then collect it.
        let mut v = last_relaxed?;
        for _ in 0..n {
            let c = pred[v.index()]?;
            v = self.constraints[c.index()].left;
        }
        let start = v;
        let mut cycle = Vec::new();
        loop {
            let c = pred[v.index()]?;
            cycle.push(c);
            v = self.constraints[c.index()].left;
            if v == start || cycle.len() > n {
                break;
            }
        }
        cycle.reverse();
        Some(cycle)
    }

    /// Pushes right endpoints until every constraint holds at the current
    /// positions. Returns the number of variables that moved.
    ///
    /// Variables only ever move right, so a feasible start is reached after
    /// at most `n` passes unless the constraints contain an infeasible cycle.
    pub fn make_feasible(&mut self) -> Result<usize> {
        let n = self.variables.len();
        let mut moved = vec![false; n];

        for _ in 0..=n {
            let mut changed = false;
            for c in &self.constraints {
                let required = self.variables[c.left.index()].current + c.gap;
                let right = &mut self.variables[c.right.index()];
                if required > right.current {
                    right.current = required;
                    moved[c.right.index()] = true;
                    changed = true;
                }
            }
            if !changed {
                return Ok(moved.iter().filter(|&&m| m).count());
            }
        }

        Err(Error::InfeasibleCycle {
            constraints: self.find_infeasible_cycle().unwrap_or_default(),
        })
    }

    /// Rejects constraints whose endpoints are not variables of this problem.
    pub(crate) fn check_endpoints(&self) -> Result<()> {
        let n = self.variables.len();
        for (i, c) in self.constraints.iter().enumerate() {
            for v in [c.left, c.right] {
                if v.index() >= n {
                    return Err(Error::UnknownVariable {
                        constraint: ConstraintId(i),
                        variable: v,
                    });
                }
            }
        }
        Ok(())
    }

    /// Rebuilds every variable's adjacency lists from the constraint arena.
    /// Endpoints must already be checked.
    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    pub(crate) fn rebuild_adjacency(&mut self) {
        for v in &mut self.variables {
            v.outgoing.clear();
            v.incoming.clear();
        }
        for (i, c) in self.constraints.iter().enumerate() {
            self.variables[c.left.index()].outgoing.push(ConstraintId(i));
            self.variables[c.right.index()].incoming.push(ConstraintId(i));
        }
    }

    pub(crate) fn reset_solver_state(&mut self) {
        for v in &mut self.variables {
            v.offset = 0.0;
            v.block = BlockId::default();
        }
        for c in &mut self.constraints {
            c.active = false;
            c.multiplier = 0.0;
        }
    }
}
