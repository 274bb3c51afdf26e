//! Blocks: groups of variables held at fixed offsets by active constraints.

use super::types::{Constraint, ConstraintId, VarId, Variable};

/// A rigid group of variables.
///
/// Every member sits at `reference + offset`. The active constraints form a
/// spanning tree over `members`.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    /// Committed reference position; start of the current step.
    pub reference: f64,
    /// Cached unconstrained optimum of `reference`; end of the current step.
    pub target: f64,
    pub members: Vec<VarId>,
    pub active: Vec<ConstraintId>,
    /// Tombstone flag; merged and split blocks stay in the arena dead.
    pub alive: bool,
}

impl Block {
    /// Block holding one variable at offset zero.
    pub fn singleton(v: VarId, var: &Variable) -> Self {
        Self {
            reference: var.current,
            target: var.desired,
            members: vec![v],
            active: Vec::new(),
            alive: true,
        }
    }

    /// Builds a block from members whose offsets are already set, taking the
    /// reference from their current positions.
    pub fn from_parts(members: Vec<VarId>, active: Vec<ConstraintId>, vars: &[Variable]) -> Self {
        let reference = mean(members.iter().map(|v| {
            let var = &vars[v.index()];
            var.current - var.offset
        }));
        let mut block = Self {
            reference,
            target: reference,
            members,
            active,
            alive: true,
        };
        block.target = block.optimal_position(vars);
        block
    }

    /// Least-squares optimal reference: `mean(desired - offset)`.
    pub fn optimal_position(&self, vars: &[Variable]) -> f64 {
        mean(self.members.iter().map(|v| {
            let var = &vars[v.index()];
            var.desired - var.offset
        }))
    }

    /// Moves the reference by `alpha` of the way toward `target` and updates
    /// members' current positions. `alpha >= 1` lands exactly on `target`.
    pub fn advance(&mut self, alpha: f64, vars: &mut [Variable]) {
        if alpha >= 1.0 {
            self.reference = self.target;
        } else {
            self.reference += alpha * (self.target - self.reference);
        }
        for v in &self.members {
            let var = &mut vars[v.index()];
            var.current = self.reference + var.offset;
        }
    }

    /// Folds `other` into `self` through the newly activated constraint `via`.
    ///
    /// `other`'s members are re-offset relative to `self.reference` so that
    /// `via` holds with equality, and their current positions are updated.
    pub fn absorb(
        &mut self,
        other: Block,
        via: ConstraintId,
        vars: &mut [Variable],
        cons: &mut [Constraint],
    ) {
        let c = &cons[via.index()];
        let (l, r) = (&vars[c.left.index()], &vars[c.right.index()]);
        // New offset of an absorbed member: old offset shifted so that
        // `via`'s endpoints sit exactly `gap` apart.
        let base = if self.members.contains(&c.left) {
            l.offset + c.gap - r.offset
        } else {
            r.offset - c.gap - l.offset
        };

        for v in &other.members {
            let var = &mut vars[v.index()];
            var.offset += base;
            var.current = self.reference + var.offset;
        }

        cons[via.index()].active = true;
        self.members.extend(other.members);
        self.active.extend(other.active);
        self.active.push(via);
        self.target = self.optimal_position(vars);
    }

    /// Recomputes the multiplier of every active constraint with the block
    /// placed at reference `at`.
    ///
    /// One depth-first pass over the spanning tree rooted at the first
    /// member. The derivative at a variable is `2 * (x - desired)` plus the
    /// derivatives of the subtrees hanging off it; each tree edge takes the
    /// subtree derivative of its right side as its multiplier. Returns the
    /// root's accumulated derivative, which is zero when `at` is the block's
    /// optimal position.
    pub fn compute_multipliers(
        &self,
        at: f64,
        vars: &[Variable],
        cons: &mut [Constraint],
    ) -> f64 {
        for c in &self.active {
            cons[c.index()].multiplier = 0.0;
        }
        let Some(&root) = self.members.first() else {
            return 0.0;
        };

        struct Visit {
            var: VarId,
            parent: Option<usize>,
            via: Option<ConstraintId>,
            dfdv: f64,
        }

        let mut order: Vec<Visit> = Vec::with_capacity(self.members.len());
        let mut stack: Vec<(VarId, Option<usize>, Option<ConstraintId>)> =
            vec![(root, None, None)];
        while let Some((v, parent, via)) = stack.pop() {
            let var = &vars[v.index()];
            let idx = order.len();
            order.push(Visit {
                var: v,
                parent,
                via,
                dfdv: 2.0 * (at + var.offset - var.desired),
            });
            if order.len() > self.members.len() {
                debug_assert!(false, "active constraints of a block contain a cycle");
                break;
            }
            for &c in var.outgoing.iter().chain(var.incoming.iter()) {
                if Some(c) != via && cons[c.index()].active {
                    stack.push((cons[c.index()].other(v), Some(idx), Some(c)));
                }
            }
        }

        for i in (1..order.len()).rev() {
            let (Some(parent), Some(via)) = (order[i].parent, order[i].via) else {
                continue;
            };
            let dfdv = order[i].dfdv;
            let c = &mut cons[via.index()];
            c.multiplier = if c.right == order[i].var { dfdv } else { -dfdv };
            order[parent].dfdv += dfdv;
        }
        order[0].dfdv
    }

    /// Magnitude of the terms summed into the root derivative at `at`, for
    /// judging how far from zero rounding can push it.
    pub fn gradient_scale(&self, at: f64, vars: &[Variable]) -> f64 {
        self.members
            .iter()
            .map(|v| {
                let var = &vars[v.index()];
                2.0 * (at.abs() + var.offset.abs() + var.desired.abs())
            })
            .sum()
    }

    /// The active constraint with the most negative multiplier below `-tolerance`.
    pub fn most_negative_multiplier(
        &self,
        cons: &[Constraint],
        tolerance: f64,
    ) -> Option<ConstraintId> {
        self.active
            .iter()
            .copied()
            .filter(|c| cons[c.index()].multiplier < -tolerance)
            .min_by(|a, b| {
                cons[a.index()]
                    .multiplier
                    .total_cmp(&cons[b.index()].multiplier)
                    .then(a.cmp(b))
            })
    }

    /// Removes `via` from the spanning tree and returns the two resulting
    /// blocks: the side containing `via.left` first.
    ///
    /// Offsets and positions are unchanged, so the split blocks keep the
    /// parent's reference.
    pub fn split(
        &self,
        via: ConstraintId,
        vars: &[Variable],
        cons: &mut [Constraint],
    ) -> (Block, Block) {
        let c = &mut cons[via.index()];
        c.active = false;
        c.multiplier = 0.0;
        let (left, right) = (c.left, c.right);

        let (lm, la) = component(left, vars, cons);
        let (rm, ra) = component(right, vars, cons);
        debug_assert_eq!(lm.len() + rm.len(), self.members.len());
        (
            Block::from_parts(lm, la, vars),
            Block::from_parts(rm, ra, vars),
        )
    }

    /// Whether the active constraints form a spanning tree over the members.
    pub fn is_spanning_tree(&self, vars: &[Variable], cons: &[Constraint]) -> bool {
        if self.members.is_empty() || self.active.len() + 1 != self.members.len() {
            return false;
        }
        let all_active_internal = self.active.iter().all(|c| {
            let c = &cons[c.index()];
            c.active && self.members.contains(&c.left) && self.members.contains(&c.right)
        });
        if !all_active_internal {
            return false;
        }
        let (reached, edges) = component(self.members[0], vars, cons);
        reached.len() == self.members.len() && edges.len() == self.active.len()
    }
}

/// Variables and active constraints reachable from `start` through active
/// constraints.
fn component(
    start: VarId,
    vars: &[Variable],
    cons: &[Constraint],
) -> (Vec<VarId>, Vec<ConstraintId>) {
    let mut members = Vec::new();
    let mut edges = Vec::new();
    let mut stack: Vec<(VarId, Option<ConstraintId>)> = vec![(start, None)];
    let limit = vars.len();
    while let Some((v, via)) = stack.pop() {
        members.push(v);
        if members.len() > limit {
            break;
        }
        let var = &vars[v.index()];
        for &c in var.outgoing.iter().chain(var.incoming.iter()) {
            if Some(c) != via && cons[c.index()].active {
                edges.push(c);
                stack.push((cons[c.index()].other(v), Some(c)));
            }
        }
    }
    (members, edges)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionProblem;

    /// Builds a block over all variables of `problem` with the given
    /// constraints active and offsets taken from current positions.
    fn rigid_block(problem: &mut ProjectionProblem, active: &[ConstraintId]) -> Block {
        let reference = problem.variables[0].current;
        for var in &mut problem.variables {
            var.offset = var.current - reference;
        }
        for c in active {
            problem.constraints[c.index()].active = true;
        }
        let members = (0..problem.num_variables()).map(VarId).collect();
        Block::from_parts(members, active.to_vec(), &problem.variables)
    }

    #[test]
    fn test_singleton_block() {
        let var = Variable::at(3.0, 5.0);
        let block = Block::singleton(VarId(0), &var);
        assert_eq!(block.reference, 5.0);
        assert_eq!(block.target, 3.0);
        assert_eq!(block.members, vec![VarId(0)]);
        assert!(block.active.is_empty());
        assert!(block.alive);
    }

    #[test]
    fn test_optimal_position_mean_of_desired_minus_offset() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(0.0, 0.0);
        let b = problem.add_variable_at(0.0, 1.0);
        let c = problem.add_variable_at(0.0, 2.0);
        let ab = problem.add_constraint(a, b, 1.0).unwrap();
        let bc = problem.add_constraint(b, c, 1.0).unwrap();
        let block = rigid_block(&mut problem, &[ab, bc]);

        // offsets 0, 1, 2 => mean(0, -1, -2) = -1
        assert!((block.optimal_position(&problem.variables) + 1.0).abs() < 1e-12);
        assert!((block.reference - 0.0).abs() < 1e-12);
        assert!(block.is_spanning_tree(&problem.variables, &problem.constraints));
    }

    #[test]
    fn test_multipliers_chain_positive() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(0.0, 0.0);
        let b = problem.add_variable_at(0.0, 1.0);
        let c = problem.add_variable_at(0.0, 2.0);
        let ab = problem.add_constraint(a, b, 1.0).unwrap();
        let bc = problem.add_constraint(b, c, 1.0).unwrap();
        let block = rigid_block(&mut problem, &[ab, bc]);

        let at = block.optimal_position(&problem.variables);
        let root = block.compute_multipliers(at, &problem.variables, &mut problem.constraints);
        assert!(root.abs() < 1e-12);
        // Positions -1, 0, 1: lambda(bc) = 2*1 = 2, lambda(ab) = 2*(0 + 1) = 2
        assert!((problem.constraints[bc.index()].multiplier - 2.0).abs() < 1e-12);
        assert!((problem.constraints[ab.index()].multiplier - 2.0).abs() < 1e-12);
        assert!(block
            .most_negative_multiplier(&problem.constraints, 1e-9)
            .is_none());
    }

    #[test]
    fn test_multipliers_root_independent_at_optimum() {
        // Same tree, listed with the right end first so the root is c.
        let mut problem = ProjectionProblem::new();
        let c = problem.add_variable_at(0.0, 2.0);
        let b = problem.add_variable_at(0.0, 1.0);
        let a = problem.add_variable_at(0.0, 0.0);
        let ab = problem.add_constraint(a, b, 1.0).unwrap();
        let bc = problem.add_constraint(b, c, 1.0).unwrap();
        let block = rigid_block(&mut problem, &[ab, bc]);

        let at = block.optimal_position(&problem.variables);
        block.compute_multipliers(at, &problem.variables, &mut problem.constraints);
        assert!((problem.constraints[bc.index()].multiplier - 2.0).abs() < 1e-12);
        assert!((problem.constraints[ab.index()].multiplier - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_root_derivative_off_optimum() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(0.0, 0.0);
        let b = problem.add_variable_at(0.0, 1.0);
        let ab = problem.add_constraint(a, b, 1.0).unwrap();
        let block = rigid_block(&mut problem, &[ab]);
        let vars = &problem.variables;

        // Optimum is -0.5; at 0.5 both members sit 1 to the right.
        let root = block.compute_multipliers(0.5, vars, &mut problem.constraints);
        assert!((root - 4.0).abs() < 1e-12);
        assert!(root.abs() > 1e-9 * (1.0 + block.gradient_scale(0.5, vars)));

        let at = block.optimal_position(vars);
        let root = block.compute_multipliers(at, vars, &mut problem.constraints);
        assert!(root.abs() <= 1e-9 * (1.0 + block.gradient_scale(at, vars)));
    }

    #[test]
    fn test_negative_multiplier_and_split() {
        // a -> b and a -> c; c wants to go far left, dragging a with it,
        // while b would rather separate from a.
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(0.0, 0.0);
        let b = problem.add_variable_at(0.0, 2.0);
        let c = problem.add_variable_at(-6.0, 1.0);
        let ab = problem.add_constraint(a, b, 2.0).unwrap();
        let ac = problem.add_constraint(a, c, 1.0).unwrap();
        let block = rigid_block(&mut problem, &[ab, ac]);

        let at = block.optimal_position(&problem.variables);
        assert!((at + 3.0).abs() < 1e-12);
        block.compute_multipliers(at, &problem.variables, &mut problem.constraints);
        assert!((problem.constraints[ab.index()].multiplier + 2.0).abs() < 1e-12);
        assert!((problem.constraints[ac.index()].multiplier - 8.0).abs() < 1e-12);

        let worst = block.most_negative_multiplier(&problem.constraints, 1e-9);
        assert_eq!(worst, Some(ab));

        let (left, right) = block.split(ab, &problem.variables, &mut problem.constraints);
        assert!(!problem.constraints[ab.index()].active);
        let mut lm = left.members.clone();
        lm.sort();
        assert_eq!(lm, vec![a, c]);
        assert_eq!(right.members, vec![b]);
        assert_eq!(left.active, vec![ac]);
        assert!(right.active.is_empty());
        assert!((left.target + 3.5).abs() < 1e-12);
        assert!(left.is_spanning_tree(&problem.variables, &problem.constraints));
        assert!(right.is_spanning_tree(&problem.variables, &problem.constraints));
        // Positions are preserved by the split.
        let cv = &problem.variables[c.index()];
        let bv = &problem.variables[b.index()];
        assert!((left.reference + cv.offset - 1.0).abs() < 1e-12);
        assert!((right.reference + bv.offset - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_absorb_makes_constraint_tight() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(0.0, 0.0);
        let b = problem.add_variable_at(0.0, 1.5);
        let ab = problem.add_constraint(a, b, 1.5).unwrap();

        let mut left = Block::singleton(a, &problem.variables[a.index()]);
        let right = Block::singleton(b, &problem.variables[b.index()]);
        left.absorb(right, ab, &mut problem.variables, &mut problem.constraints);

        assert!(problem.constraints[ab.index()].active);
        assert_eq!(left.members, vec![a, b]);
        assert_eq!(left.active, vec![ab]);
        assert!((problem.variables[b.index()].offset - 1.5).abs() < 1e-12);
        assert!((left.target + 0.75).abs() < 1e-12);
        assert!(left.is_spanning_tree(&problem.variables, &problem.constraints));
    }

    #[test]
    fn test_absorb_into_right_side() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(4.0, 3.0);
        let b = problem.add_variable_at(0.0, 5.0);
        let ab = problem.add_constraint(a, b, 2.0).unwrap();

        let mut right = Block::singleton(b, &problem.variables[b.index()]);
        let left = Block::singleton(a, &problem.variables[a.index()]);
        right.absorb(left, ab, &mut problem.variables, &mut problem.constraints);

        assert!((problem.variables[a.index()].offset + 2.0).abs() < 1e-12);
        assert!((problem.variables[a.index()].current - 3.0).abs() < 1e-12);
        // mean(0 - 0, 4 + 2) = 3
        assert!((right.target - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_spanning_tree_rejects_missing_edge() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable(0.0);
        let b = problem.add_variable(1.0);
        problem.add_constraint(a, b, 1.0).unwrap();
        let block = rigid_block(&mut problem, &[]);
        assert!(!block.is_spanning_tree(&problem.variables, &problem.constraints));
    }

    #[test]
    fn test_advance_interpolates() {
        let mut problem = ProjectionProblem::new();
        let a = problem.add_variable_at(10.0, 0.0);
        let mut block = Block::singleton(a, &problem.variables[a.index()]);
        block.advance(0.25, &mut problem.variables);
        assert!((problem.variables[a.index()].current - 2.5).abs() < 1e-12);
        block.advance(1.0, &mut problem.variables);
        assert_eq!(problem.variables[a.index()].current, 10.0);
    }
}
