//! Feasible projection execution loop.

use super::block::Block;
use super::config::ProjectionConfig;
use super::problem::ProjectionProblem;
use super::types::{BlockId, ConstraintId, VarId};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use tracing::{debug, debug_span, trace, warn};

/// Result of a feasible projection.
#[derive(Debug, Clone)]
pub struct ProjectionResult {
    /// Final position of every variable, in handle order.
    pub positions: Vec<f64>,

    /// Objective `sum (x - desired)^2` at the final positions.
    pub cost: f64,

    /// Number of outer (search/commit) iterations.
    pub iterations: usize,

    /// Number of constraint activations (block merges).
    pub merges: usize,

    /// Number of constraint deactivations (block splits).
    pub splits: usize,

    /// Members of each final block.
    pub blocks: Vec<Vec<VarId>>,

    /// Whether the starting positions had to be pushed into the feasible region.
    pub repaired_start: bool,
}

impl ProjectionResult {
    /// Number of blocks the variables ended up in.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Executes the feasible projection.
pub struct ProjectionRunner;

impl ProjectionRunner {
    /// Projects the desired positions of `problem` onto its constraints,
    /// writing the optimal feasible positions into each variable's `current`.
    ///
    /// # Examples
    ///
    /// ```
    /// use u_vpsc::projection::{ProjectionConfig, ProjectionProblem, ProjectionRunner};
    ///
    /// let mut problem = ProjectionProblem::new();
    /// let a = problem.add_variable(0.0);
    /// let b = problem.add_variable(0.0);
    /// let c = problem.add_variable(0.0);
    /// problem.add_constraint(a, b, 1.0).unwrap();
    /// problem.add_constraint(b, c, 1.0).unwrap();
    ///
    /// let result = ProjectionRunner::run(&mut problem, &ProjectionConfig::default()).unwrap();
    /// assert!((result.positions[0] + 1.0).abs() < 1e-9);
    /// assert!((result.positions[1] - 0.0).abs() < 1e-9);
    /// assert!((result.positions[2] - 1.0).abs() < 1e-9);
    /// ```
    pub fn run(
        problem: &mut ProjectionProblem,
        config: &ProjectionConfig,
    ) -> Result<ProjectionResult> {
        config.validate()?;
        if config.validate_input {
            problem.validate()?;
        } else {
            problem.check_endpoints()?;
        }

        let _span = debug_span!(
            "feasible_projection",
            variables = problem.num_variables(),
            constraints = problem.num_constraints()
        )
        .entered();

        let violation = problem.max_violation();
        let repaired_start = violation > config.feasibility_tolerance;
        if repaired_start {
            if !config.repair_infeasible_start {
                return Err(Error::InfeasibleStart {
                    max_violation: violation,
                });
            }
            let moved = problem.make_feasible()?;
            warn!(violation, moved, "starting positions infeasible, pushed right");
        }

        problem.reset_solver_state();
        let mut projection = FeasibleProjection::new(problem, config);
        projection.make_optimal()?;
        Ok(projection.into_result(repaired_start))
    }
}

/// State of one projection pass: the block arena and the inactive pool.
///
/// Blocks are never removed from the arena; merged and split blocks are
/// tombstoned so that [`BlockId`]s stay unique for the whole pass.
struct FeasibleProjection<'a> {
    problem: &'a mut ProjectionProblem,
    config: &'a ProjectionConfig,
    blocks: Vec<Block>,
    /// Constraints not in any block's spanning tree, sorted by id.
    inactive: Vec<ConstraintId>,
    /// (constraint, left block, right block) of every split in this pass.
    split_history: Vec<(ConstraintId, BlockId, BlockId)>,
    iterations: usize,
    merges: usize,
    splits: usize,
}

impl<'a> FeasibleProjection<'a> {
    fn new(problem: &'a mut ProjectionProblem, config: &'a ProjectionConfig) -> Self {
        let mut blocks = Vec::with_capacity(problem.num_variables());
        for (i, var) in problem.variables.iter_mut().enumerate() {
            var.block = BlockId(i);
            blocks.push(Block::singleton(VarId(i), var));
        }
        let inactive = (0..problem.num_constraints()).map(ConstraintId).collect();
        Self {
            problem,
            config,
            blocks,
            inactive,
            split_history: Vec::new(),
            iterations: 0,
            merges: 0,
            splits: 0,
        }
    }

    fn make_optimal(&mut self) -> Result<()> {
        loop {
            self.iterations += 1;
            if self.config.max_iterations > 0 && self.iterations > self.config.max_iterations {
                return Err(Error::IterationLimit {
                    iterations: self.config.max_iterations,
                });
            }

            for block in self.blocks.iter_mut().filter(|b| b.alive) {
                block.target = block.optimal_position(&self.problem.variables);
            }

            match self.min_safe_alpha() {
                Some((c, alpha)) if alpha < 1.0 => {
                    self.advance(alpha);
                    let merged = self.make_active(c);
                    self.split_blocks(vec![merged]);
                }
                _ => {
                    self.advance(1.0);
                    let all: Vec<BlockId> = self.alive_blocks().collect();
                    if !self.split_blocks(all) {
                        break;
                    }
                }
            }
        }

        debug!(
            iterations = self.iterations,
            merges = self.merges,
            splits = self.splits,
            "projection converged"
        );
        Ok(())
    }

    fn alive_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.alive)
            .map(|(i, _)| BlockId(i))
    }

    /// Largest fraction of the move from `reference` to `target` that keeps
    /// the inactive constraint `c` satisfied.
    fn safe_alpha(&self, c: ConstraintId) -> f64 {
        let vars = &self.problem.variables;
        let con = &self.problem.constraints[c.index()];
        let (l, r) = (&vars[con.left.index()], &vars[con.right.index()]);
        let (bl, br) = (&self.blocks[l.block.0], &self.blocks[r.block.0]);

        if bl.target + l.offset + con.gap <= br.target + r.offset {
            return 1.0;
        }
        let al = bl.reference + l.offset;
        let ar = br.reference + r.offset;
        let velocity = (br.target - br.reference) - (bl.target - bl.reference);
        if velocity > -self.config.degeneracy_epsilon {
            return 1.0;
        }
        let alpha = (con.gap + al - ar) / velocity;
        if alpha > 0.0 {
            alpha.min(1.0)
        } else {
            0.0
        }
    }

    /// The inactive constraint that becomes tight first, with its safe alpha.
    /// Ties go to the lowest constraint id.
    fn min_safe_alpha(&self) -> Option<(ConstraintId, f64)> {
        let by_alpha = |a: &(ConstraintId, f64), b: &(ConstraintId, f64)| -> Ordering {
            a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
        };

        #[cfg(feature = "parallel")]
        if self.config.parallel {
            use rayon::prelude::*;
            return self
                .inactive
                .par_iter()
                .map(|&c| (c, self.safe_alpha(c)))
                .min_by(by_alpha);
        }

        self.inactive
            .iter()
            .map(|&c| (c, self.safe_alpha(c)))
            .min_by(by_alpha)
    }

    /// Moves every block `alpha` of the way to its target.
    fn advance(&mut self, alpha: f64) {
        let vars = &mut self.problem.variables;
        for block in self.blocks.iter_mut().filter(|b| b.alive) {
            block.advance(alpha, vars);
        }
    }

    /// Activates `c`, merging its endpoints' blocks into a new block.
    fn make_active(&mut self, c: ConstraintId) -> BlockId {
        let con = &self.problem.constraints[c.index()];
        let lb = self.problem.variables[con.left.index()].block;
        let rb = self.problem.variables[con.right.index()].block;
        debug_assert_ne!(lb, rb, "activating a constraint inside one block");
        debug_assert!(
            !self.split_history.contains(&(c, lb, rb)),
            "constraint {c} re-activated between the blocks it was split from"
        );

        if let Ok(pos) = self.inactive.binary_search(&c) {
            self.inactive.remove(pos);
        }

        // The larger block absorbs the smaller one.
        let (keep, take) = if self.blocks[lb.0].members.len() >= self.blocks[rb.0].members.len() {
            (lb, rb)
        } else {
            (rb, lb)
        };
        let mut merged = self.take_block(keep);
        let absorbed = self.take_block(take);
        merged.absorb(
            absorbed,
            c,
            &mut self.problem.variables,
            &mut self.problem.constraints,
        );

        let id = self.push_block(merged);
        self.merges += 1;
        trace!(constraint = %c, block = id.0, "merged");
        debug_assert!(self.blocks[id.0]
            .is_spanning_tree(&self.problem.variables, &self.problem.constraints));
        id
    }

    /// Splits blocks on negative multipliers until none remain.
    /// Returns whether any split happened.
    fn split_blocks(&mut self, mut work: Vec<BlockId>) -> bool {
        let mut any = false;
        while let Some(b) = work.pop() {
            let block = &self.blocks[b.0];
            if !block.alive || block.active.is_empty() {
                continue;
            }
            let at = block.optimal_position(&self.problem.variables);
            let root = block.compute_multipliers(
                at,
                &self.problem.variables,
                &mut self.problem.constraints,
            );
            debug_assert!(
                root.abs() <= 1e-9 * (1.0 + block.gradient_scale(at, &self.problem.variables)),
                "nonzero derivative {root} at the optimum of block {}",
                b.0
            );
            let tolerance = self.config.multiplier_tolerance;
            let Some(c) = block.most_negative_multiplier(&self.problem.constraints, tolerance) else {
                continue;
            };
            let (l, r) = self.make_inactive(b, c);
            work.push(l);
            work.push(r);
            any = true;
        }
        any
    }

    /// Deactivates `c`, splitting block `b` into the two trees it separates.
    fn make_inactive(&mut self, b: BlockId, c: ConstraintId) -> (BlockId, BlockId) {
        let parent = self.take_block(b);
        let (left, right) = parent.split(c, &self.problem.variables, &mut self.problem.constraints);
        let l = self.push_block(left);
        let r = self.push_block(right);

        if let Err(pos) = self.inactive.binary_search(&c) {
            self.inactive.insert(pos, c);
        }
        self.split_history.push((c, l, r));
        self.splits += 1;
        trace!(constraint = %c, left = l.0, right = r.0, "split");
        (l, r)
    }

    /// Tombstones a block and hands out its contents.
    fn take_block(&mut self, b: BlockId) -> Block {
        let block = &mut self.blocks[b.0];
        block.alive = false;
        Block {
            reference: block.reference,
            target: block.target,
            members: std::mem::take(&mut block.members),
            active: std::mem::take(&mut block.active),
            alive: true,
        }
    }

    fn push_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len());
        for v in &block.members {
            self.problem.variables[v.index()].block = id;
        }
        self.blocks.push(block);
        id
    }

    fn into_result(self, repaired_start: bool) -> ProjectionResult {
        let blocks = self
            .blocks
            .iter()
            .filter(|b| b.alive)
            .map(|b| b.members.clone())
            .collect();
        ProjectionResult {
            positions: self.problem.positions(),
            cost: self.problem.cost(),
            iterations: self.iterations,
            merges: self.merges,
            splits: self.splits,
            blocks,
            repaired_start,
        }
    }
}
