//! Single-rank reference traversal over a regular grid of patches.
//!
//! The grid has `3^level` cells per axis, where `level` is the finest
//! coarsest level any registered solver asks for. Cells are created on the
//! first mesh-refinement iteration; the grid never refines further. Each
//! iteration merges every interior face once and every domain-boundary face
//! once, then visits every cell in row-major order.

use hashbrown::HashMap;
use itertools::Itertools;
use log::{debug, info};

use super::Repository;
use super::mappings::{self, CellVisit};
use crate::algs::communicator::Communicator;
use crate::context::SimulationContext;
use crate::engine_error::EngineError;
use crate::phase::Phase;

#[derive(Debug)]
pub struct UniformGrid<const D: usize> {
    phase: Phase,
    cells_per_axis: usize,
    cells: Vec<CellVisit<D>>,
    changed_in_last_iteration: bool,
    iterations: HashMap<Phase, usize>,
    terminated: bool,
}

impl<const D: usize> Default for UniformGrid<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> UniformGrid<D> {
    pub fn new() -> Self {
        Self {
            phase: Phase::MeshRefinement,
            cells_per_axis: 0,
            cells: Vec::new(),
            changed_in_last_iteration: false,
            iterations: HashMap::new(),
            terminated: false,
        }
    }

    pub fn cells(&self) -> &[CellVisit<D>] {
        &self.cells
    }

    pub fn cells_per_axis(&self) -> usize {
        self.cells_per_axis
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn build<C: Communicator>(&mut self, ctx: &mut SimulationContext<C, D>) -> Result<(), EngineError> {
        let domain = *ctx.domain_size();
        let origin = *ctx.domain_offset();
        let level = ctx
            .solvers()
            .iter()
            .map(|s| s.coarsest_mesh_level(&domain))
            .max()
            .unwrap_or(0);
        let n = 3usize.pow(level);
        let extent = i32::try_from(n).map_err(|_| EngineError::InvalidConfig {
            field: "maximum_mesh_size",
            reason: format!("{n} cells per axis exceed the traversal's index range"),
        })?;
        let size: [f64; D] = std::array::from_fn(|k| domain[k] / n as f64);

        self.cells = (0..D)
            .map(|_| 0..extent)
            .multi_cartesian_product()
            .map(|pos| {
                // row-major: the last axis varies fastest
                let position: [i32; D] = std::array::from_fn(|k| pos[k]);
                CellVisit {
                    cell: ctx.store_mut().create_cell(),
                    position,
                    offset: std::array::from_fn(|k| origin[k] + f64::from(position[k]) * size[k]),
                    size,
                    level,
                }
            })
            .collect();
        self.cells_per_axis = n;
        info!("uniform grid: {} cells on level {level}", self.cells.len());
        Ok(())
    }

    fn index_of(&self, position: &[i32; D]) -> Option<usize> {
        let n = self.cells_per_axis;
        position.iter().try_fold(0usize, |acc, &p| {
            let p = usize::try_from(p).ok().filter(|&p| p < n)?;
            Some(acc * n + p)
        })
    }

    fn sweep<C: Communicator>(&self, ctx: &mut SimulationContext<C, D>) -> Result<(), EngineError> {
        let phase = self.phase;
        for visit in &self.cells {
            for k in 0..D {
                let mut below = visit.position;
                below[k] -= 1;
                let mut above = visit.position;
                above[k] += 1;
                if self.index_of(&below).is_none() {
                    mappings::merge_with_boundary(ctx, phase, visit, below)?;
                }
                match self.index_of(&above) {
                    Some(i) => {
                        mappings::merge_neighbours(ctx, phase, visit, &self.cells[i])?;
                    }
                    None => {
                        mappings::merge_with_boundary(ctx, phase, visit, above)?;
                    }
                }
            }
        }
        for visit in &self.cells {
            mappings::enter_cell(ctx, phase, visit)?;
        }
        Ok(())
    }
}

impl<C: Communicator, const D: usize> Repository<C, D> for UniformGrid<D> {
    fn switch_to_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    /// All cells live on this rank, so there are no rank boundaries for
    /// `exchange_boundary_data` to close.
    fn iterate(
        &mut self,
        ctx: &mut SimulationContext<C, D>,
        iterations: usize,
        _exchange_boundary_data: bool,
    ) -> Result<(), EngineError> {
        for iteration in 0..iterations {
            if self.phase == Phase::MeshRefinement {
                self.changed_in_last_iteration = self.cells.is_empty();
                if self.changed_in_last_iteration {
                    self.build(ctx)?;
                }
            }
            let skip = mappings::reduction_skipped(ctx, self.phase, iteration, iterations);
            mappings::begin_iteration(ctx, self.phase)?;
            self.sweep(ctx)?;
            mappings::end_iteration(ctx, self.phase, skip)?;
            *self.iterations.entry(self.phase).or_default() += 1;
        }
        debug!("{:?} x{iterations} done, t_min={:e}", self.phase, ctx.min_time_stamp());
        Ok(())
    }

    fn continue_to_construct_grid(&self) -> bool {
        self.cells.is_empty() || self.changed_in_last_iteration
    }

    fn is_grid_stationary(&self) -> bool {
        !<Self as Repository<C, D>>::continue_to_construct_grid(self)
    }

    fn iterations(&self, phase: Phase) -> usize {
        self.iterations.get(&phase).copied().unwrap_or(0)
    }

    fn terminate(&mut self, ctx: &mut SimulationContext<C, D>) -> Result<(), EngineError> {
        ctx.tasks().wait_until_quiescent();
        self.terminated = true;
        info!(
            "traversal terminated after {} iterations",
            self.iterations.values().sum::<usize>()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::{RunConfig, SolverSpec};
    use crate::geometry::Face;
    use crate::solver::{Discretization, PatchView};

    struct Still;

    impl Discretization<2> for Still {
        fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, 2>) -> f64 {
            0.25
        }
        fn solution_update(&self, _luh: &mut [f64], _prev: &[f64], _p: &PatchView<'_, 2>) -> f64 {
            0.25
        }
        fn boundary_conditions(&self, out: &mut [f64], inside: &[f64], _p: &PatchView<'_, 2>, _f: Face) {
            out.copy_from_slice(inside);
        }
    }

    #[test]
    fn builds_three_by_three_grid_once() {
        let mut ctx = SimulationContext::new(RunConfig::default(), NoComm, [0.0; 2], [1.0; 2]).unwrap();
        let spec = SolverSpec {
            maximum_mesh_size: 0.5,
            ..SolverSpec::default()
        };
        ctx.register_solver(spec, Box::new(Still)).unwrap();
        ctx.init_solvers(0.0);

        let mut grid = UniformGrid::<2>::new();
        assert!(Repository::<NoComm, 2>::continue_to_construct_grid(&grid));
        Repository::<NoComm, 2>::iterate(&mut grid, &mut ctx, 1, false).unwrap();
        assert_eq!(grid.cells_per_axis(), 3);
        assert_eq!(ctx.store().patch_count(), 9);
        assert!(Repository::<NoComm, 2>::continue_to_construct_grid(&grid));
        Repository::<NoComm, 2>::iterate(&mut grid, &mut ctx, 1, false).unwrap();
        assert!(Repository::<NoComm, 2>::is_grid_stationary(&grid));
        assert_eq!(ctx.store().patch_count(), 9);
        assert_eq!(Repository::<NoComm, 2>::iterations(&grid, Phase::MeshRefinement), 2);
        assert_eq!(grid.index_of(&[2, 1]), Some(7));
        assert_eq!(grid.index_of(&[3, 0]), None);
        assert_eq!(grid.cells()[7].offset, [2.0 / 3.0, 1.0 / 3.0]);
    }
}
