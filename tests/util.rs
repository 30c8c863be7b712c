#![allow(dead_code)]
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use amr_stepper::prelude::*;

/// Adds the step size to every value and always admits `dt`.
pub struct Drift {
    pub dt: f64,
}

impl<const D: usize> Discretization<D> for Drift {
    fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, D>) -> f64 {
        self.dt
    }
    fn solution_update(&self, luh: &mut [f64], _prev: &[f64], p: &PatchView<'_, D>) -> f64 {
        luh.iter_mut().for_each(|v| *v += p.time_step_size);
        self.dt
    }
    fn boundary_conditions(&self, out: &mut [f64], inside: &[f64], _p: &PatchView<'_, D>, _f: Face) {
        out.copy_from_slice(inside);
    }
}

/// Admissible step sizes taken from a schedule, one entry per call; the last
/// entry repeats.
pub struct Scheduled {
    pub schedule: Vec<f64>,
    pub calls: Arc<AtomicUsize>,
}

impl Scheduled {
    pub fn new(schedule: Vec<f64>) -> Self {
        Self {
            schedule,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<const D: usize> Discretization<D> for Scheduled {
    fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, D>) -> f64 {
        let i = self.calls.fetch_add(1, Ordering::Relaxed);
        self.schedule[i.min(self.schedule.len() - 1)]
    }
    fn solution_update(&self, _luh: &mut [f64], _prev: &[f64], _p: &PatchView<'_, D>) -> f64 {
        f64::INFINITY
    }
    fn boundary_conditions(&self, out: &mut [f64], inside: &[f64], _p: &PatchView<'_, D>, _f: Face) {
        out.copy_from_slice(inside);
    }
}

/// Patch store with inline background tasks.
pub fn store<const D: usize>() -> PatchStore<D> {
    PatchStore::new(Arc::new(BackgroundTasks::inline()))
}

/// One allocated `Cell` patch of `solver` in a fresh cell.
pub fn cell_patch<const D: usize>(
    store: &mut PatchStore<D>,
    solver: &Solver<D>,
    offset: [f64; D],
) -> PatchKey {
    let c = store.create_cell();
    let k = store
        .add_descriptor(c, solver.id(), CellKind::Cell, 0, ParentRef::Invalid, [1.0; D], offset)
        .unwrap();
    store.allocate_buffers(k, solver.layout().buffer_len()).unwrap();
    k
}

/// 1D solver spec with `n` nodes and `g` ghost layers.
pub fn spec_1d(n: usize, g: usize) -> SolverSpec {
    SolverSpec {
        nodes_per_axis: n,
        ghost_layer_width: g,
        ..SolverSpec::default()
    }
}

/// Values of the interior nodes of a 1D single-variable patch.
pub fn interior_1d(layout: &PatchLayout<1>, buf: &[f64]) -> Vec<f64> {
    let g = layout.ghost_layer_width();
    buf[g..g + layout.nodes_per_axis()].to_vec()
}
