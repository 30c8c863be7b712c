//! Ghost-layer movement between patches of the same rank and at domain
//! boundaries.
//!
//! Positions are integer cell coordinates as the traversal sees them; two
//! patches are face neighbours when their positions differ in exactly one
//! axis by one.

use crate::engine_error::EngineError;
use crate::geometry::RelativePosition;
use crate::patch::index::PatchKey;
use crate::patch::layout::PatchLayout;
use crate::patch::store::PatchStore;
use crate::solver::{PatchView, Solver};

/// Boundary slice of `buffer` facing the neighbour at `rel`.
pub fn extract_boundary_layer<const D: usize>(
    layout: &PatchLayout<D>,
    buffer: &[f64],
    rel: RelativePosition<D>,
) -> Result<Vec<f64>, EngineError> {
    layout.extract_boundary_layer(buffer, rel.require_face()?)
}

/// Write `layer` into the ghost region of `buffer` facing `rel`, through the
/// solver's ghost-layer filling strategy.
pub fn fill_ghost_layer<const D: usize>(
    solver: &Solver<D>,
    buffer: &mut [f64],
    layer: &[f64],
    rel: RelativePosition<D>,
    view: &PatchView<'_, D>,
) -> Result<(), EngineError> {
    let face = rel.require_face()?;
    solver
        .discretization()
        .ghost_layer_filling(buffer, layer, view, face)
}

/// Merge two patches of one solver that share a face on this rank.
///
/// Both patches first adopt the solver's time-step data, then each receives
/// the other's boundary layer in its ghost region. Returns `false` when
/// nothing was merged: the pair is not face-adjacent, neither side holds
/// field data, or the face was already merged this iteration.
pub fn merge_local_neighbours<const D: usize>(
    solver: &Solver<D>,
    store: &mut PatchStore<D>,
    a: PatchKey,
    b: PatchKey,
    pos_a: [i32; D],
    pos_b: [i32; D],
) -> Result<bool, EngineError> {
    let rel_ab = RelativePosition::between(pos_a, pos_b)?;
    let Some(face_ab) = rel_ab.face() else {
        return Ok(false);
    };
    let rel_ba = rel_ab.inverse();
    let face_ba = face_ab.opposite();

    let (kind_a, kind_b) = (store.descriptor(a)?.kind, store.descriptor(b)?.kind);
    match (kind_a.holds_field_data(), kind_b.holds_field_data()) {
        (true, true) => {}
        (false, false) => return Ok(false),
        _ => return Err(EngineError::InconsistentNeighbourPair { a: kind_a, b: kind_b }),
    }
    if store.descriptor(a)?.neighbour_merge_performed(face_ab)
        && store.descriptor(b)?.neighbour_merge_performed(face_ba)
    {
        return Ok(false);
    }

    solver.synchronise_time_stepping(store.descriptor_mut(a)?);
    solver.synchronise_time_stepping(store.descriptor_mut(b)?);

    let layout = solver.layout();
    let view_a = solver.view(store.descriptor(a)?);
    let view_b = solver.view(store.descriptor(b)?);
    store.with_two_solutions_mut(a, b, |sol_a, sol_b| -> Result<(), EngineError> {
        let from_b = extract_boundary_layer(layout, sol_b, rel_ba)?;
        let from_a = extract_boundary_layer(layout, sol_a, rel_ab)?;
        fill_ghost_layer(solver, sol_a, &from_b, rel_ab, &view_a)?;
        fill_ghost_layer(solver, sol_b, &from_a, rel_ba, &view_b)
    })??;

    store.descriptor_mut(a)?.mark_neighbour_merge(face_ab);
    store.descriptor_mut(b)?.mark_neighbour_merge(face_ba);
    Ok(true)
}

/// Fill the ghost region of the patch at `pos_cell` that faces the domain
/// boundary at `pos_boundary`. The patch adopts the solver's time-step data,
/// then its own boundary layer goes through the solver's boundary conditions
/// and the outward state is written back as the ghost layer.
pub fn merge_at_boundary<const D: usize>(
    solver: &Solver<D>,
    store: &mut PatchStore<D>,
    key: PatchKey,
    pos_cell: [i32; D],
    pos_boundary: [i32; D],
) -> Result<bool, EngineError> {
    let rel = RelativePosition::between(pos_cell, pos_boundary)?;
    let face = rel.require_face()?;
    if !store.descriptor(key)?.kind.holds_field_data() {
        return Ok(false);
    }
    solver.synchronise_time_stepping(store.descriptor_mut(key)?);
    let view = solver.view(store.descriptor(key)?);
    let layout = solver.layout();
    let disc = solver.discretization();
    store.with_solution_mut(key, |u| -> Result<(), EngineError> {
        let state_in = layout.extract_boundary_layer(u, face)?;
        let mut state_out = vec![0.0; state_in.len()];
        disc.boundary_conditions(&mut state_out, &state_in, &view, face);
        disc.ghost_layer_filling(u, &state_out, &view, face)
    })??;
    store.descriptor_mut(key)?.mark_neighbour_merge(face);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundTasks;
    use crate::config::SolverSpec;
    use crate::geometry::Face;
    use crate::patch::cell_kind::CellKind;
    use crate::patch::index::{ParentRef, SolverId};
    use crate::solver::Discretization;
    use std::sync::Arc;

    /// Reflecting walls: the outward state negates the inner one.
    struct Mirror;

    impl Discretization<1> for Mirror {
        fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, 1>) -> f64 {
            1.0
        }
        fn solution_update(&self, _luh: &mut [f64], _prev: &[f64], _p: &PatchView<'_, 1>) -> f64 {
            1.0
        }
        fn boundary_conditions(
            &self,
            out: &mut [f64],
            inner: &[f64],
            _p: &PatchView<'_, 1>,
            _face: Face,
        ) {
            for (o, i) in out.iter_mut().zip(inner) {
                *o = -i;
            }
        }
    }

    fn setup() -> (Solver<1>, PatchStore<1>, PatchKey, PatchKey) {
        let spec = SolverSpec {
            nodes_per_axis: 3,
            ghost_layer_width: 1,
            ..SolverSpec::default()
        };
        let solver = Solver::new(SolverId::new(0), &spec, Box::new(Mirror)).unwrap();
        let mut store = PatchStore::new(Arc::new(BackgroundTasks::inline()));
        let mut keys = Vec::new();
        for i in 0..2 {
            let c = store.create_cell();
            let k = store
                .add_descriptor(c, solver.id(), CellKind::Cell, 1, ParentRef::Invalid, [1.0], [i as f64])
                .unwrap();
            solver.ensure_necessary_memory(&mut store, k).unwrap();
            // [ghost, n0, n1, n2, ghost]
            store
                .with_solution_mut(k, |u| {
                    for n in 0..3 {
                        u[n + 1] = (10 * (i + 1) + n) as f64;
                    }
                })
                .unwrap();
            keys.push(k);
        }
        (solver, store, keys[0], keys[1])
    }

    #[test]
    fn local_merge_fills_both_ghosts() {
        let (solver, mut store, a, b) = setup();
        assert!(merge_local_neighbours(&solver, &mut store, a, b, [0], [1]).unwrap());
        assert_eq!(store.with_solution(a, |u| u[4]).unwrap(), 20.0);
        assert_eq!(store.with_solution(b, |u| u[0]).unwrap(), 12.0);
        // already merged this iteration
        assert!(!merge_local_neighbours(&solver, &mut store, a, b, [0], [1]).unwrap());
        store.descriptor_mut(a).unwrap().reset_neighbour_merge_flags();
        store.descriptor_mut(b).unwrap().reset_neighbour_merge_flags();
        assert!(merge_local_neighbours(&solver, &mut store, b, a, [1], [0]).unwrap());
    }

    #[test]
    fn non_face_pairs_are_skipped() {
        let (solver, mut store, a, b) = setup();
        assert!(!merge_local_neighbours(&solver, &mut store, a, b, [0], [0]).unwrap());
        assert!(merge_local_neighbours(&solver, &mut store, a, b, [0], [2]).is_err());
    }

    #[test]
    fn one_sided_field_data_is_inconsistent() {
        let (solver, mut store, a, b) = setup();
        store.descriptor_mut(b).unwrap().kind = CellKind::Ancestor;
        assert!(matches!(
            merge_local_neighbours(&solver, &mut store, a, b, [0], [1]),
            Err(EngineError::InconsistentNeighbourPair { .. })
        ));
    }

    #[test]
    fn boundary_uses_boundary_conditions() {
        let (solver, mut store, a, _) = setup();
        assert!(merge_at_boundary(&solver, &mut store, a, [0], [-1]).unwrap());
        assert_eq!(store.with_solution(a, |u| u[0]).unwrap(), -10.0);
    }

    /// Writes the time stamp the boundary conditions were evaluated at.
    struct Clock;

    impl Discretization<1> for Clock {
        fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, 1>) -> f64 {
            0.5
        }
        fn solution_update(&self, _luh: &mut [f64], _prev: &[f64], _p: &PatchView<'_, 1>) -> f64 {
            0.5
        }
        fn boundary_conditions(&self, out: &mut [f64], _inner: &[f64], p: &PatchView<'_, 1>, _face: Face) {
            out.fill(p.time_stamp);
        }
    }

    #[test]
    fn boundary_conditions_see_the_solver_time() {
        let (_, mut store, a, _) = setup();
        let spec = SolverSpec {
            nodes_per_axis: 3,
            ghost_layer_width: 1,
            ..SolverSpec::default()
        };
        let mut solver = Solver::new(SolverId::new(0), &spec, Box::new(Clock)).unwrap();
        let state = solver.state_mut();
        state.initialise(0.0);
        for _ in 0..2 {
            state.update_min_next_time_step_size(0.5);
            state.start_new_time_step().unwrap();
        }
        assert_eq!(store.descriptor(a).unwrap().time_stamp, 0.0);

        assert!(merge_at_boundary(&solver, &mut store, a, [0], [1]).unwrap());
        assert_eq!(store.with_solution(a, |u| u[4]).unwrap(), 0.5);
        let d = store.descriptor(a).unwrap();
        assert_eq!((d.time_stamp, d.time_step_size), (0.5, 0.5));
    }
}
