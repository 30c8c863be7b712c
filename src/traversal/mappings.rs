//! Per-phase callbacks a traversal invokes while it walks the mesh.
//!
//! For each iteration a traversal calls [`begin_iteration`], then for every
//! face the merge callbacks ([`merge_neighbours`], [`merge_with_boundary`],
//! or the remote pair [`send_to_remote_neighbour`] /
//! [`merge_with_remote_neighbour`]), then [`enter_cell`] for every cell, and
//! finally [`end_iteration`]. Solver-global time-step state only changes in
//! the first and last of these.

use log::{debug, warn};

use crate::algs::communicator::Communicator;
use crate::algs::exchange::metadata::{
    decode_neighbour_metadata, locate, receive_neighbour_metadata, send_neighbour_metadata,
};
use crate::algs::exchange::remote::{
    drop_neighbour_data, merge_with_neighbour_data, send_data_to_neighbour,
    send_empty_data_to_neighbour,
};
use crate::algs::exchange::{MergeOutcome, merge_at_boundary, merge_local_neighbours};
use crate::algs::reduction::reduce_and_broadcast;
use crate::context::SimulationContext;
use crate::engine_error::EngineError;
use crate::geometry::smaller;
use crate::patch::cell_kind::CellKind;
use crate::patch::index::{CellIndex, ParentRef, PatchKey};
use crate::patch::store::PatchStore;
use crate::phase::Phase;
use crate::solver::time_step::TimeStepping;
use crate::solver::{Solver, SolverKind};

/// One cell as a traversal presents it to the mappings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellVisit<const D: usize> {
    pub cell: CellIndex,
    /// Integer position on the traversal's level grid.
    pub position: [i32; D],
    pub offset: [f64; D],
    pub size: [f64; D],
    pub level: u32,
}

/// A face this rank shares with a cell owned by another rank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemoteFace<const D: usize> {
    pub rank: usize,
    pub local: [i32; D],
    pub remote: [i32; D],
    /// Face centre; both ranks address their messages with it.
    pub x: [f64; D],
    pub level: u32,
}

/// Whether `phase` moves face data between patches.
pub fn exchanges_face_data(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::FusedTimeStep
            | Phase::PlotAndFusedTimeStep
            | Phase::PredictionAndFusedTimeSteppingInitialisation
            | Phase::PredictionAndFusedTimeSteppingInitialisationAndPlot
            | Phase::PredictionRerun
            | Phase::NeighbourDataMerging
            | Phase::LocalRecomputationAndTimeStepSizeComputation
    )
}

/// Whether face data also crosses rank boundaries. `exchange_boundary_data`
/// only closes them during fused steps; merges on this rank and at the domain
/// boundary are unaffected.
pub fn exchanges_remote_face_data(phase: Phase, exchange_boundary_data: bool) -> bool {
    match phase {
        Phase::FusedTimeStep | Phase::PlotAndFusedTimeStep => exchange_boundary_data,
        _ => exchanges_face_data(phase),
    }
}

/// Batched fixed-size steps reduce only after the last iteration of a batch.
pub fn reduction_skipped<C: Communicator, const D: usize>(
    ctx: &SimulationContext<C, D>,
    phase: Phase,
    iteration: usize,
    iterations: usize,
) -> bool {
    phase.is_time_stepping()
        && iteration + 1 < iterations
        && ctx.config().skip_reduction_in_batched_time_steps
        && ctx.all_solvers_use(TimeStepping::GlobalFixed)
}

pub fn begin_iteration<C: Communicator, const D: usize>(
    ctx: &mut SimulationContext<C, D>,
    phase: Phase,
) -> Result<(), EngineError> {
    ctx.set_section(phase.section());
    // snapshots of the last iteration must land before buffers change again
    ctx.tasks().wait_until_quiescent();
    let (solvers, store, _) = ctx.parts_mut();
    for key in store.patch_keys() {
        store.descriptor_mut(key)?.reset_neighbour_merge_flags();
    }
    for solver in solvers.iter_mut() {
        if phase == Phase::MeshRefinement {
            solver.requests_mut().set_attained_stable_state(true);
        }
        if phase == Phase::FinaliseMeshRefinementAndReinitialisation
            && solver.requests().global_recomputation()
        {
            debug!("{}: rolling back to the previous time step", solver.identifier());
            solver.state_mut().rollback_to_previous_time_step()?;
        }
        if phase.starts_new_time_step() {
            solver.state_mut().begin_phase()?;
        }
    }
    Ok(())
}

/// Merge the patches of two face-adjacent cells on this rank. Returns how
/// many solver pairs exchanged data.
pub fn merge_neighbours<C: Communicator, const D: usize>(
    ctx: &mut SimulationContext<C, D>,
    phase: Phase,
    a: &CellVisit<D>,
    b: &CellVisit<D>,
) -> Result<usize, EngineError> {
    let section = ctx.section();
    let data = exchanges_face_data(phase);
    let (solvers, store, _) = ctx.parts_mut();
    let mut merged = 0;
    for solver in solvers.iter() {
        let (Some(ka), Some(kb)) = (
            locate(store, Some(a.cell), solver.id()),
            locate(store, Some(b.cell), solver.id()),
        ) else {
            continue;
        };
        if phase == Phase::LimiterStatusSpreading {
            if solver.kind() == SolverKind::Limiting {
                merge_limiter_status(store, ka, kb)?;
            }
            continue;
        }
        if data
            && solver.is_sending(section)
            && merge_local_neighbours(solver, store, ka, kb, a.position, b.position)?
        {
            merged += 1;
        }
    }
    Ok(merged)
}

fn merge_limiter_status<const D: usize>(
    store: &mut PatchStore<D>,
    a: PatchKey,
    b: PatchKey,
) -> Result<(), EngineError> {
    let sa = store.descriptor(a)?.limiter_status;
    let sb = store.descriptor(b)?.limiter_status;
    store.descriptor_mut(a)?.limiter_status = sa.merged_with(sb);
    store.descriptor_mut(b)?.limiter_status = sb.merged_with(sa);
    Ok(())
}

/// Fill the ghost layers of `visit` that face the domain boundary cell at
/// `boundary`.
pub fn merge_with_boundary<C: Communicator, const D: usize>(
    ctx: &mut SimulationContext<C, D>,
    phase: Phase,
    visit: &CellVisit<D>,
    boundary: [i32; D],
) -> Result<usize, EngineError> {
    if !exchanges_face_data(phase) {
        return Ok(0);
    }
    let section = ctx.section();
    let (solvers, store, _) = ctx.parts_mut();
    let mut merged = 0;
    for solver in solvers.iter().filter(|s| s.is_sending(section)) {
        if let Some(key) = locate(store, Some(visit.cell), solver.id()) {
            if merge_at_boundary(solver, store, key, visit.position, boundary)? {
                merged += 1;
            }
        }
    }
    Ok(merged)
}

/// Post the metadata message and one data message per solver towards the
/// rank on the other side of `face`. `cell` is `None` when this rank has no
/// cell there.
pub fn send_to_remote_neighbour<C: Communicator, const D: usize>(
    ctx: &SimulationContext<C, D>,
    phase: Phase,
    exchange_boundary_data: bool,
    cell: Option<CellIndex>,
    face: &RemoteFace<D>,
) -> Result<(), EngineError> {
    let section = ctx.section();
    let data = exchanges_remote_face_data(phase, exchange_boundary_data);
    let (messenger, store) = (ctx.messenger(), ctx.store());
    send_neighbour_metadata(
        messenger,
        face.rank,
        store,
        cell,
        ctx.solvers().len(),
        &face.x,
        face.level,
    )?;
    for solver in ctx.solvers() {
        match locate(store, cell, solver.id()) {
            Some(key) if data && solver.is_sending(section) => send_data_to_neighbour(
                messenger, face.rank, solver, store, key, face.local, face.remote, &face.x,
                face.level,
            )?,
            _ => send_empty_data_to_neighbour(messenger, face.rank, &face.x, face.level),
        }
    }
    Ok(())
}

/// Consume what [`send_to_remote_neighbour`] posted on the other rank:
/// the metadata first, then one data message per solver.
pub fn merge_with_remote_neighbour<C: Communicator, const D: usize>(
    ctx: &mut SimulationContext<C, D>,
    phase: Phase,
    exchange_boundary_data: bool,
    cell: Option<CellIndex>,
    face: &RemoteFace<D>,
) -> Result<Vec<MergeOutcome>, EngineError> {
    let section = ctx.section();
    let data = exchanges_remote_face_data(phase, exchange_boundary_data);
    let (solvers, store, messenger) = ctx.parts_mut();
    let raw = receive_neighbour_metadata(messenger, face.rank, solvers.len(), &face.x, face.level)?;

    let mut outcomes = Vec::with_capacity(solvers.len());
    for solver in solvers.iter() {
        let metadata = decode_neighbour_metadata(&raw, solver.id())?;
        let key = locate(store, cell, solver.id());
        if phase == Phase::LimiterStatusSpreading && solver.kind() == SolverKind::Limiting {
            if let (Some(key), Some(status)) = (key, metadata.limiter_status) {
                let d = store.descriptor_mut(key)?;
                d.limiter_status = d.limiter_status.merged_with(status);
            }
        }
        if data && solver.is_sending(section) {
            outcomes.push(merge_with_neighbour_data(
                messenger, face.rank, solver, store, &metadata, key, face.remote, face.local,
                &face.x, face.level,
            )?);
        } else {
            drop_neighbour_data(messenger, face.rank, &face.x, face.level)?;
            outcomes.push(MergeOutcome::Skipped);
        }
    }
    Ok(outcomes)
}

/// Run the active phase's per-patch work on every solver's patch in
/// `visit`. The mesh-refinement phase creates missing patches.
pub fn enter_cell<C: Communicator, const D: usize>(
    ctx: &mut SimulationContext<C, D>,
    phase: Phase,
    visit: &CellVisit<D>,
) -> Result<(), EngineError> {
    let domain = *ctx.domain_size();
    let accuracy = ctx.config().compression_accuracy;
    let background = ctx.config().spawn_compression_as_background_task;
    let section = ctx.section();
    let (solvers, store, _) = ctx.parts_mut();

    for solver in solvers.iter_mut() {
        let key = match locate(store, Some(visit.cell), solver.id()) {
            Some(key) => key,
            None if phase == Phase::MeshRefinement => store.add_descriptor(
                visit.cell,
                solver.id(),
                CellKind::Cell,
                visit.level,
                ParentRef::Invalid,
                visit.size,
                visit.offset,
            )?,
            None => continue,
        };
        let coarsest = solver.coarsest_mesh_level(&domain);
        let finest = solver.finest_mesh_level(&domain);

        match phase {
            Phase::MeshRefinement => {
                if solver.ensure_necessary_memory(store, key)? {
                    solver.synchronise_time_stepping(store.descriptor_mut(key)?);
                    solver.set_initial_conditions(store, key)?;
                    solver.requests_mut().set_attained_stable_state(false);
                }
                solver.evaluate_refinement(store, key, coarsest)?;
                let h = extent(&store.descriptor(key)?.size);
                solver.state_mut().update_next_cell_size(h);
            }
            Phase::FinaliseMeshRefinementAndTimeStepSizeComputation
            | Phase::TimeStepSizeComputation => {
                solver.synchronise_time_stepping(store.descriptor_mut(key)?);
                advance_patch_time_step(solver, store, key)?;
            }
            Phase::FusedTimeStep | Phase::PlotAndFusedTimeStep if solver.is_computing(section) => {
                solver.synchronise_time_stepping(store.descriptor_mut(key)?);
                let status = store.descriptor(key)?.limiter_status;
                if solver.kind() == SolverKind::Limiting && status.needs_recomputation() {
                    solver.recompute_solution(store, key)?;
                } else {
                    solver.update_solution(store, key)?;
                }
                solver.update_limiter_status(store, key, finest)?;
                advance_patch_time_step(solver, store, key)?;
                solver.evaluate_refinement(store, key, coarsest)?;
                if accuracy > 0.0 {
                    store.compress_solution(key, accuracy, background)?;
                }
            }
            Phase::SolutionUpdate if solver.is_computing(section) => {
                solver.synchronise_time_stepping(store.descriptor_mut(key)?);
                solver.update_solution(store, key)?;
            }
            Phase::PredictionAndFusedTimeSteppingInitialisation
            | Phase::PredictionAndFusedTimeSteppingInitialisationAndPlot
            | Phase::Prediction
            | Phase::PredictionAndPlot => {
                solver.synchronise_time_stepping(store.descriptor_mut(key)?);
            }
            Phase::PredictionRerun if solver.requests().stability_condition_violated() => {
                solver.synchronise_time_stepping(store.descriptor_mut(key)?);
            }
            Phase::FinaliseMeshRefinementAndReinitialisation => {
                if solver.ensure_necessary_memory(store, key)? {
                    solver.synchronise_time_stepping(store.descriptor_mut(key)?);
                    solver.set_initial_conditions(store, key)?;
                } else if solver.requests().global_recomputation() {
                    solver.rollback_solution(store, key)?;
                    solver.synchronise_time_stepping(store.descriptor_mut(key)?);
                }
            }
            Phase::LocalRecomputationAndTimeStepSizeComputation => {
                recompute_troubled_patch(solver, store, key)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Advance the patch stamp and fold its admissible step size and extent into
/// the solver's next-step fields.
fn advance_patch_time_step<const D: usize>(
    solver: &mut Solver<D>,
    store: &mut PatchStore<D>,
    key: PatchKey,
) -> Result<(), EngineError> {
    let admissible = solver.start_new_time_step_for_patch(store, key)?;
    let h = extent(&store.descriptor(key)?.size);
    let state = solver.state_mut();
    state.update_min_next_time_step_size(admissible);
    state.update_next_cell_size(h);
    Ok(())
}

/// Redo the last step of a troubled patch (or a neighbour of one) with the
/// fallback scheme, starting from the data before that step.
fn recompute_troubled_patch<const D: usize>(
    solver: &mut Solver<D>,
    store: &mut PatchStore<D>,
    key: PatchKey,
) -> Result<(), EngineError> {
    let d = store.descriptor(key)?;
    if solver.kind() != SolverKind::Limiting
        || !solver.requests().local_recomputation()
        || !d.limiter_status.needs_recomputation()
        || !d.kind.holds_field_data()
    {
        return Ok(());
    }
    solver.rollback_solution(store, key)?;
    let state = solver.state();
    let (stamp, dt) = (
        state.min_time_stamp() - state.previous_min_time_step_size(),
        state.previous_min_time_step_size(),
    );
    let d = store.descriptor_mut(key)?;
    d.time_stamp = stamp;
    d.time_step_size = dt;
    solver.recompute_solution(store, key)?;
    let admissible = solver.start_new_time_step_for_patch(store, key)?;
    solver.state_mut().update_min_next_time_step_size(admissible);
    Ok(())
}

fn extent<const D: usize>(size: &[f64; D]) -> f64 {
    size.iter().copied().fold(0.0, f64::max)
}

/// Start the solver-global time step, reduce it across ranks and flag
/// stability violations.
///
/// The violation check compares the reduced step size every rank adopted
/// with the one all ranks just used, so every rank reaches the same verdict.
/// Iterations that skip the reduction are not checked; the batch's closing
/// reduction is.
pub fn end_iteration<C: Communicator, const D: usize>(
    ctx: &mut SimulationContext<C, D>,
    phase: Phase,
    skip_reduction: bool,
) -> Result<(), EngineError> {
    let coordinator = ctx.config().coordinator_rank;
    let (solvers, _, messenger) = ctx.parts_mut();
    for solver in solvers.iter_mut() {
        if phase.starts_new_time_step() {
            if skip_reduction {
                solver.state_mut().start_new_time_step()?;
            } else {
                let id = solver.id();
                reduce_and_broadcast(solver.state_mut(), messenger, id, coordinator)?;
            }
        }
        if phase.is_time_stepping() && !skip_reduction {
            let (admissible, used) = (
                solver.state().min_time_step_size(),
                solver.state().previous_min_time_step_size(),
            );
            if used.is_finite() && smaller(admissible, used) {
                warn!(
                    "{}: stability condition violated: admissible dt={admissible:e} below used dt={used:e}",
                    solver.identifier()
                );
                solver.requests_mut().set_stability_condition_violated(true);
            }
        }
        if phase == Phase::PredictionRerun {
            solver.requests_mut().set_stability_condition_violated(false);
        }
    }
    if phase.plots() {
        debug!("plot requested by {phase:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::{RunConfig, SolverSpec};
    use crate::geometry::Face;
    use crate::solver::{Discretization, PatchView};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 0.1 on the first call, 0.05 afterwards.
    #[derive(Default)]
    struct Shrinking(AtomicUsize);

    impl Discretization<1> for Shrinking {
        fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, 1>) -> f64 {
            if self.0.fetch_add(1, Ordering::Relaxed) == 0 { 0.1 } else { 0.05 }
        }
        fn solution_update(&self, _luh: &mut [f64], _prev: &[f64], _p: &PatchView<'_, 1>) -> f64 {
            f64::INFINITY
        }
        fn boundary_conditions(&self, out: &mut [f64], inside: &[f64], _p: &PatchView<'_, 1>, _f: Face) {
            out.copy_from_slice(inside);
        }
    }

    fn ctx() -> SimulationContext<NoComm, 1> {
        let mut ctx = SimulationContext::new(RunConfig::default(), NoComm, [0.0], [1.0]).unwrap();
        ctx.register_solver(SolverSpec::default(), Box::new(Shrinking::default())).unwrap();
        ctx.init_solvers(0.0);
        ctx
    }

    fn visit(ctx: &mut SimulationContext<NoComm, 1>) -> CellVisit<1> {
        CellVisit {
            cell: ctx.store_mut().create_cell(),
            position: [0],
            offset: [0.0],
            size: [1.0],
            level: 0,
        }
    }

    fn run(ctx: &mut SimulationContext<NoComm, 1>, phase: Phase, v: &CellVisit<1>) {
        begin_iteration(ctx, phase).unwrap();
        merge_with_boundary(ctx, phase, v, [-1]).unwrap();
        merge_with_boundary(ctx, phase, v, [1]).unwrap();
        enter_cell(ctx, phase, v).unwrap();
        end_iteration(ctx, phase, false).unwrap();
    }

    #[test]
    fn mesh_refinement_creates_and_allocates() {
        let mut ctx = ctx();
        let v = visit(&mut ctx);
        run(&mut ctx, Phase::MeshRefinement, &v);
        assert_eq!(ctx.store().patch_count(), 1);
        assert_eq!(ctx.store().live_buffers(), 2);
        assert!(ctx.one_solver_has_not_attained_stable_state());
        run(&mut ctx, Phase::MeshRefinement, &v);
        assert!(!ctx.one_solver_has_not_attained_stable_state());
    }

    #[test]
    fn shrinking_step_flags_violation_until_rerun() {
        let mut ctx = ctx();
        let v = visit(&mut ctx);
        run(&mut ctx, Phase::MeshRefinement, &v);
        run(&mut ctx, Phase::FinaliseMeshRefinementAndTimeStepSizeComputation, &v);
        assert_eq!(ctx.min_time_step_size(), 0.1);
        run(&mut ctx, Phase::FusedTimeStep, &v);
        assert!(ctx.stability_condition_violated());
        assert_eq!(ctx.min_time_step_size(), 0.05);
        assert_eq!(ctx.min_time_stamp(), 0.1);
        run(&mut ctx, Phase::PredictionRerun, &v);
        assert!(!ctx.stability_condition_violated());
        assert_eq!(ctx.min_time_stamp(), 0.1);
    }

    #[test]
    fn batched_fixed_steps_skip_all_but_last_reduction() {
        let mut ctx = SimulationContext::<NoComm, 1>::new(
            RunConfig {
                skip_reduction_in_batched_time_steps: true,
                ..RunConfig::default()
            },
            NoComm,
            [0.0],
            [1.0],
        )
        .unwrap();
        let spec = SolverSpec {
            time_stepping: TimeStepping::GlobalFixed,
            ..SolverSpec::default()
        };
        ctx.register_solver(spec, Box::new(Shrinking::default())).unwrap();
        assert!(reduction_skipped(&ctx, Phase::FusedTimeStep, 0, 3));
        assert!(!reduction_skipped(&ctx, Phase::FusedTimeStep, 2, 3));
        assert!(!reduction_skipped(&ctx, Phase::TimeStepSizeComputation, 0, 3));
    }

    #[test]
    fn face_data_gating() {
        assert!(exchanges_face_data(Phase::FusedTimeStep));
        assert!(!exchanges_face_data(Phase::MeshRefinement));
        assert!(!exchanges_remote_face_data(Phase::FusedTimeStep, false));
        assert!(exchanges_remote_face_data(Phase::PlotAndFusedTimeStep, true));
        assert!(exchanges_remote_face_data(Phase::PredictionRerun, false));
        assert!(!exchanges_remote_face_data(Phase::MeshRefinement, true));
    }
}
