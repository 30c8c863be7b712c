mod util;
use util::*;

use std::thread;
use std::time::Duration;

use amr_stepper::algs::exchange::remote::MergeOutcome;
use amr_stepper::traversal::mappings::{RemoteFace, merge_with_remote_neighbour, send_to_remote_neighbour};
use amr_stepper::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serial_test::serial;

const LOWER: Face = Face {
    normal: 0,
    positive: false,
};
const UPPER: Face = Face {
    normal: 0,
    positive: true,
};

/// Rank 0 owns the cell at position 0, rank 1 the one at position 1; they
/// share the face at x = 1.
fn face_of(rank: usize) -> RemoteFace<1> {
    let (local, remote) = if rank == 0 { ([0], [1]) } else { ([1], [0]) };
    RemoteFace {
        rank: 1 - rank,
        local,
        remote,
        x: [1.0],
        level: 0,
    }
}

fn rank_context(comm: RayonComm) -> SimulationContext<RayonComm, 1> {
    let mut ctx = SimulationContext::new(RunConfig::default(), comm, [0.0], [2.0]).unwrap();
    ctx.register_solver(spec_1d(4, 1), Box::new(Drift { dt: 0.1 })).unwrap();
    ctx.init_solvers(0.0);
    ctx
}

/// A fresh cell holding a patch of `kind`, or no cell at all for `None`.
fn add_cell(
    ctx: &mut SimulationContext<RayonComm, 1>,
    rank: usize,
    kind: Option<CellKind>,
) -> Option<CellIndex> {
    let kind = kind?;
    let offset = [rank as f64];
    let len = ctx.solvers()[0].layout().buffer_len();
    let store = ctx.store_mut();
    let cell = store.create_cell();
    let key = store
        .add_descriptor(cell, SolverId::new(0), kind, 0, ParentRef::Invalid, [1.0], offset)
        .unwrap();
    if kind == CellKind::Cell {
        store.allocate_buffers(key, len).unwrap();
        store.with_solution_mut(key, |u| u.fill(rank as f64 + 1.0)).unwrap();
    }
    Some(cell)
}

fn random_kind(rng: &mut SmallRng) -> Option<CellKind> {
    match rng.gen_range(0..4) {
        0 => None,
        1 => Some(CellKind::Ancestor),
        2 => Some(CellKind::EmptyDescendant),
        _ => Some(CellKind::Cell),
    }
}

fn expected_outcome(sender: Option<CellKind>, receiver: Option<CellKind>) -> MergeOutcome {
    match (sender == Some(CellKind::Cell), receiver == Some(CellKind::Cell)) {
        (false, _) => MergeOutcome::Skipped,
        (true, true) => MergeOutcome::Merged,
        (true, false) => MergeOutcome::Dropped,
    }
}

#[test]
#[serial]
fn ghost_layers_cross_the_rank_boundary() {
    let world = RayonComm::world(2);
    let mailbox = world[0].clone();
    let ghosts: Vec<Vec<f64>> = thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                s.spawn(move || {
                    let mut ctx = rank_context(comm);
                    let cell = add_cell(&mut ctx, rank, Some(CellKind::Cell));
                    let face = face_of(rank);
                    send_to_remote_neighbour(&ctx, Phase::NeighbourDataMerging, true, cell, &face).unwrap();
                    let outcomes =
                        merge_with_remote_neighbour(&mut ctx, Phase::NeighbourDataMerging, true, cell, &face)
                            .unwrap();
                    assert_eq!(outcomes, vec![MergeOutcome::Merged]);

                    let messenger = ctx.messenger();
                    for ty in [MessageType::NeighbourMetadata, MessageType::NeighbourData] {
                        let c = messenger.counters(ty);
                        assert_eq!((c.data_sent, c.empty_sent, c.received, c.dropped), (1, 0, 1, 0));
                    }

                    let key = ctx.store().patch_keys()[0];
                    let d = ctx.store().descriptor(key).unwrap();
                    let shared = if rank == 0 { UPPER } else { LOWER };
                    assert!(d.neighbour_merge_performed(shared));
                    assert_eq!(d.time_step_size, ctx.solvers()[0].state().min_time_step_size());
                    let layout = ctx.solvers()[0].layout();
                    ctx.store()
                        .with_solution(key, |u| layout.read_ghost_layer(u, shared))
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(ghosts[0], vec![2.0]);
    assert_eq!(ghosts[1], vec![1.0]);
    assert_eq!(mailbox.pending(), 0);
}

#[test]
#[serial]
fn every_send_is_consumed_whatever_the_patch_kinds() {
    const ROUNDS: usize = 40;
    const SEED: u64 = 0x5eed;
    let world = RayonComm::world(2);
    let mailbox = world[0].clone();
    thread::scope(|s| {
        for (rank, comm) in world.into_iter().enumerate() {
            s.spawn(move || {
                // both ranks draw the same sequence of kind pairs
                let mut rng = SmallRng::seed_from_u64(SEED);
                let mut ctx = rank_context(comm);
                let face = face_of(rank);
                for _ in 0..ROUNDS {
                    let kinds = [random_kind(&mut rng), random_kind(&mut rng)];
                    let cell = add_cell(&mut ctx, rank, kinds[rank]);
                    send_to_remote_neighbour(&ctx, Phase::PredictionRerun, true, cell, &face).unwrap();
                    let outcomes =
                        merge_with_remote_neighbour(&mut ctx, Phase::PredictionRerun, true, cell, &face)
                            .unwrap();
                    assert_eq!(outcomes, vec![expected_outcome(kinds[1 - rank], kinds[rank])]);
                }

                let messenger = ctx.messenger();
                for ty in [MessageType::NeighbourMetadata, MessageType::NeighbourData] {
                    let c = messenger.counters(ty);
                    assert_eq!(c.sent(), ROUNDS);
                    assert_eq!(c.consumed(), ROUNDS);
                }
                ctx.store().validate_invariants().unwrap();
            });
        }
    });
    assert_eq!(mailbox.pending(), 0);
}

#[test]
#[serial]
fn phases_that_disagree_about_data_desynchronise() {
    let world = RayonComm::world(2);
    let results: Vec<Result<Vec<MergeOutcome>, EngineError>> = thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                s.spawn(move || {
                    let mut ctx = rank_context(comm.with_timeout(Duration::from_millis(500)));
                    let cell = add_cell(&mut ctx, rank, Some(CellKind::Cell));
                    let face = face_of(rank);
                    // rank 0 believes data is dropped this phase, rank 1 merges it
                    let phase = if rank == 0 {
                        Phase::NeighbourDataDropping
                    } else {
                        Phase::NeighbourDataMerging
                    };
                    send_to_remote_neighbour(&ctx, phase, true, cell, &face).unwrap();
                    merge_with_remote_neighbour(&mut ctx, phase, true, cell, &face)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results[0].as_ref().unwrap(), &vec![MergeOutcome::Skipped]);
    let err = results[1].as_ref().unwrap_err();
    assert!(matches!(err, EngineError::ProtocolDesync { neighbor: 0, .. }));
    assert!(err.is_fatal());
}

#[test]
#[serial]
fn missing_counterpart_times_out() {
    let mut world = RayonComm::world(2);
    let comm = world.pop().unwrap().with_timeout(Duration::from_millis(50));
    let mut ctx = rank_context(comm);
    let cell = add_cell(&mut ctx, 1, Some(CellKind::Cell));
    let err = merge_with_remote_neighbour(&mut ctx, Phase::PredictionRerun, true, cell, &face_of(1))
        .unwrap_err();
    assert!(matches!(err, EngineError::CommError { neighbor: 0, .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
#[serial]
fn mismatched_face_coordinates_are_detected() {
    let world = RayonComm::world(2);
    let mut ranks = world.into_iter().map(rank_context);
    let sender = ranks.next().unwrap();
    let mut receiver = ranks.next().unwrap();

    send_to_remote_neighbour(&sender, Phase::PredictionRerun, true, None, &face_of(0)).unwrap();
    let mut face = face_of(1);
    face.x = [1.5];
    let err = merge_with_remote_neighbour(&mut receiver, Phase::PredictionRerun, true, None, &face)
        .unwrap_err();
    assert!(matches!(err, EngineError::ProtocolDesync { neighbor: 0, .. }));
}
