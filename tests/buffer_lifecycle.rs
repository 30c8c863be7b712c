mod util;
use util::*;

use std::sync::Arc;

use amr_stepper::prelude::*;

fn drift_solver() -> Solver<1> {
    Solver::new(SolverId::new(0), &spec_1d(4, 1), Box::new(Drift { dt: 0.1 })).unwrap()
}

#[test]
fn released_handles_go_stale_when_the_slot_is_reused() {
    let solver = drift_solver();
    let mut store = store::<1>();
    let first = cell_patch(&mut store, &solver, [0.0]);
    let stale = store.descriptor(first).unwrap().solution;

    assert!(store.release_buffers(first).unwrap());
    assert!(!store.release_buffers(first).unwrap());
    assert!(!store.descriptor(first).unwrap().has_buffers());

    let second = cell_patch(&mut store, &solver, [1.0]);
    let fresh = store.descriptor(second).unwrap().solution;
    assert_eq!(fresh.index(), stale.index());
    assert!(matches!(
        store.with_buffer(stale, |u| u.len()),
        Err(EngineError::InvalidBufferHandle(_))
    ));
    assert_eq!(store.with_buffer(fresh, |u| u.len()).unwrap(), solver.layout().buffer_len());
    store.validate_invariants().unwrap();
}

#[test]
fn memory_follows_the_cell_kind() {
    let solver = drift_solver();
    let mut store = store::<1>();

    let cell = store.create_cell();
    let ancestor = store
        .add_descriptor(cell, solver.id(), CellKind::Ancestor, 0, ParentRef::Invalid, [1.0], [0.0])
        .unwrap();
    assert!(!solver.ensure_necessary_memory(&mut store, ancestor).unwrap());
    assert_eq!(store.live_buffers(), 0);

    let leaf = cell_patch(&mut store, &solver, [1.0]);
    assert!(!solver.ensure_necessary_memory(&mut store, leaf).unwrap());
    assert_eq!(store.live_buffers(), 2);

    // coarsening turns the leaf into a placeholder that must not keep memory
    store.descriptor_mut(leaf).unwrap().kind = CellKind::Erased;
    store.ensure_no_unnecessary_memory(leaf).unwrap();
    assert_eq!(store.live_buffers(), 0);
    assert!(!store.allocate_buffers(leaf, 8).unwrap());
    store.validate_invariants().unwrap();

    assert_eq!(store.erase_descriptors(cell).unwrap(), 1);
    store.remove_cell(leaf.cell).unwrap();
    assert_eq!(store.patch_count(), 0);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "unsupported cell kind")]
fn allocating_for_a_descendant_is_a_bug() {
    let mut store = store::<1>();
    let cell = store.create_cell();
    let key = store
        .add_descriptor(cell, SolverId::new(0), CellKind::Descendant, 1, ParentRef::Remote, [1.0], [0.0])
        .unwrap();
    let _ = store.allocate_buffers(key, 8);
}

#[test]
fn background_compression_finishes_before_buffers_move() {
    let tasks = Arc::new(BackgroundTasks::new(2).unwrap());
    let mut store = PatchStore::<1>::new(Arc::clone(&tasks));
    let solver = drift_solver();
    let keys: Vec<_> = (0..16)
        .map(|i| {
            let k = cell_patch(&mut store, &solver, [i as f64]);
            store
                .with_solution_mut(k, |u| {
                    u.iter_mut().enumerate().for_each(|(j, v)| *v = i as f64 + 0.01 * j as f64)
                })
                .unwrap();
            k
        })
        .collect();

    for &k in &keys {
        store.compress_solution(k, 1e-3, true).unwrap();
    }
    tasks.wait_until_quiescent();
    assert_eq!(tasks.in_flight(), 0);

    for &k in &keys {
        let original = store.with_solution(k, |u| u.to_vec()).unwrap();
        let snapshot = store.compressed_solution(k).unwrap().unwrap();
        assert_eq!(snapshot.len(), original.len());
        for (a, b) in snapshot.decompress().iter().zip(&original) {
            assert!((a - b).abs() <= 0.5e-3 + 1e-12);
        }
    }
    assert!(store.compressed_bytes() > 0);

    // releasing drops the snapshot together with the buffer
    store.release_buffers(keys[0]).unwrap();
    assert!(store.compressed_solution(keys[0]).unwrap().is_none());
    store.validate_invariants().unwrap();
}

#[test]
fn compressing_runs_keep_snapshots_of_every_patch() {
    let config = RunConfig {
        compression_accuracy: 1e-6,
        spawn_compression_as_background_task: true,
        background_threads: 2,
        ..RunConfig::default()
    };
    let mut ctx = SimulationContext::new(config, NoComm, [0.0], [1.0]).unwrap();
    let spec = SolverSpec {
        maximum_mesh_size: 0.4,
        ..spec_1d(4, 1)
    };
    ctx.register_solver(spec, Box::new(Drift { dt: 0.25 })).unwrap();
    Runner::new(UniformGrid::<1>::new()).run(&mut ctx).unwrap();

    assert_eq!(ctx.tasks().in_flight(), 0);
    for key in ctx.store().patch_keys() {
        let snapshot = ctx.store().compressed_solution(key).unwrap().unwrap();
        let current = ctx.store().with_solution(key, |u| u.to_vec()).unwrap();
        for (a, b) in snapshot.decompress().iter().zip(&current) {
            assert!((a - b).abs() <= 1e-6);
        }
    }
}
