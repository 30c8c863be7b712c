mod util;
use util::*;

use amr_stepper::prelude::*;
use amr_stepper::solver::time_step::StepperState;
use proptest::prelude::*;

proptest! {
    #[test]
    fn stamps_never_decrease(sizes in prop::collection::vec(0.0f64..1.0, 1..32)) {
        let mut s = TimeStepState::new(TimeStepping::Global);
        s.initialise(0.0);
        let mut last = s.min_time_stamp();
        let mut total = 0.0;
        for dt in sizes {
            s.begin_phase().unwrap();
            s.update_min_next_time_step_size(dt);
            total += s.min_time_step_size();
            s.start_new_time_step().unwrap();
            prop_assert!(s.min_time_stamp() >= last);
            prop_assert_eq!(s.min_time_step_size(), dt);
            last = s.min_time_stamp();
        }
        prop_assert!((last - total).abs() < 1e-9);
    }

    #[test]
    fn rollback_undoes_exactly_one_step(
        first in 0.01f64..1.0,
        second in 0.01f64..1.0,
        third in 0.01f64..1.0,
    ) {
        let mut s = TimeStepState::new(TimeStepping::Global);
        s.initialise(0.0);
        for dt in [first, second, third] {
            s.update_min_next_time_step_size(dt);
            s.start_new_time_step().unwrap();
        }
        // stamp = first + second, current = third, previous = second
        let before = s.clone();
        s.rollback_to_previous_time_step().unwrap();
        prop_assert!((s.min_time_stamp() - first).abs() < 1e-12);
        prop_assert_eq!(s.min_time_step_size(), before.previous_min_time_step_size());
        prop_assert_eq!(s.stepper(), StepperState::RolledBack);
    }
}

#[test]
fn patches_follow_the_solver_state() {
    let mut solver =
        Solver::<1>::new(SolverId::new(0), &spec_1d(4, 1), Box::new(Drift { dt: 0.2 })).unwrap();
    let mut store = store::<1>();
    let key = cell_patch(&mut store, &solver, [0.0]);

    solver.state_mut().initialise(0.0);
    solver.state_mut().update_min_next_time_step_size(0.2);
    solver.state_mut().start_new_time_step().unwrap();
    solver.synchronise_time_stepping(store.descriptor_mut(key).unwrap());
    let d = store.descriptor(key).unwrap();
    assert_eq!((d.time_stamp, d.time_step_size), (0.0, 0.2));

    solver.update_solution(&mut store, key).unwrap();
    let admissible = solver.start_new_time_step_for_patch(&mut store, key).unwrap();
    assert_eq!(admissible, 0.2);
    let d = store.descriptor(key).unwrap();
    assert!((d.time_stamp - 0.2).abs() < 1e-12);
    assert_eq!(d.previous_time_step_size, 0.2);

    solver.rollback_patch_to_previous_time_step(store.descriptor_mut(key).unwrap());
    let d = store.descriptor(key).unwrap();
    assert_eq!(d.time_stamp, 0.0);
    assert!(d.previous_time_step_size.is_infinite());

    solver.rollback_solution(&mut store, key).unwrap();
    let values = store.with_solution(key, |u| interior_1d(solver.layout(), u)).unwrap();
    assert_eq!(values, vec![0.0; 4]);
}

#[test]
fn empty_patches_report_no_admissible_step() {
    let solver =
        Solver::<1>::new(SolverId::new(0), &spec_1d(4, 1), Box::new(Drift { dt: 0.2 })).unwrap();
    let mut store = store::<1>();
    let cell = store.create_cell();
    let key = store
        .add_descriptor(cell, solver.id(), CellKind::EmptyAncestor, 0, ParentRef::Invalid, [1.0], [0.0])
        .unwrap();
    assert!(solver.start_new_time_step_for_patch(&mut store, key).unwrap().is_infinite());
    solver.update_solution(&mut store, key).unwrap();
}
