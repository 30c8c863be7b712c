mod util;
use util::*;

use std::sync::atomic::Ordering;
use std::thread;

use amr_stepper::prelude::*;
use amr_stepper::traversal::mappings::end_iteration;
use serial_test::serial;

#[test]
fn shrinking_step_size_triggers_exactly_one_rerun() {
    let config = RunConfig {
        end_time: 0.5,
        ..RunConfig::default()
    };
    let mut ctx = SimulationContext::new(config, NoComm, [0.0], [1.0]).unwrap();
    let disc = Scheduled::new(vec![0.1, 0.1, 0.1, 0.05]);
    let calls = disc.calls.clone();
    ctx.register_solver(spec_1d(4, 1), Box::new(disc)).unwrap();

    let mut runner = Runner::new(UniformGrid::<1>::new());
    let summary = runner.run(&mut ctx).unwrap();

    assert_eq!(summary.prediction_reruns, 1);
    assert_eq!(
        Repository::<NoComm, 1>::iterations(runner.repository(), Phase::PredictionRerun),
        1
    );
    assert!(!ctx.stability_condition_violated());

    let expected = [0.1, 0.2, 0.3, 0.35, 0.4, 0.45, 0.5];
    assert_eq!(summary.time_stamps.len(), expected.len());
    for (t, e) in summary.time_stamps.iter().zip(expected) {
        assert!((t - e).abs() < 1e-12, "{t} != {e}");
    }
    assert!(summary.time_stamps.windows(2).all(|w| w[0] <= w[1]));
    assert!((summary.final_time_step_size - 0.05).abs() < 1e-12);
    // one admissibility query per step plus the initial one
    assert_eq!(calls.load(Ordering::Relaxed), 1 + expected.len());
}

#[test]
fn growing_step_size_is_not_a_violation() {
    let config = RunConfig {
        end_time: 0.3,
        ..RunConfig::default()
    };
    let mut ctx = SimulationContext::new(config, NoComm, [0.0], [1.0]).unwrap();
    ctx.register_solver(spec_1d(4, 1), Box::new(Scheduled::new(vec![0.1, 0.2])))
        .unwrap();

    let summary = Runner::new(UniformGrid::<1>::new()).run(&mut ctx).unwrap();
    assert_eq!(summary.prediction_reruns, 0);
    assert_eq!(summary.time_steps, 2);
    assert!((summary.final_time_stamp - 0.3).abs() < 1e-12);
}

#[test]
#[serial]
fn ranks_agree_on_a_violation_only_one_of_them_saw() {
    let world = RayonComm::world(2);
    let mailbox = world[0].clone();
    let verdicts: Vec<(bool, f64, f64)> = thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    let mut ctx = SimulationContext::new(RunConfig::default(), comm, [0.0], [1.0]).unwrap();
                    ctx.register_solver(spec_1d(4, 1), Box::new(Drift { dt: 0.1 })).unwrap();
                    ctx.init_solvers(0.0);
                    let state = ctx.solvers_mut()[0].state_mut();
                    state.update_min_next_time_step_size(0.1);
                    state.start_new_time_step().unwrap();

                    // only rank 1 finds a smaller admissible step
                    state.begin_phase().unwrap();
                    state.update_min_next_time_step_size(if rank == 0 { 0.2 } else { 0.05 });
                    end_iteration(&mut ctx, Phase::FusedTimeStep, false).unwrap();
                    (
                        ctx.stability_condition_violated(),
                        ctx.min_time_step_size(),
                        ctx.min_time_stamp(),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for (violated, dt, t) in verdicts {
        assert!(violated);
        assert_eq!(dt, 0.05);
        assert!((t - 0.1).abs() < 1e-12);
    }
    assert_eq!(mailbox.pending(), 0);
}
