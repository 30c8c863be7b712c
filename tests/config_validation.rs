mod util;
use util::*;

use amr_stepper::prelude::*;

#[test]
fn run_config_round_trips_through_json() {
    let config = RunConfig {
        end_time: 2.5,
        fuse_algorithmic_steps: false,
        plot_interval: Some(0.5),
        message_timeout_ms: 250,
        ..RunConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: RunConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
    assert_eq!(back.message_timeout().as_millis(), 250);
}

#[test]
fn missing_fields_take_their_defaults() {
    let config: RunConfig = serde_json::from_str(r#"{ "end_time": 3.0 }"#).unwrap();
    assert_eq!(config.end_time, 3.0);
    assert!(config.fuse_algorithmic_steps);
    assert_eq!(config.plot_interval, None);

    let spec: SolverSpec = serde_json::from_str(
        r#"{ "identifier": "euler", "kind": "Limiting", "variables": 5, "time_stepping": "GlobalFixed" }"#,
    )
    .unwrap();
    assert_eq!(spec.kind, SolverKind::Limiting);
    assert_eq!(spec.time_stepping, TimeStepping::GlobalFixed);
    assert_eq!(spec.nodes_per_axis, SolverSpec::default().nodes_per_axis);
    spec.validate().unwrap();
}

#[test]
fn compression_needs_fused_steps() {
    let config = RunConfig {
        fuse_algorithmic_steps: false,
        compression_accuracy: 1e-3,
        ..RunConfig::default()
    };
    let err = config.validate(&[SolverSpec::default()]).unwrap_err();
    assert!(matches!(err, EngineError::ContradictoryConfig(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn context_rejects_what_the_run_cannot_start_with() {
    let empty = SimulationContext::<NoComm, 2>::new(RunConfig::default(), NoComm, [0.0; 2], [1.0; 2]).unwrap();
    assert!(matches!(
        empty.validate(),
        Err(EngineError::InvalidConfig { field: "solvers", .. })
    ));

    let mut flat = SimulationContext::<NoComm, 2>::new(RunConfig::default(), NoComm, [0.0; 2], [1.0, 0.0]).unwrap();
    flat.register_solver(SolverSpec::default(), Box::new(Drift { dt: 0.1 })).unwrap();
    assert!(matches!(
        flat.validate(),
        Err(EngineError::InvalidConfig { field: "domain_size", .. })
    ));

    let config = RunConfig {
        coordinator_rank: 1,
        ..RunConfig::default()
    };
    let mut lonely = SimulationContext::<NoComm, 1>::new(config, NoComm, [0.0], [1.0]).unwrap();
    lonely.register_solver(spec_1d(4, 1), Box::new(Drift { dt: 0.1 })).unwrap();
    assert!(matches!(
        lonely.validate(),
        Err(EngineError::InvalidConfig { field: "coordinator_rank", .. })
    ));
}

#[test]
fn invalid_solver_spec_is_rejected_on_registration() {
    let mut ctx = SimulationContext::<NoComm, 1>::new(RunConfig::default(), NoComm, [0.0], [1.0]).unwrap();
    let err = ctx
        .register_solver(spec_1d(2, 3), Box::new(Drift { dt: 0.1 }))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig { field: "ghost_layer_width", .. }));
    assert!(ctx.solvers().is_empty());
}
