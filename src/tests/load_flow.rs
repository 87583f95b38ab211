use super::{assert_near, FailingMatrixFactory, RecordingObserver};
use crate::cases;
use crate::initializer::VoltageInitMode;
use crate::load_flow::{AcLoadFlowContext, AcLoadFlowEngine, AcLoadFlowStatus};
use crate::network::Network;
use crate::parameters::{AcLoadFlowParameters, AcLoadFlowParametersBuilder};
use std::rc::Rc;

#[test]
fn two_bus_load_flow() {
    let mut context =
        AcLoadFlowContext::new(cases::two_bus(), AcLoadFlowParameters::default()).unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    assert_eq!(result.outer_iterations, 0);
    assert_eq!(result.newton_raphson_iterations, 3);
    assert_near(context.network().buses[1].v, 0.85539, 1e-4);
    assert!(context.result().is_some());

    let system = context.equation_system().unwrap();
    assert_eq!(system.equations().filter(|eq| eq.is_active()).count(), 4);
}

#[test]
fn observer_events_follow_the_solve() {
    let recorder = RecordingObserver::default();
    let mut context =
        AcLoadFlowContext::new(cases::two_bus(), AcLoadFlowParameters::default()).unwrap();
    AcLoadFlowEngine::new(&mut context)
        .add_observer(Box::new(recorder.clone()))
        .run()
        .unwrap();

    let events = recorder.events.borrow();
    let expected_start = [
        "before_equation_system_creation",
        "after_equation_system_creation(4, 4)",
        "before_voltage_initializer_preparation",
        "after_voltage_initializer_preparation",
        "begin_iteration(1)",
        "before_lu_decomposition(1)",
        "after_lu_decomposition(1)",
        "end_iteration(1)",
        "begin_iteration(2)",
    ];
    assert_eq!(&events[..expected_start.len()], &expected_start[..]);
    assert_eq!(events.last().map(String::as_str), Some("end_iteration(3)"));
    assert_eq!(recorder.norms.borrow().len(), 4);
}

#[test]
fn outer_loop_bodies_are_observed() {
    let recorder = RecordingObserver::default();
    let parameters = AcLoadFlowParametersBuilder::default()
        .outer_loop_names(vec![
            "DistributedSlack".to_string(),
            "ReactiveLimits".to_string(),
        ])
        .build()
        .unwrap();
    let mut context = AcLoadFlowContext::new(cases::ieee14(), parameters).unwrap();
    let result = AcLoadFlowEngine::new(&mut context)
        .add_observer(Box::new(recorder.clone()))
        .run()
        .unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    let events = recorder.events.borrow();
    let bodies: Vec<&String> = events
        .iter()
        .filter(|e| e.starts_with("before_outer_loop_body"))
        .collect();
    assert_eq!(
        bodies,
        vec![
            "before_outer_loop_body(0, DistributedSlack)",
            "before_outer_loop_body(0, ReactiveLimits)",
        ]
    );
}

#[test]
fn second_run_starts_from_the_previous_solution() {
    let mut context =
        AcLoadFlowContext::new(cases::ieee14(), AcLoadFlowParameters::default()).unwrap();
    let first = AcLoadFlowEngine::new(&mut context).run().unwrap();
    assert!(first.newton_raphson_iterations >= 3);

    let second = AcLoadFlowEngine::new(&mut context).run().unwrap();
    assert_eq!(second.status, AcLoadFlowStatus::Converged);
    assert_eq!(second.newton_raphson_iterations, 0);

    let third = AcLoadFlowEngine::new(&mut context).reinitialize().run().unwrap();
    assert_eq!(third.newton_raphson_iterations, first.newton_raphson_iterations);
}

#[test]
fn dc_voltage_initialization() {
    let parameters = AcLoadFlowParametersBuilder::default()
        .voltage_init_mode(VoltageInitMode::Dc)
        .build()
        .unwrap();
    let mut context = AcLoadFlowContext::new(cases::ieee14(), parameters).unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    assert!(result.newton_raphson_iterations <= 5);
    assert_near(context.network().buses[13].v, 1.036, 0.001);
}

#[test]
fn solver_failure_leaves_the_network_unsolved() {
    let context =
        AcLoadFlowContext::new(cases::ieee14(), AcLoadFlowParameters::default()).unwrap();
    let mut context = context.with_matrix_factory(Rc::new(FailingMatrixFactory));
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::SolverFailed);
    assert!(result.slack_bus_active_power_mismatch.is_nan());
    let network = context.into_network();
    assert!(network.buses.iter().all(|b| b.v.is_nan() && b.angle.is_nan()));
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut parameters = AcLoadFlowParameters::default();
    parameters.outer_loop_names = vec!["VoltageMonitoring".to_string()];
    let err = match AcLoadFlowContext::new(cases::two_bus(), parameters) {
        Ok(_) => panic!("unknown outer loop accepted"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("unknown outer loop 'VoltageMonitoring'"));

    let err = AcLoadFlowParametersBuilder::default()
        .max_outer_iterations(0)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("max_outer_iterations must be >= 1"));
}

#[test]
fn invalid_network_is_rejected() {
    let mut network = Network::new("empty");
    assert!(AcLoadFlowContext::new(network.clone(), AcLoadFlowParameters::default()).is_err());

    network = cases::two_bus();
    network.buses[1].slack = true;
    let err = match AcLoadFlowContext::new(network, AcLoadFlowParameters::default()) {
        Ok(_) => panic!("two slack buses accepted"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("exactly one slack bus"));
}
