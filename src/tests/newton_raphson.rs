use super::{assert_near, FailingMatrixFactory, RecordingObserver};
use crate::ac_system::{create_ac_equation_system, AcEquationSystemParameters};
use crate::cases;
use crate::equation::{EquationId, EquationType};
use crate::initializer::{
    DcValueVoltageInitializer, PreviousValueVoltageInitializer, UniformValueVoltageInitializer,
};
use crate::matrix::SparseMatrixFactory;
use crate::newton_raphson::{NewtonRaphson, NewtonRaphsonStatus};
use crate::observer::MultipleAcLoadFlowObserver;
use crate::parameters::{NewtonRaphsonParameters, NewtonRaphsonParametersBuilder};
use crate::variable::{Variable, VariableType};
use std::rc::Rc;

fn newton_raphson(parameters: &NewtonRaphsonParameters) -> NewtonRaphson {
    NewtonRaphson::new(parameters, Rc::new(SparseMatrixFactory::default()))
}

#[test]
fn two_bus_converges_in_three_iterations() {
    let mut network = cases::two_bus();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = newton_raphson(&NewtonRaphsonParameters::default());
    let recorder = RecordingObserver::default();
    let mut observer = recorder.clone();

    let result = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut observer,
        )
        .unwrap();

    assert_eq!(result.status, NewtonRaphsonStatus::Converged);
    assert_eq!(result.iterations, 3);
    assert_eq!(nr.status(), NewtonRaphsonStatus::Converged);

    let b2 = &network.buses[1];
    assert_near(b2.v, 0.85539, 1e-4);
    assert_near(b2.angle.to_degrees(), -13.5209, 1e-3);
    assert_near(network.buses[0].v, 1.0, 1e-9);
    assert_near(network.buses[0].angle, 0.0, 1e-9);

    let br = &network.branches[0];
    assert_near(br.p1, 2.0, 1e-3);
    assert_near(br.q1, 1.6831, 1e-3);
    assert_near(br.p2, -2.0, 1e-3);
    assert_near(br.q2, -1.0, 1e-3);

    // the slack generator supplies the load
    assert_near(result.slack_bus_active_power_mismatch, 2.0, 1e-3);
    assert_near(network.generators[0].p, 2.0, 1e-3);

    let norms = recorder.norms.borrow();
    let iterations: Vec<usize> = norms.iter().map(|&(it, _)| it).collect();
    assert_eq!(iterations, vec![0, 1, 2, 3]);
    assert!(norms.windows(2).all(|w| w[1].1 < w[0].1));
    assert!(norms[3].1 < 2e-4);
}

#[test]
fn ieee14_converges() {
    let mut network = cases::ieee14();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = newton_raphson(&NewtonRaphsonParameters::default());
    let recorder = RecordingObserver::default();
    let mut observer = recorder.clone();

    let result = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut observer,
        )
        .unwrap();

    assert_eq!(result.status, NewtonRaphsonStatus::Converged);
    assert!(result.iterations <= 5);

    let norms = recorder.norms.borrow();
    let increases = norms.windows(2).filter(|w| w[1].1 > w[0].1).count();
    assert_eq!(increases, 0);

    assert_near(network.buses[1].angle.to_degrees(), -4.98, 0.01);
    assert_near(network.buses[13].v, 1.036, 0.001);
    assert_near(network.buses[13].angle.to_degrees(), -16.03, 0.01);
    assert_near(network.buses[8].v, 1.056, 0.001);

    // 232.4 MW scheduled at the slack bus
    assert_near(network.generators[0].p, 2.324, 1e-3);
    assert!(result.slack_bus_active_power_mismatch.abs() < 1e-3);
}

#[test]
fn dc_initialization_converges_to_the_same_solution() {
    let mut flat = cases::ieee14();
    let mut system =
        create_ac_equation_system(&flat, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = newton_raphson(&NewtonRaphsonParameters::default());
    nr.run(
        &mut system,
        &mut flat,
        &mut UniformValueVoltageInitializer,
        &mut MultipleAcLoadFlowObserver::default(),
    )
    .unwrap();

    let mut dc = cases::ieee14();
    let mut system =
        create_ac_equation_system(&dc, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = newton_raphson(&NewtonRaphsonParameters::default());
    let mut initializer = DcValueVoltageInitializer::default();
    let result = nr
        .run(
            &mut system,
            &mut dc,
            &mut initializer,
            &mut MultipleAcLoadFlowObserver::default(),
        )
        .unwrap();

    assert_eq!(result.status, NewtonRaphsonStatus::Converged);
    assert_eq!(initializer.angles().len(), 14);
    assert_eq!(initializer.angles()[0], 0.0);
    assert!(initializer.angles()[13] < -0.2);
    for (a, b) in flat.buses.iter().zip(dc.buses.iter()) {
        assert_near(a.v, b.v, 1e-3);
        assert_near(a.angle, b.angle, 1e-3);
    }
}

#[test]
fn warm_start_converges_immediately() {
    let mut network = cases::ieee14();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = newton_raphson(&NewtonRaphsonParameters::default());
    let mut observer = MultipleAcLoadFlowObserver::default();
    let first = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut observer,
        )
        .unwrap();

    let second = nr
        .run(
            &mut system,
            &mut network,
            &mut PreviousValueVoltageInitializer,
            &mut observer,
        )
        .unwrap();

    assert_eq!(second.status, NewtonRaphsonStatus::Converged);
    assert!(second.iterations <= 1);
    assert_eq!(nr.total_iterations(), first.iterations + second.iterations);
}

#[test]
fn iteration_limit() {
    let mut network = cases::ieee14();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let parameters = NewtonRaphsonParametersBuilder::default()
        .max_iterations(1)
        .build()
        .unwrap();
    let mut nr = newton_raphson(&parameters);

    let result = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut MultipleAcLoadFlowObserver::default(),
        )
        .unwrap();

    assert_eq!(result.status, NewtonRaphsonStatus::MaxIterationReached);
    assert_eq!(result.iterations, 1);
    assert!(result.slack_bus_active_power_mismatch.is_nan());
    // not written back
    assert!(network.buses[13].v.is_nan());
}

#[test]
fn decomposition_failure_stops_the_solve() {
    let mut network = cases::two_bus();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = NewtonRaphson::new(
        &NewtonRaphsonParameters::default(),
        Rc::new(FailingMatrixFactory),
    );
    let recorder = RecordingObserver::default();
    let mut observer = recorder.clone();

    let result = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut observer,
        )
        .unwrap();

    assert_eq!(result.status, NewtonRaphsonStatus::SolverFailed);
    assert_eq!(result.iterations, 1);
    assert!(network.buses[1].v.is_nan());
    assert!(network.branches[0].p1.is_nan());

    let events = recorder.events.borrow();
    assert!(events.contains(&"after_lu_decomposition(1)".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("end_iteration(1)"));
}

#[test]
fn sensitivities_require_an_unchanged_system() {
    let mut network = cases::three_bus();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = newton_raphson(&NewtonRaphsonParameters::default());
    nr.run(
        &mut system,
        &mut network,
        &mut UniformValueVoltageInitializer,
        &mut MultipleAcLoadFlowObserver::default(),
    )
    .unwrap();

    // dV2/dQ2: more reactive injection raises the load bus voltage
    let v2 = Variable {
        num: 2,
        kind: VariableType::BusV,
    };
    let q2 = EquationId {
        num: 2,
        kind: EquationType::BusQ,
    };
    let mut w = vec![0.0; 6];
    w[system.column(v2).unwrap()] = 1.0;
    nr.calculate_sensitivities(&mut system, &mut w).unwrap();
    let row = system.row(q2).unwrap();
    assert!(w[row] > 0.0);

    system.set_active(q2, false);
    let mut w = vec![0.0; 6];
    assert!(nr.calculate_sensitivities(&mut system, &mut w).is_err());
}
