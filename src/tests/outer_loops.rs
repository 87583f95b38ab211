use super::{assert_near, shunt_network, tap_changer_network};
use crate::ac_system::{create_ac_equation_system, AcEquationSystemParameters};
use crate::cases;
use crate::initializer::UniformValueVoltageInitializer;
use crate::load_flow::{AcLoadFlowContext, AcLoadFlowEngine, AcLoadFlowStatus};
use crate::matrix::SparseMatrixFactory;
use crate::network::Network;
use crate::newton_raphson::NewtonRaphson;
use crate::observer::MultipleAcLoadFlowObserver;
use crate::outer_loop::{
    OuterLoop, OuterLoopContext, OuterLoopStatus, ReactiveLimitsOuterLoop,
    TransformerVoltageControlOuterLoop,
};
use crate::parameters::{AcLoadFlowParameters, AcLoadFlowParametersBuilder};
use std::rc::Rc;

fn parameters(outer_loops: &[&str]) -> AcLoadFlowParameters {
    AcLoadFlowParametersBuilder::default()
        .outer_loop_names(outer_loops.iter().map(|s| s.to_string()).collect())
        .build()
        .unwrap()
}

fn three_bus_with_tight_reactive_limits() -> Network {
    let mut network = cases::three_bus();
    // unconstrained, the generator produces about 1.08 p.u.
    network.generators[1].min_q = -0.3;
    network.generators[1].max_q = 0.3;
    network
}

#[test]
fn reactive_limit_switches_bus_to_pq() {
    let mut context = AcLoadFlowContext::new(
        three_bus_with_tight_reactive_limits(),
        parameters(&["ReactiveLimits"]),
    )
    .unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    assert_eq!(result.outer_iterations, 1);

    let network = context.network();
    assert!(!network.buses[1].voltage_control_enabled);
    assert!(!network.is_voltage_controlled(1));
    assert_near(network.generators[1].q, 0.3, 1e-9);
    assert_near(network.buses[1].v, 1.0011, 1e-3);
    assert!(network.buses[1].v < 1.05);
}

#[test]
fn rerun_restores_voltage_control_of_switched_buses() {
    let network = three_bus_with_tight_reactive_limits();
    let target_q = network.generators[1].target_q;
    let mut context = AcLoadFlowContext::new(network, parameters(&["ReactiveLimits"])).unwrap();
    AcLoadFlowEngine::new(&mut context).run().unwrap();
    assert!(!context.network().buses[1].voltage_control_enabled);
    assert_near(context.network().generators[1].target_q, 0.3, 1e-12);

    let generator = &mut context.network_mut().generators[1];
    generator.min_q = -5.0;
    generator.max_q = 5.0;
    let result = AcLoadFlowEngine::new(&mut context)
        .reinitialize()
        .run()
        .unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    assert_eq!(result.outer_iterations, 0);
    let network = context.network();
    assert!(network.buses[1].voltage_control_enabled);
    assert!(network.is_voltage_controlled(1));
    assert_near(network.buses[1].v, 1.05, 1e-6);
    assert_near(network.generators[1].target_q, target_q, 1e-12);
    assert!(network.generators[1].q > 1.0);
}

#[test]
fn reactive_limits_are_ignored_without_the_outer_loop() {
    let mut context =
        AcLoadFlowContext::new(three_bus_with_tight_reactive_limits(), parameters(&[])).unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    assert_eq!(result.outer_iterations, 0);
    let network = context.network();
    assert_near(network.buses[1].v, 1.05, 1e-6);
    assert!(network.generators[1].q > 1.0);
}

#[test]
fn check_is_idempotent_until_the_next_solve() {
    let mut network = three_bus_with_tight_reactive_limits();
    let mut system =
        create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
    let mut nr = NewtonRaphson::new(
        &Default::default(),
        Rc::new(SparseMatrixFactory::default()),
    );
    let result = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut MultipleAcLoadFlowObserver::default(),
        )
        .unwrap();

    let mut outer_loop = ReactiveLimitsOuterLoop::new(2);
    outer_loop.initialize(&mut network).unwrap();
    let mut check = |network: &mut Network, nr: &mut NewtonRaphson, solve_count| {
        let mut context = OuterLoopContext {
            network,
            system: &mut system,
            newton_raphson: nr,
            last_result: result,
            outer_iteration: 0,
            solve_count,
        };
        outer_loop.check(&mut context).unwrap()
    };

    assert_eq!(check(&mut network, &mut nr, 1), OuterLoopStatus::Unstable);
    assert_eq!(check(&mut network, &mut nr, 1), OuterLoopStatus::Stable);
    assert!(!network.buses[1].voltage_control_enabled);
}

#[test]
fn distributed_slack_shares_the_mismatch() {
    let mut network = cases::three_bus();
    network.generators[0].participating = true;
    network.generators[0].participation_factor = 1.0;
    network.generators[1].participating = true;
    network.generators[1].participation_factor = 1.0;

    let mut context = AcLoadFlowContext::new(network, parameters(&["DistributedSlack"])).unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    assert!(result.outer_iterations >= 1);
    assert!(result.slack_bus_active_power_mismatch.abs() < 0.01);

    let network = context.network();
    let (g0, g1) = (&network.generators[0], &network.generators[1]);
    assert_near(g1.target_p - g0.target_p, 0.5, 1e-9);
    // load plus losses
    assert!(g0.target_p + g1.target_p > 1.0);
    assert_near(g0.p + g1.p, 1.0 + 0.0101, 2e-3);
}

#[test]
fn transformer_taps_regulate_voltage() {
    let mut context =
        AcLoadFlowContext::new(tap_changer_network(), parameters(&["TransformerVoltageControl"]))
            .unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    // 8 -> 11 (capped at 3 positions) -> 12
    assert_eq!(result.outer_iterations, 2);

    let network = context.network();
    let br = &network.branches[0];
    let tc = br.tap_changer.as_ref().unwrap();
    assert_eq!(tc.position, 12);
    assert_near(br.r1, 1.05, 1e-12);
    assert!((network.buses[1].v - 1.0).abs() <= 0.01);
}

#[test]
fn tap_shift_is_capped_per_outer_iteration() {
    let mut network = tap_changer_network();
    let mut system = create_ac_equation_system(
        &network,
        &AcEquationSystemParameters {
            transformer_ratio_variables: true,
            shunt_susceptance_variables: false,
        },
    )
    .unwrap();
    let mut nr = NewtonRaphson::new(
        &Default::default(),
        Rc::new(SparseMatrixFactory::default()),
    );
    let result = nr
        .run(
            &mut system,
            &mut network,
            &mut UniformValueVoltageInitializer,
            &mut MultipleAcLoadFlowObserver::default(),
        )
        .unwrap();
    assert_near(network.buses[1].v, 0.9412, 1e-3);

    let mut outer_loop = TransformerVoltageControlOuterLoop::new(3);
    outer_loop.initialize(&mut network).unwrap();
    let status = outer_loop
        .check(&mut OuterLoopContext {
            network: &mut network,
            system: &mut system,
            newton_raphson: &mut nr,
            last_result: result,
            outer_iteration: 0,
            solve_count: 1,
        })
        .unwrap();

    assert_eq!(status, OuterLoopStatus::Unstable);
    let br = &network.branches[0];
    assert_eq!(br.tap_changer.as_ref().unwrap().position, 11);
    assert_near(br.r1, 1.0375, 1e-12);
}

#[test]
fn shunt_sections_regulate_voltage() {
    let mut context =
        AcLoadFlowContext::new(shunt_network(), parameters(&["ShuntVoltageControl"])).unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::Converged);
    // 0 -> 3 (capped) -> 6
    assert_eq!(result.outer_iterations, 2);

    let network = context.network();
    let sh = &network.shunts[0];
    assert_eq!(sh.sections.as_ref().unwrap().section_count, 6);
    assert_near(sh.b, 0.6, 1e-12);
    assert!((network.buses[1].v - 1.0).abs() <= 0.01);
    assert!(sh.q < 0.0);
}

#[test]
fn outer_loop_limit_is_reported() {
    let parameters = AcLoadFlowParametersBuilder::default()
        .outer_loop_names(vec!["TransformerVoltageControl".to_string()])
        .max_outer_iterations(1)
        .build()
        .unwrap();
    let mut context = AcLoadFlowContext::new(tap_changer_network(), parameters).unwrap();
    let result = AcLoadFlowEngine::new(&mut context).run().unwrap();

    assert_eq!(result.status, AcLoadFlowStatus::MaxOuterIterations);
    assert_eq!(result.outer_iterations, 1);
}

#[test]
fn generator_and_transformer_cannot_control_the_same_bus() {
    let mut network = tap_changer_network();
    if let Some(tc) = network.branches[0].tap_changer.as_mut() {
        tc.controlled_bus = 0;
    }
    let mut context =
        AcLoadFlowContext::new(network, parameters(&["TransformerVoltageControl"])).unwrap();
    let err = AcLoadFlowEngine::new(&mut context).run().unwrap_err();
    assert!(err.to_string().contains("controlled by both a generator and transformer"));
}
