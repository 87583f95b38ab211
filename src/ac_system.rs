use crate::equation::{EquationId, EquationType};
use crate::equation_system::EquationSystem;
use crate::flows::BranchParameters;
use crate::network::Network;
use crate::term::{
    BranchFlow, ClosedBranchFlowTerm, ClosedBranchVariables, ShuntFlowTerm, ShuntSusceptance,
    VariableTerm,
};
use crate::variable::VariableType;
use anyhow::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct AcEquationSystemParameters {
    /// Tap changer ratios are variables, pinned by a ratio equation, instead
    /// of fixed parameters of the flow terms.
    pub transformer_ratio_variables: bool,

    /// Susceptances of sectioned shunts are variables, pinned by a
    /// susceptance equation.
    pub shunt_susceptance_variables: bool,
}

/// Builds the AC power flow equations of a network.
///
/// Every bus gets active and reactive power balance equations and voltage
/// magnitude and angle equations, activated according to its voltage
/// control status.
pub fn create_ac_equation_system(
    network: &Network,
    parameters: &AcEquationSystemParameters,
) -> Result<EquationSystem> {
    network.validate()?;

    let mut system = EquationSystem::new();

    for bus in &network.buses {
        let v = system.variable(bus.num, VariableType::BusV);
        let ph = system.variable(bus.num, VariableType::BusPhi);
        system.create_equation(bus.num, EquationType::BusP);
        system.create_equation(bus.num, EquationType::BusQ);
        let v_eq = system.create_equation(bus.num, EquationType::BusV);
        system.add_term(v_eq, Box::new(VariableTerm::new(v)));
        let ph_eq = system.create_equation(bus.num, EquationType::BusPhi);
        system.add_term(ph_eq, Box::new(VariableTerm::new(ph)));
    }

    for br in &network.branches {
        if br.bus1 == br.bus2 {
            log::warn!("branch {} connected at both sides to bus {}, ignored", br.num, br.bus1);
            continue;
        }
        let r1 = if parameters.transformer_ratio_variables && br.tap_changer.is_some() {
            let r1 = system.variable(br.num, VariableType::BranchRho1);
            let eq = system.create_equation(br.num, EquationType::BranchRho1);
            system.add_term(eq, Box::new(VariableTerm::new(r1)));
            Some(r1)
        } else {
            None
        };
        let vars = ClosedBranchVariables {
            v1: system.variable(br.bus1, VariableType::BusV),
            ph1: system.variable(br.bus1, VariableType::BusPhi),
            v2: system.variable(br.bus2, VariableType::BusV),
            ph2: system.variable(br.bus2, VariableType::BusPhi),
            r1,
        };
        let params = BranchParameters::new(br);

        for (flow, bus, kind) in [
            (BranchFlow::Side1Active, br.bus1, EquationType::BusP),
            (BranchFlow::Side1Reactive, br.bus1, EquationType::BusQ),
            (BranchFlow::Side2Active, br.bus2, EquationType::BusP),
            (BranchFlow::Side2Reactive, br.bus2, EquationType::BusQ),
        ] {
            let eq = EquationId { num: bus, kind };
            system.add_term(eq, Box::new(ClosedBranchFlowTerm::new(flow, params, vars, br.r1)));
        }
    }

    for sh in &network.shunts {
        let v = system.variable(sh.bus, VariableType::BusV);
        if sh.g != 0.0 {
            let eq = EquationId {
                num: sh.bus,
                kind: EquationType::BusP,
            };
            system.add_term(eq, Box::new(ShuntFlowTerm::active(v, sh.g)));
        }
        let b = if parameters.shunt_susceptance_variables && sh.sections.is_some() {
            let b = system.variable(sh.num, VariableType::ShuntB);
            let eq = system.create_equation(sh.num, EquationType::ShuntB);
            system.add_term(eq, Box::new(VariableTerm::new(b)));
            ShuntSusceptance::Variable(b)
        } else {
            ShuntSusceptance::Fixed(sh.b)
        };
        let eq = EquationId {
            num: sh.bus,
            kind: EquationType::BusQ,
        };
        system.add_term(eq, Box::new(ShuntFlowTerm::reactive(v, b)));
    }

    for bus in &network.buses {
        update_voltage_control_activation(&mut system, network, bus.num);
    }

    log::debug!(
        "AC equation system of '{}': {} equations, {} variables",
        network.name,
        system.sorted_equations_to_solve().len(),
        system.sorted_variables_to_find().len()
    );
    Ok(system)
}

/// Activates the equations of a bus according to its type: the slack bus
/// solves for its angle, other buses for their active power, and voltage
/// controlled buses for their voltage magnitude instead of reactive power.
pub fn update_voltage_control_activation(system: &mut EquationSystem, network: &Network, bus: usize) {
    let slack = network.buses[bus].slack;
    let controlled = network.is_voltage_controlled(bus);

    let id = |kind| EquationId { num: bus, kind };
    system.set_active(id(EquationType::BusP), !slack);
    system.set_active(id(EquationType::BusPhi), slack);
    system.set_active(id(EquationType::BusV), controlled);
    system.set_active(id(EquationType::BusQ), !controlled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases;

    #[test]
    fn bus_equations_follow_bus_type() {
        let network = cases::three_bus();
        let mut system =
            create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();

        let kinds: Vec<(usize, EquationType)> = system
            .sorted_equations_to_solve()
            .iter()
            .map(|id| (id.num, id.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (0, EquationType::BusV),
                (0, EquationType::BusPhi),
                (1, EquationType::BusP),
                (1, EquationType::BusV),
                (2, EquationType::BusP),
                (2, EquationType::BusQ),
            ]
        );
        assert_eq!(system.sorted_variables_to_find().len(), 6);
    }

    #[test]
    fn ratio_variables_only_when_requested() {
        let network = cases::ieee14();
        let mut fixed =
            create_ac_equation_system(&network, &AcEquationSystemParameters::default()).unwrap();
        let mut variable = create_ac_equation_system(
            &network,
            &AcEquationSystemParameters {
                transformer_ratio_variables: true,
                shunt_susceptance_variables: true,
            },
        )
        .unwrap();

        let rho = |system: &mut EquationSystem| {
            system
                .sorted_equations_to_solve()
                .iter()
                .filter(|id| id.kind == EquationType::BranchRho1)
                .count()
        };
        assert_eq!(rho(&mut fixed), 0);
        assert_eq!(
            rho(&mut variable),
            network.branches.iter().filter(|br| br.tap_changer.is_some()).count()
        );
    }
}
