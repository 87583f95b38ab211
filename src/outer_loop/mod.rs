mod distributed_slack;
mod reactive_limits;
mod shunt_voltage_control;
mod transformer_voltage_control;

pub use distributed_slack::*;
pub use reactive_limits::*;
pub use shunt_voltage_control::*;
pub use transformer_voltage_control::*;

use crate::equation_system::EquationSystem;
use crate::network::Network;
use crate::newton_raphson::{NewtonRaphson, NewtonRaphsonResult};
use crate::parameters::{AcLoadFlowParameters, OuterLoopType};
use crate::variable::{Variable, VariableType};
use anyhow::{anyhow, Result};
use std::fmt;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum OuterLoopStatus {
    /// Nothing to adjust.
    Stable,
    /// Something was adjusted, the network must be solved again.
    Unstable,
}

impl fmt::Display for OuterLoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OuterLoopStatus::Stable => write!(f, "STABLE"),
            OuterLoopStatus::Unstable => write!(f, "UNSTABLE"),
        }
    }
}

/// State handed to outer loops after a converged Newton-Raphson run.
pub struct OuterLoopContext<'a> {
    pub network: &'a mut Network,
    pub system: &'a mut EquationSystem,
    pub newton_raphson: &'a mut NewtonRaphson,
    pub last_result: NewtonRaphsonResult,
    pub outer_iteration: usize,
    /// Number of converged Newton-Raphson runs so far.
    pub solve_count: usize,
}

/// Control adjustment between two Newton-Raphson runs.
///
/// `check` must report `Stable` when called again before the network has
/// been solved again.
pub trait OuterLoop {
    fn kind(&self) -> OuterLoopType;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn initialize(&mut self, _network: &mut Network) -> Result<()> {
        Ok(())
    }

    fn check(&mut self, context: &mut OuterLoopContext<'_>) -> Result<OuterLoopStatus>;
}

/// Remembers the solve a loop last checked, so that a repeated check
/// without an intervening solve is a no-op.
#[derive(Default, Debug)]
pub(crate) struct SolveGuard {
    last_checked_solve: Option<usize>,
}

impl SolveGuard {
    /// True if this solve was already checked.
    pub(crate) fn already_checked(&mut self, solve_count: usize) -> bool {
        if self.last_checked_solve == Some(solve_count) {
            true
        } else {
            self.last_checked_solve = Some(solve_count);
            false
        }
    }

    /// Forgets the last checked solve, for a new load flow run.
    pub(crate) fn reset(&mut self) {
        self.last_checked_solve = None;
    }
}

pub fn create_outer_loops(parameters: &AcLoadFlowParameters) -> Result<Vec<Box<dyn OuterLoop>>> {
    let loops = parameters
        .outer_loop_types()?
        .into_iter()
        .map(|kind| -> Box<dyn OuterLoop> {
            match kind {
                OuterLoopType::ReactiveLimits => {
                    Box::new(ReactiveLimitsOuterLoop::new(parameters.max_pq_pv_switches))
                }
                OuterLoopType::DistributedSlack => {
                    Box::new(DistributedSlackOuterLoop::new(parameters.slack_bus_p_max_mismatch))
                }
                OuterLoopType::TransformerVoltageControl => {
                    Box::new(TransformerVoltageControlOuterLoop::new(parameters.max_tap_shift))
                }
                OuterLoopType::ShuntVoltageControl => {
                    Box::new(ShuntVoltageControlOuterLoop::new(parameters.max_section_shift))
                }
            }
        })
        .collect();
    Ok(loops)
}

/// Sensitivity of the voltage magnitude of `bus` to the target of each
/// equation, indexed by equation row.
pub(crate) fn voltage_sensitivities(
    context: &mut OuterLoopContext<'_>,
    bus: usize,
) -> Result<Vec<f64>> {
    let v = Variable {
        num: bus,
        kind: VariableType::BusV,
    };
    let column = context
        .system
        .column(v)
        .ok_or_else(|| anyhow!("voltage of bus {} is not a variable", bus))?;
    let mut w = vec![0.0; context.system.sorted_variables_to_find().len()];
    w[column] = 1.0;
    context
        .newton_raphson
        .calculate_sensitivities(context.system, &mut w)?;
    Ok(w)
}

/// Position of the value nearest to `target`.
pub(crate) fn nearest_position(values: &[f64], target: f64) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if (v - target).abs() < (values[best] - target).abs() {
            best = i;
        }
    }
    best
}

/// Moves from `current` towards `desired` by at most `max_shift`.
pub(crate) fn capped_position(current: usize, desired: usize, max_shift: usize) -> usize {
    if desired > current {
        desired.min(current + max_shift)
    } else {
        desired.max(current.saturating_sub(max_shift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_helpers() {
        let ratios = [0.9, 0.95, 1.0, 1.05, 1.1];
        assert_eq!(nearest_position(&ratios, 1.04), 3);
        assert_eq!(nearest_position(&ratios, 2.0), 4);
        assert_eq!(capped_position(0, 4, 3), 3);
        assert_eq!(capped_position(4, 0, 3), 1);
        assert_eq!(capped_position(2, 3, 3), 3);
    }
}
