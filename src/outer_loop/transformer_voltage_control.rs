use crate::equation::{EquationId, EquationType};
use crate::network::Network;
use crate::outer_loop::{
    capped_position, nearest_position, voltage_sensitivities, OuterLoop, OuterLoopContext,
    OuterLoopStatus, SolveGuard,
};
use crate::parameters::OuterLoopType;
use anyhow::{bail, Result};

const MIN_SENSITIVITY: f64 = 1e-9;

/// Incremental discrete voltage control by transformer tap changers.
///
/// The ratio of each regulating transformer is pinned by its ratio
/// equation. The sensitivity of the controlled voltage to that ratio gives
/// the ratio change that would reach the voltage target, which is rounded
/// to the nearest tap and limited to `max_tap_shift` positions per check.
pub struct TransformerVoltageControlOuterLoop {
    max_tap_shift: usize,
    guard: SolveGuard,
}

impl TransformerVoltageControlOuterLoop {
    pub fn new(max_tap_shift: usize) -> Self {
        Self {
            max_tap_shift,
            guard: SolveGuard::default(),
        }
    }
}

impl OuterLoop for TransformerVoltageControlOuterLoop {
    fn kind(&self) -> OuterLoopType {
        OuterLoopType::TransformerVoltageControl
    }

    fn initialize(&mut self, network: &mut Network) -> Result<()> {
        for br in network.branches.iter().filter(|br| br.is_regulating()) {
            if let Some(tc) = &br.tap_changer {
                if network.is_voltage_controlled(tc.controlled_bus) {
                    bail!(
                        "bus {} voltage is controlled by both a generator and transformer {}",
                        tc.controlled_bus,
                        br.num
                    );
                }
            }
        }
        self.guard.reset();
        Ok(())
    }

    fn check(&mut self, context: &mut OuterLoopContext<'_>) -> Result<OuterLoopStatus> {
        if self.guard.already_checked(context.solve_count) {
            return Ok(OuterLoopStatus::Stable);
        }

        // (branch, controlled bus, voltage error)
        let mut violations = Vec::new();
        for br in context.network.branches.iter() {
            if let Some(tc) = br.tap_changer.as_ref().filter(|tc| tc.regulating) {
                let v = context.network.buses[tc.controlled_bus].v;
                let diff = tc.target_v - v;
                if diff.abs() > tc.target_deadband / 2.0 {
                    violations.push((br.num, tc.controlled_bus, diff));
                }
            }
        }

        let mut status = OuterLoopStatus::Stable;
        for (branch, bus, diff) in violations {
            let row = match context.system.row(EquationId {
                num: branch,
                kind: EquationType::BranchRho1,
            }) {
                Some(row) => row,
                None => bail!("ratio of transformer {} is not a variable", branch),
            };
            let sensitivity = voltage_sensitivities(context, bus)?[row];
            if sensitivity.abs() < MIN_SENSITIVITY {
                log::warn!("transformer {} has no effect on bus {} voltage", branch, bus);
                continue;
            }

            let br = &mut context.network.branches[branch];
            let tc = match br.tap_changer.as_mut() {
                Some(tc) => tc,
                None => continue,
            };
            let desired_ratio = br.r1 + diff / sensitivity;
            let desired = nearest_position(&tc.ratios, desired_ratio);
            let position = capped_position(tc.position, desired, self.max_tap_shift);
            if position != tc.position {
                log::debug!(
                    "transformer {}: bus {} voltage off target by {}, tap {} -> {}",
                    branch,
                    bus,
                    diff,
                    tc.position,
                    position
                );
                tc.position = position;
                br.r1 = tc.ratios[position];
                status = OuterLoopStatus::Unstable;
            }
        }
        Ok(status)
    }
}
