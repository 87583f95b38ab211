use crate::equation::{EquationId, EquationType};
use crate::network::Network;
use crate::outer_loop::{
    capped_position, voltage_sensitivities, OuterLoop, OuterLoopContext, OuterLoopStatus,
    SolveGuard,
};
use crate::parameters::OuterLoopType;
use anyhow::{bail, Result};

const MIN_SENSITIVITY: f64 = 1e-9;

/// Incremental discrete voltage control by switching shunt sections, the
/// controlled bus being the shunt bus.
pub struct ShuntVoltageControlOuterLoop {
    max_section_shift: usize,
    guard: SolveGuard,
}

impl ShuntVoltageControlOuterLoop {
    pub fn new(max_section_shift: usize) -> Self {
        Self {
            max_section_shift,
            guard: SolveGuard::default(),
        }
    }
}

impl OuterLoop for ShuntVoltageControlOuterLoop {
    fn kind(&self) -> OuterLoopType {
        OuterLoopType::ShuntVoltageControl
    }

    fn initialize(&mut self, network: &mut Network) -> Result<()> {
        for sh in network.shunts.iter().filter(|sh| sh.is_regulating()) {
            if network.is_voltage_controlled(sh.bus) {
                bail!(
                    "bus {} voltage is controlled by both a generator and shunt {}",
                    sh.bus,
                    sh.num
                );
            }
        }
        self.guard.reset();
        Ok(())
    }

    fn check(&mut self, context: &mut OuterLoopContext<'_>) -> Result<OuterLoopStatus> {
        if self.guard.already_checked(context.solve_count) {
            return Ok(OuterLoopStatus::Stable);
        }

        let mut violations = Vec::new();
        for sh in context.network.shunts.iter() {
            if let Some(sections) = sh.sections.as_ref().filter(|s| s.regulating) {
                let diff = sections.target_v - context.network.buses[sh.bus].v;
                if diff.abs() > sections.target_deadband / 2.0 {
                    violations.push((sh.num, sh.bus, diff));
                }
            }
        }

        let mut status = OuterLoopStatus::Stable;
        for (shunt, bus, diff) in violations {
            let row = match context.system.row(EquationId {
                num: shunt,
                kind: EquationType::ShuntB,
            }) {
                Some(row) => row,
                None => bail!("susceptance of shunt {} is not a variable", shunt),
            };
            let sensitivity = voltage_sensitivities(context, bus)?[row];
            if sensitivity.abs() < MIN_SENSITIVITY {
                log::warn!("shunt {} has no effect on bus {} voltage", shunt, bus);
                continue;
            }

            let sh = &mut context.network.shunts[shunt];
            let sections = match sh.sections.as_mut() {
                Some(sections) if sections.b_per_section != 0.0 => sections,
                _ => continue,
            };
            let desired_b = sh.b + diff / sensitivity;
            let desired = (desired_b / sections.b_per_section)
                .round()
                .clamp(0.0, sections.maximum_section_count as f64) as usize;
            let count = capped_position(sections.section_count, desired, self.max_section_shift);
            if count != sections.section_count {
                log::debug!(
                    "shunt {}: bus {} voltage off target by {}, sections {} -> {}",
                    shunt,
                    bus,
                    diff,
                    sections.section_count,
                    count
                );
                sections.section_count = count;
                sh.b = sections.b_per_section * count as f64;
                status = OuterLoopStatus::Unstable;
            }
        }
        Ok(status)
    }
}
