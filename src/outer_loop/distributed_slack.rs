use crate::network::Network;
use crate::outer_loop::{OuterLoop, OuterLoopContext, OuterLoopStatus, SolveGuard};
use crate::parameters::OuterLoopType;
use anyhow::Result;

const P_EPSILON: f64 = 1e-9;

/// Shares the slack bus active power mismatch between participating
/// generators in proportion to their participation factor, within their
/// active power limits.
pub struct DistributedSlackOuterLoop {
    slack_bus_p_max_mismatch: f64,
    guard: SolveGuard,
}

impl DistributedSlackOuterLoop {
    pub fn new(slack_bus_p_max_mismatch: f64) -> Self {
        Self {
            slack_bus_p_max_mismatch,
            guard: SolveGuard::default(),
        }
    }
}

/// Adds `mismatch` to the targets of the participating generators and
/// returns the part that could not be distributed because of limits.
pub fn distribute_active_power(network: &mut Network, mismatch: f64) -> f64 {
    let mut remaining = mismatch;
    let mut saturated = vec![false; network.generators.len()];

    while remaining.abs() > P_EPSILON {
        let total_factor: f64 = network
            .generators
            .iter()
            .filter(|g| g.participating && g.participation_factor > 0.0 && !saturated[g.num])
            .map(|g| g.participation_factor)
            .sum();
        if total_factor <= 0.0 {
            break;
        }

        let mut distributed = 0.0;
        for g in network.generators.iter_mut() {
            if !g.participating || g.participation_factor <= 0.0 || saturated[g.num] {
                continue;
            }
            let share = remaining * g.participation_factor / total_factor;
            let target_p = (g.target_p + share).clamp(g.min_p, g.max_p);
            if target_p != g.target_p + share {
                saturated[g.num] = true;
            }
            distributed += target_p - g.target_p;
            g.target_p = target_p;
        }
        remaining -= distributed;
    }
    remaining
}

impl OuterLoop for DistributedSlackOuterLoop {
    fn kind(&self) -> OuterLoopType {
        OuterLoopType::DistributedSlack
    }

    fn initialize(&mut self, network: &mut Network) -> Result<()> {
        let participating = network
            .generators
            .iter()
            .filter(|g| g.participating && g.participation_factor > 0.0)
            .count();
        if participating == 0 {
            log::warn!("no generator participates in slack distribution");
        }
        self.guard.reset();
        Ok(())
    }

    fn check(&mut self, context: &mut OuterLoopContext<'_>) -> Result<OuterLoopStatus> {
        if self.guard.already_checked(context.solve_count) {
            return Ok(OuterLoopStatus::Stable);
        }
        let mismatch = context.last_result.slack_bus_active_power_mismatch;
        if !mismatch.is_finite() || mismatch.abs() <= self.slack_bus_p_max_mismatch {
            return Ok(OuterLoopStatus::Stable);
        }

        let remaining = distribute_active_power(context.network, mismatch);
        let distributed = mismatch - remaining;
        log::debug!(
            "slack active power mismatch {} distributed: {}, remaining: {}",
            mismatch,
            distributed,
            remaining
        );
        if remaining.abs() > self.slack_bus_p_max_mismatch {
            log::warn!(
                "failed to distribute {} p.u. of slack active power, generators at their limits",
                remaining
            );
        }
        if distributed.abs() > P_EPSILON {
            Ok(OuterLoopStatus::Unstable)
        } else {
            Ok(OuterLoopStatus::Stable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Bus, Generator};

    #[test]
    fn distribution_respects_limits() {
        let mut net = Network::new("gens");
        net.buses.push(Bus::new(0, "b0").slack());
        net.generators.push(
            Generator::new(0, 0, 0.5)
                .active_limits(0.0, 0.6)
                .participation(1.0),
        );
        net.generators.push(
            Generator::new(1, 0, 0.5)
                .active_limits(0.0, 2.0)
                .participation(1.0),
        );

        let remaining = distribute_active_power(&mut net, 0.6);

        assert!(remaining.abs() < 1e-9);
        assert!((net.generators[0].target_p - 0.6).abs() < 1e-12);
        assert!((net.generators[1].target_p - 1.0).abs() < 1e-12);
    }
}
