use crate::ac_system::update_voltage_control_activation;
use crate::network::Network;
use crate::outer_loop::{OuterLoop, OuterLoopContext, OuterLoopStatus, SolveGuard};
use crate::parameters::OuterLoopType;
use anyhow::Result;
use std::collections::BTreeMap;

const Q_EPSILON: f64 = 1e-5;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
enum ReactiveLimit {
    Min,
    Max,
}

#[derive(Debug)]
struct SwitchedBus {
    limit: ReactiveLimit,
    pq_pv_switches: usize,
    /// (generator, reactive target) before the first PV -> PQ switch.
    original_target_q: Vec<(usize, f64)>,
}

/// Switches generator buses from voltage control (PV) to fixed reactive
/// power (PQ) when their reactive output violates the summed limits of their
/// generators, and back when the voltage moves to the side that lets the
/// generators leave the limit.
pub struct ReactiveLimitsOuterLoop {
    max_pq_pv_switches: usize,
    switched: BTreeMap<usize, SwitchedBus>,
    guard: SolveGuard,
}

impl ReactiveLimitsOuterLoop {
    pub fn new(max_pq_pv_switches: usize) -> Self {
        Self {
            max_pq_pv_switches,
            switched: BTreeMap::new(),
            guard: SolveGuard::default(),
        }
    }
}

impl OuterLoop for ReactiveLimitsOuterLoop {
    fn kind(&self) -> OuterLoopType {
        OuterLoopType::ReactiveLimits
    }

    /// Gives switched buses their voltage control and reactive targets back,
    /// so that a new run starts from the network as it was configured.
    fn initialize(&mut self, network: &mut Network) -> Result<()> {
        for (bus, switched) in std::mem::take(&mut self.switched) {
            if let Some(b) = network.buses.get_mut(bus) {
                b.voltage_control_enabled = true;
            }
            for (num, target_q) in switched.original_target_q {
                if let Some(g) = network.generators.get_mut(num) {
                    g.target_q = target_q;
                }
            }
            log::debug!("bus {}: voltage control restored", bus);
        }
        self.guard.reset();
        Ok(())
    }

    fn check(&mut self, context: &mut OuterLoopContext<'_>) -> Result<OuterLoopStatus> {
        if self.guard.already_checked(context.solve_count) {
            return Ok(OuterLoopStatus::Stable);
        }
        let network = &mut *context.network;
        let mut changed = Vec::new();

        for bus in 0..network.buses.len() {
            if network.buses[bus].slack || !network.has_voltage_control_capability(bus) {
                continue;
            }
            let (min_q, max_q) = network.reactive_limits(bus);

            if network.is_voltage_controlled(bus) {
                // PV -> PQ
                let q: f64 = network.bus_generators(bus).map(|g| g.q).sum();
                let limit = if q > max_q + Q_EPSILON {
                    ReactiveLimit::Max
                } else if q < min_q - Q_EPSILON {
                    ReactiveLimit::Min
                } else {
                    continue;
                };
                log::warn!(
                    "bus {}: reactive output {} out of [{}, {}], switching PV -> PQ",
                    bus,
                    q,
                    min_q,
                    max_q
                );
                network.buses[bus].voltage_control_enabled = false;
                let mut original_target_q = Vec::new();
                for g in network.generators.iter_mut().filter(|g| g.bus == bus) {
                    original_target_q.push((g.num, g.target_q));
                    g.target_q = match limit {
                        ReactiveLimit::Max => g.max_q,
                        ReactiveLimit::Min => g.min_q,
                    };
                }
                match self.switched.get_mut(&bus) {
                    Some(switched) => switched.limit = limit,
                    None => {
                        self.switched.insert(
                            bus,
                            SwitchedBus {
                                limit,
                                pq_pv_switches: 0,
                                original_target_q,
                            },
                        );
                    }
                }
                changed.push(bus);
            } else if let Some(switched) = self.switched.get_mut(&bus) {
                // PQ -> PV
                if switched.pq_pv_switches >= self.max_pq_pv_switches {
                    continue;
                }
                let v = network.buses[bus].v;
                let target_v = match network.target_v(bus) {
                    Some(target_v) => target_v,
                    None => continue,
                };
                let back = match switched.limit {
                    ReactiveLimit::Max => v > target_v,
                    ReactiveLimit::Min => v < target_v,
                };
                if back {
                    log::info!(
                        "bus {}: voltage {} lets generators leave the {:?} limit (target {}), switching PQ -> PV",
                        bus,
                        v,
                        switched.limit,
                        target_v
                    );
                    switched.pq_pv_switches += 1;
                    network.buses[bus].voltage_control_enabled = true;
                    changed.push(bus);
                }
            }
        }

        for &bus in &changed {
            update_voltage_control_activation(context.system, context.network, bus);
        }
        if changed.is_empty() {
            Ok(OuterLoopStatus::Stable)
        } else {
            Ok(OuterLoopStatus::Unstable)
        }
    }
}
