use crate::network::{Branch, Bus, Generator, Network, Shunt, TapChanger};
use anyhow::{bail, Result};

pub const CASE_NAMES: [&str; 3] = ["two-bus", "three-bus", "ieee14"];

pub fn by_name(name: &str) -> Result<Network> {
    match name {
        "two-bus" => Ok(two_bus()),
        "three-bus" => Ok(three_bus()),
        "ieee14" | "case14" => Ok(ieee14()),
        _ => bail!(
            "unknown case '{}', expected one of {}",
            name,
            CASE_NAMES.join(", ")
        ),
    }
}

/// Slack bus at 1 p.u. feeding a 2 + j1 p.u. load through a lossless
/// 0.1 p.u. reactance.
pub fn two_bus() -> Network {
    let mut net = Network::new("two-bus");
    net.buses.push(Bus::new(0, "b1").slack());
    net.buses.push(Bus::new(1, "b2").load(2.0, 1.0));
    net.generators
        .push(Generator::new(0, 0, 0.0).voltage_control(1.0));
    net.branches.push(Branch::new(0, 0, 1, 0.0, 0.1));
    net
}

/// Meshed three-bus network: slack, voltage controlled generator and load.
pub fn three_bus() -> Network {
    let mut net = Network::new("three-bus");
    net.buses.push(Bus::new(0, "b1").slack());
    net.buses.push(Bus::new(1, "b2"));
    net.buses.push(Bus::new(2, "b3").load(1.0, 0.5));
    net.generators.push(
        Generator::new(0, 0, 0.0)
            .voltage_control(1.0)
            .active_limits(0.0, 2.0),
    );
    net.generators.push(
        Generator::new(1, 1, 0.5)
            .voltage_control(1.05)
            .active_limits(0.0, 2.0),
    );
    net.branches.push(Branch::new(0, 0, 1, 0.01, 0.1));
    net.branches.push(Branch::new(1, 0, 2, 0.01, 0.1));
    net.branches.push(Branch::new(2, 1, 2, 0.01, 0.1));
    net
}

/// Fixed, non regulating tap changer whose middle position is `r1`.
fn fixed_tap_changer(r1: f64, controlled_bus: usize) -> TapChanger {
    TapChanger {
        ratios: (0..33)
            .map(|i| r1 * (1.0 + (i as f64 - 16.0) * 0.00625))
            .collect(),
        position: 16,
        regulating: false,
        controlled_bus,
        target_v: 1.0,
        target_deadband: 0.01,
    }
}

/// IEEE 14 bus test case, 100 MVA base.
pub fn ieee14() -> Network {
    let base_mva = 100.0;
    let mut net = Network::new("ieee14");

    // bus, Pd, Qd
    let loads = [
        (1, 0.0, 0.0),
        (2, 21.7, 12.7),
        (3, 94.2, 19.0),
        (4, 47.8, -3.9),
        (5, 7.6, 1.6),
        (6, 11.2, 7.5),
        (7, 0.0, 0.0),
        (8, 0.0, 0.0),
        (9, 29.5, 16.6),
        (10, 9.0, 5.8),
        (11, 3.5, 1.8),
        (12, 6.1, 1.6),
        (13, 13.5, 5.8),
        (14, 14.9, 5.0),
    ];
    for (i, pd, qd) in loads {
        let mut bus = Bus::new(i - 1, &format!("Bus {}", i)).load(pd / base_mva, qd / base_mva);
        if i == 1 {
            bus = bus.slack();
        }
        net.buses.push(bus);
    }

    // bus, Pg, Qg, Qmax, Qmin, Vg, Pmax
    let gens = [
        (1, 232.4, -16.9, 10.0, 0.0, 1.06, 332.4),
        (2, 40.0, 42.4, 50.0, -40.0, 1.045, 140.0),
        (3, 0.0, 23.4, 40.0, 0.0, 1.01, 100.0),
        (6, 0.0, 12.2, 24.0, -6.0, 1.07, 100.0),
        (8, 0.0, 17.4, 24.0, -6.0, 1.09, 100.0),
    ];
    for (num, (bus, pg, qg, qmax, qmin, vg, pmax)) in gens.into_iter().enumerate() {
        let mut g = Generator::new(num, bus - 1, pg / base_mva)
            .voltage_control(vg)
            .reactive_limits(qmin / base_mva, qmax / base_mva)
            .active_limits(0.0, pmax / base_mva);
        g.target_q = qg / base_mva;
        net.generators.push(g);
    }

    // from, to, r, x, b, ratio
    let branches = [
        (1, 2, 0.01938, 0.05917, 0.0528, 0.0),
        (1, 5, 0.05403, 0.22304, 0.0492, 0.0),
        (2, 3, 0.04699, 0.19797, 0.0438, 0.0),
        (2, 4, 0.05811, 0.17632, 0.034, 0.0),
        (2, 5, 0.05695, 0.17388, 0.0346, 0.0),
        (3, 4, 0.06701, 0.17103, 0.0128, 0.0),
        (4, 5, 0.01335, 0.04211, 0.0, 0.0),
        (4, 7, 0.0, 0.20912, 0.0, 0.978),
        (4, 9, 0.0, 0.55618, 0.0, 0.969),
        (5, 6, 0.0, 0.25202, 0.0, 0.932),
        (6, 11, 0.09498, 0.1989, 0.0, 0.0),
        (6, 12, 0.12291, 0.25581, 0.0, 0.0),
        (6, 13, 0.06615, 0.13027, 0.0, 0.0),
        (7, 8, 0.0, 0.17615, 0.0, 0.0),
        (7, 9, 0.0, 0.11001, 0.0, 0.0),
        (9, 10, 0.03181, 0.0845, 0.0, 0.0),
        (9, 14, 0.12711, 0.27038, 0.0, 0.0),
        (10, 11, 0.08205, 0.19207, 0.0, 0.0),
        (12, 13, 0.22092, 0.19988, 0.0, 0.0),
        (13, 14, 0.17093, 0.34802, 0.0, 0.0),
    ];
    for (num, (f, t, r, x, b, tap)) in branches.into_iter().enumerate() {
        let mut br = Branch::new(num, f - 1, t - 1, r, x).charging(b);
        if tap != 0.0 {
            // off-nominal turns ratio on the from side
            br = br.tap_changer(fixed_tap_changer(1.0 / tap, t - 1));
        }
        net.branches.push(br);
    }

    net.shunts.push(Shunt::new(0, 8, 0.0, 19.0 / base_mva));
    net
}
