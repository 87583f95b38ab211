use crate::flows::BranchParameters;
use anyhow::{bail, ensure, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Network is an already ingested, per-unit power system modelled as a graph
/// of buses connected by branches.
///
/// Element numbers are dense and zero based: `buses[i].num == i`, and the same
/// for every other element vector.
#[derive(Clone, Debug, Default)]
pub struct Network {
    pub name: String,

    /// Power system nodes, including static loads.
    pub buses: Vec<Bus>,

    /// Generators with optional voltage control.
    pub generators: Vec<Generator>,

    /// Transmission lines and two winding transformers.
    pub branches: Vec<Branch>,

    /// Shunt compensators, optionally with switchable sections.
    pub shunts: Vec<Shunt>,
}

/// Bus is a node in the power system graph structure.
#[derive(Clone, Debug)]
pub struct Bus {
    /// Bus number.
    pub num: usize,

    pub name: String,

    /// Reference bus: angle fixed at zero, absorbs the active power imbalance.
    pub slack: bool,

    /// Active power consumed by loads (p.u.).
    pub load_target_p: f64,

    /// Reactive power consumed by loads (p.u.).
    pub load_target_q: f64,

    /// Generator voltage control is allowed at this bus. Cleared when a
    /// reactive limit is hit.
    pub voltage_control_enabled: bool,

    /// Voltage magnitude (p.u.). NaN until solved.
    pub v: f64,

    /// Voltage angle (radians). NaN until solved.
    pub angle: f64,
}

impl Bus {
    pub fn new(num: usize, name: &str) -> Self {
        Self {
            num,
            name: name.to_string(),
            slack: false,
            load_target_p: 0.0,
            load_target_q: 0.0,
            voltage_control_enabled: true,
            v: f64::NAN,
            angle: f64::NAN,
        }
    }

    pub fn slack(mut self) -> Self {
        self.slack = true;
        self
    }

    pub fn load(mut self, p: f64, q: f64) -> Self {
        self.load_target_p = p;
        self.load_target_q = q;
        self
    }
}

/// Generator is a source of active and reactive power, optionally
/// controlling the voltage magnitude of its bus.
#[derive(Clone, Debug)]
pub struct Generator {
    pub num: usize,

    /// Connection bus number.
    pub bus: usize,

    /// Active power target (p.u.).
    pub target_p: f64,

    /// Reactive power target, used when not controlling voltage (p.u.).
    pub target_q: f64,

    /// Voltage magnitude setpoint (p.u.).
    pub target_v: f64,

    pub voltage_control: bool,

    /// Minimum reactive power output (p.u.).
    pub min_q: f64,

    /// Maximum reactive power output (p.u.).
    pub max_q: f64,

    /// Minimum active power output (p.u.).
    pub min_p: f64,

    /// Maximum active power output (p.u.).
    pub max_p: f64,

    /// Takes part in slack distribution.
    pub participating: bool,

    pub participation_factor: f64,

    /// Active power output (p.u.). NaN until solved.
    pub p: f64,

    /// Reactive power output (p.u.). NaN until solved.
    pub q: f64,
}

impl Generator {
    pub fn new(num: usize, bus: usize, target_p: f64) -> Self {
        Self {
            num,
            bus,
            target_p,
            target_q: 0.0,
            target_v: f64::NAN,
            voltage_control: false,
            min_q: f64::NEG_INFINITY,
            max_q: f64::INFINITY,
            min_p: 0.0,
            max_p: f64::INFINITY,
            participating: false,
            participation_factor: 0.0,
            p: f64::NAN,
            q: f64::NAN,
        }
    }

    pub fn voltage_control(mut self, target_v: f64) -> Self {
        self.voltage_control = true;
        self.target_v = target_v;
        self
    }

    pub fn reactive_limits(mut self, min_q: f64, max_q: f64) -> Self {
        self.min_q = min_q;
        self.max_q = max_q;
        self
    }

    pub fn active_limits(mut self, min_p: f64, max_p: f64) -> Self {
        self.min_p = min_p;
        self.max_p = max_p;
        self
    }

    pub fn participation(mut self, factor: f64) -> Self {
        self.participating = true;
        self.participation_factor = factor;
        self
    }
}

/// Discrete tap changer of a transformer, acting on the side 1 ratio.
#[derive(Clone, Debug)]
pub struct TapChanger {
    /// Ratio of each tap position.
    pub ratios: Vec<f64>,

    /// Current tap position.
    pub position: usize,

    pub regulating: bool,

    /// Bus whose voltage magnitude is controlled.
    pub controlled_bus: usize,

    pub target_v: f64,

    /// Width of the dead band around `target_v` (p.u.).
    pub target_deadband: f64,
}

impl TapChanger {
    pub fn ratio(&self) -> f64 {
        self.ratios[self.position]
    }
}

/// Branch represents either a transmission line/cable or a two winding
/// transformer, as a pi model with an ideal transformer on side 1.
#[derive(Clone, Debug)]
pub struct Branch {
    pub num: usize,

    /// Side 1 bus number.
    pub bus1: usize,

    /// Side 2 bus number.
    pub bus2: usize,

    /// Series resistance (p.u.).
    pub r: f64,

    /// Series reactance (p.u.).
    pub x: f64,

    /// Side 1 shunt conductance (p.u.).
    pub g1: f64,

    /// Side 1 shunt susceptance (p.u.).
    pub b1: f64,

    /// Side 2 shunt conductance (p.u.).
    pub g2: f64,

    /// Side 2 shunt susceptance (p.u.).
    pub b2: f64,

    /// Side 1 voltage ratio.
    pub r1: f64,

    /// Side 1 phase shift (radians).
    pub a1: f64,

    pub tap_changer: Option<TapChanger>,

    /// Active power flowing out of bus1 into the branch (p.u.).
    pub p1: f64,

    /// Reactive power flowing out of bus1 into the branch (p.u.).
    pub q1: f64,

    /// Active power flowing out of bus2 into the branch (p.u.).
    pub p2: f64,

    /// Reactive power flowing out of bus2 into the branch (p.u.).
    pub q2: f64,
}

impl Branch {
    pub fn new(num: usize, bus1: usize, bus2: usize, r: f64, x: f64) -> Self {
        Self {
            num,
            bus1,
            bus2,
            r,
            x,
            g1: 0.0,
            b1: 0.0,
            g2: 0.0,
            b2: 0.0,
            r1: 1.0,
            a1: 0.0,
            tap_changer: None,
            p1: f64::NAN,
            q1: f64::NAN,
            p2: f64::NAN,
            q2: f64::NAN,
        }
    }

    /// Splits the total line charging susceptance between both sides.
    pub fn charging(mut self, b: f64) -> Self {
        self.b1 = b / 2.0;
        self.b2 = b / 2.0;
        self
    }

    pub fn ratio(mut self, r1: f64) -> Self {
        self.r1 = r1;
        self
    }

    pub fn tap_changer(mut self, tap_changer: TapChanger) -> Self {
        self.r1 = tap_changer.ratio();
        self.tap_changer = Some(tap_changer);
        self
    }

    pub fn is_regulating(&self) -> bool {
        self.tap_changer.as_ref().map_or(false, |tc| tc.regulating)
    }
}

/// Switchable sections of a shunt compensator.
#[derive(Clone, Debug)]
pub struct ShuntSections {
    /// Susceptance of one section (p.u.).
    pub b_per_section: f64,

    pub maximum_section_count: usize,

    pub section_count: usize,

    pub regulating: bool,

    /// Controlled bus is the connection bus.
    pub target_v: f64,

    pub target_deadband: f64,
}

/// Shunt compensator. Positive susceptance is capacitive.
#[derive(Clone, Debug)]
pub struct Shunt {
    pub num: usize,

    pub bus: usize,

    /// Conductance (p.u.).
    pub g: f64,

    /// Susceptance (p.u.).
    pub b: f64,

    pub sections: Option<ShuntSections>,

    /// Reactive power flowing out of the bus into the shunt (p.u.).
    pub q: f64,
}

impl Shunt {
    pub fn new(num: usize, bus: usize, g: f64, b: f64) -> Self {
        Self {
            num,
            bus,
            g,
            b,
            sections: None,
            q: f64::NAN,
        }
    }

    pub fn sections(mut self, sections: ShuntSections) -> Self {
        self.b = sections.b_per_section * sections.section_count as f64;
        self.sections = Some(sections);
        self
    }

    pub fn is_regulating(&self) -> bool {
        self.sections.as_ref().map_or(false, |s| s.regulating)
    }
}

impl Network {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn bus(&self, num: usize) -> Result<&Bus> {
        match self.buses.get(num) {
            Some(bus) => Ok(bus),
            None => bail!("unknown bus {}", num),
        }
    }

    pub fn bus_mut(&mut self, num: usize) -> Result<&mut Bus> {
        match self.buses.get_mut(num) {
            Some(bus) => Ok(bus),
            None => bail!("unknown bus {}", num),
        }
    }

    pub fn branch(&self, num: usize) -> Result<&Branch> {
        match self.branches.get(num) {
            Some(branch) => Ok(branch),
            None => bail!("unknown branch {}", num),
        }
    }

    pub fn shunt(&self, num: usize) -> Result<&Shunt> {
        match self.shunts.get(num) {
            Some(shunt) => Ok(shunt),
            None => bail!("unknown shunt {}", num),
        }
    }

    pub fn slack_bus(&self) -> Option<&Bus> {
        self.buses.iter().find(|b| b.slack)
    }

    /// Generators connected to the given bus.
    pub fn bus_generators(&self, bus: usize) -> impl Iterator<Item = &Generator> {
        self.generators.iter().filter(move |g| g.bus == bus)
    }

    pub fn generation_target_p(&self, bus: usize) -> f64 {
        self.bus_generators(bus).map(|g| g.target_p).sum()
    }

    pub fn generation_target_q(&self, bus: usize) -> f64 {
        self.bus_generators(bus).map(|g| g.target_q).sum()
    }

    /// Has at least one generator able to control voltage.
    pub fn has_voltage_control_capability(&self, bus: usize) -> bool {
        self.bus_generators(bus).any(|g| g.voltage_control)
    }

    pub fn is_voltage_controlled(&self, bus: usize) -> bool {
        self.buses[bus].voltage_control_enabled && self.has_voltage_control_capability(bus)
    }

    /// Voltage setpoint of the first voltage controlling generator.
    pub fn target_v(&self, bus: usize) -> Option<f64> {
        self.bus_generators(bus)
            .find(|g| g.voltage_control)
            .map(|g| g.target_v)
    }

    /// Summed reactive limits of the bus generators.
    pub fn reactive_limits(&self, bus: usize) -> (f64, f64) {
        self.bus_generators(bus)
            .fold((0.0, 0.0), |(min_q, max_q), g| (min_q + g.min_q, max_q + g.max_q))
    }

    /// Checks the structural consistency needed by the solver.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.buses.is_empty(), "network '{}' has no bus", self.name);

        for (i, bus) in self.buses.iter().enumerate() {
            ensure!(bus.num == i, "bus {} stored at index {}", bus.num, i);
        }
        for (i, g) in self.generators.iter().enumerate() {
            ensure!(g.num == i, "generator {} stored at index {}", g.num, i);
        }
        for (i, br) in self.branches.iter().enumerate() {
            ensure!(br.num == i, "branch {} stored at index {}", br.num, i);
        }
        for (i, sh) in self.shunts.iter().enumerate() {
            ensure!(sh.num == i, "shunt {} stored at index {}", sh.num, i);
        }
        let slack_count = self.buses.iter().filter(|b| b.slack).count();
        ensure!(
            slack_count == 1,
            "network '{}' must have exactly one slack bus, found {}",
            self.name,
            slack_count
        );

        for g in &self.generators {
            self.bus(g.bus)?;
            if g.voltage_control {
                ensure!(
                    g.target_v.is_finite() && g.target_v > 0.0,
                    "generator {} has an invalid voltage target {}",
                    g.num,
                    g.target_v
                );
            }
            if g.participating {
                ensure!(
                    g.participation_factor >= 0.0,
                    "generator {} has a negative participation factor",
                    g.num
                );
            }
        }

        // bus -> discrete control kinds acting on its voltage
        let mut controls = BTreeMap::<usize, BTreeSet<&'static str>>::new();
        for br in &self.branches {
            self.bus(br.bus1)?;
            self.bus(br.bus2)?;
            ensure!(
                br.r != 0.0 || br.x != 0.0,
                "branch {} has a zero impedance",
                br.num
            );
            if let Some(tc) = &br.tap_changer {
                ensure!(
                    tc.position < tc.ratios.len(),
                    "branch {} tap position {} out of range [0, {})",
                    br.num,
                    tc.position,
                    tc.ratios.len()
                );
                if tc.regulating {
                    self.bus(tc.controlled_bus)?;
                    controls
                        .entry(tc.controlled_bus)
                        .or_default()
                        .insert("transformer");
                }
            }
        }
        for sh in &self.shunts {
            self.bus(sh.bus)?;
            if let Some(sections) = &sh.sections {
                ensure!(
                    sections.section_count <= sections.maximum_section_count,
                    "shunt {} section count {} above maximum {}",
                    sh.num,
                    sections.section_count,
                    sections.maximum_section_count
                );
                if sections.regulating {
                    controls.entry(sh.bus).or_default().insert("shunt");
                }
            }
        }
        for (bus, kinds) in controls {
            ensure!(
                kinds.len() == 1,
                "bus {} voltage is controlled by more than one discrete control type: {:?}",
                bus,
                kinds
            );
        }
        Ok(())
    }

    /// Computes branch terminal flows, shunt flows and generator outputs
    /// from the bus voltages.
    pub fn update_flows(&mut self, slack_mismatch: f64) {
        let mut bus_q = vec![0.0; self.buses.len()];

        for br in self.branches.iter_mut() {
            let (v1, ph1) = (self.buses[br.bus1].v, self.buses[br.bus1].angle);
            let (v2, ph2) = (self.buses[br.bus2].v, self.buses[br.bus2].angle);
            let params = BranchParameters::new(br);
            let (p1, q1, p2, q2) = params.flows(v1, ph1, v2, ph2, br.r1);
            br.p1 = p1;
            br.q1 = q1;
            br.p2 = p2;
            br.q2 = q2;
            bus_q[br.bus1] += q1;
            bus_q[br.bus2] += q2;
        }
        for sh in self.shunts.iter_mut() {
            let v = self.buses[sh.bus].v;
            sh.q = -sh.b * v * v;
            bus_q[sh.bus] += sh.q;
        }

        // Reactive output of voltage controlling generators is shared in
        // proportion to their reactive range.
        for bus in 0..self.buses.len() {
            let controlled = self.is_voltage_controlled(bus);
            let q_gen = bus_q[bus] + self.buses[bus].load_target_q;
            let (min_q, max_q) = self.reactive_limits(bus);
            let n = self.bus_generators(bus).count() as f64;
            for g in self.generators.iter_mut().filter(|g| g.bus == bus) {
                g.p = g.target_p;
                g.q = if !controlled {
                    g.target_q
                } else if (max_q - min_q).is_finite() && max_q - min_q > 1e-13 {
                    q_gen * (g.max_q - g.min_q) / (max_q - min_q)
                } else {
                    q_gen / n
                };
            }
        }

        // Slack generator(s) take up the active power mismatch.
        if let Some(slack) = self.buses.iter().find(|b| b.slack).map(|b| b.num) {
            let n = self.bus_generators(slack).count();
            if n > 0 {
                for g in self.generators.iter_mut().filter(|g| g.bus == slack) {
                    g.p = g.target_p + slack_mismatch / n as f64;
                }
            }
        }
    }
}
