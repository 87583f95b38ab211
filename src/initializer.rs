use crate::matrix::MatrixFactory;
use crate::network::{Bus, Network};
use anyhow::{bail, Result};
use std::fmt;

/// Source of the initial bus voltages of a Newton-Raphson solve.
pub trait VoltageInitializer {
    /// Called once before the state vector is created.
    fn prepare(&mut self, _network: &Network, _factory: &dyn MatrixFactory) -> Result<()> {
        Ok(())
    }

    fn magnitude(&self, bus: &Bus) -> f64;

    fn angle(&self, bus: &Bus) -> f64;
}

/// Voltage initialization method.
#[derive(Clone, Copy, Debug, Default, PartialEq, clap::ValueEnum)]
pub enum VoltageInitMode {
    /// Flat start: 1 p.u. and 0 rad everywhere.
    #[default]
    Uniform,
    /// Voltages of the last solution, flat start where unsolved.
    Previous,
    /// Angles of a DC power flow, 1 p.u. magnitudes.
    Dc,
}

impl fmt::Display for VoltageInitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoltageInitMode::Uniform => write!(f, "uniform"),
            VoltageInitMode::Previous => write!(f, "previous"),
            VoltageInitMode::Dc => write!(f, "dc"),
        }
    }
}

pub fn voltage_initializer(mode: VoltageInitMode) -> Box<dyn VoltageInitializer> {
    match mode {
        VoltageInitMode::Uniform => Box::new(UniformValueVoltageInitializer),
        VoltageInitMode::Previous => Box::new(PreviousValueVoltageInitializer),
        VoltageInitMode::Dc => Box::new(DcValueVoltageInitializer::default()),
    }
}

pub struct UniformValueVoltageInitializer;

impl VoltageInitializer for UniformValueVoltageInitializer {
    fn magnitude(&self, _bus: &Bus) -> f64 {
        1.0
    }

    fn angle(&self, _bus: &Bus) -> f64 {
        0.0
    }
}

pub struct PreviousValueVoltageInitializer;

impl VoltageInitializer for PreviousValueVoltageInitializer {
    fn magnitude(&self, bus: &Bus) -> f64 {
        if bus.v.is_finite() {
            bus.v
        } else {
            1.0
        }
    }

    fn angle(&self, bus: &Bus) -> f64 {
        if bus.angle.is_finite() {
            bus.angle
        } else {
            0.0
        }
    }
}

/// Angles from a linearized (DC) power flow.
///
/// Solves `B theta = P - Pshift` for all but the slack bus, with `b = r1/x`
/// per branch and the slack angle at zero.
#[derive(Default)]
pub struct DcValueVoltageInitializer {
    angles: Vec<f64>,
}

impl DcValueVoltageInitializer {
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }
}

impl VoltageInitializer for DcValueVoltageInitializer {
    fn prepare(&mut self, network: &Network, factory: &dyn MatrixFactory) -> Result<()> {
        let slack = match network.slack_bus() {
            Some(bus) => bus.num,
            None => bail!("network '{}' has no slack bus", network.name),
        };
        let nb = network.buses.len();

        // bus number -> row, none for the slack
        let mut rows = vec![None; nb];
        let mut n = 0;
        for bus in &network.buses {
            if bus.num != slack {
                rows[bus.num] = Some(n);
                n += 1;
            }
        }

        let mut p_bus: Vec<f64> = network
            .buses
            .iter()
            .map(|bus| network.generation_target_p(bus.num) - bus.load_target_p)
            .collect();

        let mut b_mat = factory.create(n, n, 4 * network.branches.len() + n);
        for i in 0..n {
            b_mat.add_and_get_index(i, i, 0.0);
        }
        for br in &network.branches {
            if br.x == 0.0 || br.bus1 == br.bus2 {
                continue;
            }
            let b = br.r1 / br.x;
            let (f, t) = (rows[br.bus1], rows[br.bus2]);
            if let Some(f) = f {
                b_mat.add_and_get_index(f, f, b);
            }
            if let Some(t) = t {
                b_mat.add_and_get_index(t, t, b);
            }
            if let (Some(f), Some(t)) = (f, t) {
                b_mat.add_and_get_index(f, t, -b);
                b_mat.add_and_get_index(t, f, -b);
            }
            // phase shift injections
            p_bus[br.bus1] -= b * br.a1;
            p_bus[br.bus2] += b * br.a1;
        }
        log::trace!("Bdc:\n{}", b_mat.to_table());

        let mut rhs = vec![0.0; n];
        for (bus, row) in rows.iter().enumerate() {
            if let Some(row) = row {
                rhs[*row] = p_bus[bus];
            }
        }
        if n > 0 {
            let lu = b_mat.decompose_lu()?;
            lu.solve(&mut rhs)?;
        }

        self.angles = rows
            .iter()
            .map(|row| row.map_or(0.0, |row| rhs[row]))
            .collect();
        log::debug!("DC initial angles: {}", crate::debug::format_f64_vec(&self.angles));
        Ok(())
    }

    fn magnitude(&self, _bus: &Bus) -> f64 {
        1.0
    }

    fn angle(&self, bus: &Bus) -> f64 {
        self.angles.get(bus.num).copied().unwrap_or(0.0)
    }
}
