use crate::equation::{EquationId, EquationType};
use crate::math::norm;

/// Result of a convergence test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingCriteriaTest {
    pub stop: bool,
    /// Euclidean norm of the mismatch vector.
    pub norm: f64,
}

/// Decides whether a mismatch vector is small enough to stop iterating.
pub trait NewtonRaphsonStoppingCriteria {
    /// `fx[i]` is the mismatch of `equations[i]`.
    fn test(&self, fx: &[f64], equations: &[EquationId]) -> StoppingCriteriaTest;
}

pub const DEFAULT_CONV_EPS_PER_EQ: f64 = 1e-4;

/// Stops when `||fx||2 < sqrt(n eps^2)`, `n` being the equation count.
#[derive(Debug, Clone, Copy)]
pub struct DefaultNewtonRaphsonStoppingCriteria {
    pub conv_eps_per_eq: f64,
}

impl Default for DefaultNewtonRaphsonStoppingCriteria {
    fn default() -> Self {
        Self {
            conv_eps_per_eq: DEFAULT_CONV_EPS_PER_EQ,
        }
    }
}

impl NewtonRaphsonStoppingCriteria for DefaultNewtonRaphsonStoppingCriteria {
    fn test(&self, fx: &[f64], _equations: &[EquationId]) -> StoppingCriteriaTest {
        let norm = norm(fx);
        let eps = self.conv_eps_per_eq;
        StoppingCriteriaTest {
            stop: norm < (fx.len() as f64 * eps * eps).sqrt(),
            norm,
        }
    }
}

/// Stops when the absolute mismatch of every equation is below the
/// threshold of its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerEquationTypeStoppingCriteria {
    /// Active power (p.u.).
    pub max_active_power_mismatch: f64,
    /// Reactive power (p.u.).
    pub max_reactive_power_mismatch: f64,
    /// Voltage magnitude (p.u.).
    pub max_voltage_mismatch: f64,
    /// Voltage angle (rad).
    pub max_angle_mismatch: f64,
    pub max_ratio_mismatch: f64,
    /// Susceptance (p.u.).
    pub max_susceptance_mismatch: f64,
}

impl Default for PerEquationTypeStoppingCriteria {
    fn default() -> Self {
        Self {
            max_active_power_mismatch: 1e-4,
            max_reactive_power_mismatch: 1e-4,
            max_voltage_mismatch: 1e-4,
            max_angle_mismatch: 1e-5,
            max_ratio_mismatch: 1e-5,
            max_susceptance_mismatch: 1e-4,
        }
    }
}

impl PerEquationTypeStoppingCriteria {
    fn threshold(&self, kind: EquationType) -> f64 {
        match kind {
            EquationType::BusP => self.max_active_power_mismatch,
            EquationType::BusQ => self.max_reactive_power_mismatch,
            EquationType::BusV => self.max_voltage_mismatch,
            EquationType::BusPhi => self.max_angle_mismatch,
            EquationType::BranchRho1 => self.max_ratio_mismatch,
            EquationType::ShuntB => self.max_susceptance_mismatch,
        }
    }
}

impl NewtonRaphsonStoppingCriteria for PerEquationTypeStoppingCriteria {
    fn test(&self, fx: &[f64], equations: &[EquationId]) -> StoppingCriteriaTest {
        assert_eq!(fx.len(), equations.len());
        let stop = fx
            .iter()
            .zip(equations)
            .all(|(v, eq)| v.abs() < self.threshold(eq.kind));
        StoppingCriteriaTest {
            stop,
            norm: norm(fx),
        }
    }
}
