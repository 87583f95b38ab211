use crate::initializer::VoltageInitMode;
use crate::stopping_criteria::{
    DefaultNewtonRaphsonStoppingCriteria, NewtonRaphsonStoppingCriteria,
    PerEquationTypeStoppingCriteria, DEFAULT_CONV_EPS_PER_EQ,
};
use anyhow::{anyhow, bail, Result};
use derive_builder::Builder;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Convergence test applied after each Newton-Raphson iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoppingCriteriaType {
    /// Euclidean norm of the mismatch vector against `sqrt(n eps^2)`.
    Uniform { conv_eps_per_eq: f64 },
    PerEquationType(PerEquationTypeStoppingCriteria),
}

impl Default for StoppingCriteriaType {
    fn default() -> Self {
        StoppingCriteriaType::Uniform {
            conv_eps_per_eq: DEFAULT_CONV_EPS_PER_EQ,
        }
    }
}

impl StoppingCriteriaType {
    pub fn criteria(&self) -> Box<dyn NewtonRaphsonStoppingCriteria> {
        match *self {
            StoppingCriteriaType::Uniform { conv_eps_per_eq } => {
                Box::new(DefaultNewtonRaphsonStoppingCriteria { conv_eps_per_eq })
            }
            StoppingCriteriaType::PerEquationType(criteria) => Box::new(criteria),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let tolerances = match self {
            StoppingCriteriaType::Uniform { conv_eps_per_eq } => vec![*conv_eps_per_eq],
            StoppingCriteriaType::PerEquationType(c) => vec![
                c.max_active_power_mismatch,
                c.max_reactive_power_mismatch,
                c.max_voltage_mismatch,
                c.max_angle_mismatch,
                c.max_ratio_mismatch,
                c.max_susceptance_mismatch,
            ],
        };
        if tolerances.iter().any(|&eps| !(eps > 0.0)) {
            return Err(format!("stopping criteria tolerances must be > 0: {:?}", self));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Builder)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct NewtonRaphsonParameters {
    /// Maximum number of iterations of one run.
    pub max_iterations: usize,

    pub stopping_criteria: StoppingCriteriaType,
}

pub const DEFAULT_MAX_ITERATIONS: usize = 15;

impl Default for NewtonRaphsonParameters {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stopping_criteria: StoppingCriteriaType::default(),
        }
    }
}

impl NewtonRaphsonParametersBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(max_iterations) = self.max_iterations {
            if max_iterations < 1 {
                return Err(format!(
                    "max_iterations must be >= 1, got {}",
                    max_iterations
                ));
            }
        }
        if let Some(criteria) = &self.stopping_criteria {
            criteria.validate()?;
        }
        Ok(())
    }
}

/// Discrete or control adjustment run between Newton-Raphson solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OuterLoopType {
    ReactiveLimits,
    DistributedSlack,
    TransformerVoltageControl,
    ShuntVoltageControl,
}

impl OuterLoopType {
    pub fn name(&self) -> &'static str {
        match self {
            OuterLoopType::ReactiveLimits => "ReactiveLimits",
            OuterLoopType::DistributedSlack => "DistributedSlack",
            OuterLoopType::TransformerVoltageControl => "TransformerVoltageControl",
            OuterLoopType::ShuntVoltageControl => "ShuntVoltageControl",
        }
    }
}

impl fmt::Display for OuterLoopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OuterLoopType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ReactiveLimits" => Ok(OuterLoopType::ReactiveLimits),
            "DistributedSlack" => Ok(OuterLoopType::DistributedSlack),
            "TransformerVoltageControl" => Ok(OuterLoopType::TransformerVoltageControl),
            "ShuntVoltageControl" => Ok(OuterLoopType::ShuntVoltageControl),
            _ => Err(anyhow!("unknown outer loop '{}'", s)),
        }
    }
}

/// Parses outer loop names, rejecting unknown names and duplicates.
pub fn parse_outer_loop_names(names: &[String]) -> Result<Vec<OuterLoopType>> {
    let mut types = Vec::with_capacity(names.len());
    let mut seen = BTreeSet::new();
    for name in names {
        let kind: OuterLoopType = name.trim().parse()?;
        if !seen.insert(kind) {
            bail!("outer loop '{}' is configured more than once", kind);
        }
        types.push(kind);
    }
    Ok(types)
}

#[derive(Debug, Clone, Builder)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct AcLoadFlowParameters {
    pub newton_raphson: NewtonRaphsonParameters,

    /// Maximum number of Newton-Raphson solves separated by outer loop
    /// checks.
    pub max_outer_iterations: usize,

    /// Initializer of the first solve. Later solves restart from the
    /// previous solution.
    pub voltage_init_mode: VoltageInitMode,

    /// Outer loops, in check order.
    pub outer_loop_names: Vec<String>,

    /// Slack active power mismatch tolerated by slack distribution (p.u.).
    pub slack_bus_p_max_mismatch: f64,

    /// Maximum tap position change per outer iteration.
    pub max_tap_shift: usize,

    /// Maximum shunt section count change per outer iteration.
    pub max_section_shift: usize,

    /// Maximum number of PQ to PV switches of one bus.
    pub max_pq_pv_switches: usize,
}

pub const DEFAULT_MAX_OUTER_ITERATIONS: usize = 20;

impl Default for AcLoadFlowParameters {
    fn default() -> Self {
        Self {
            newton_raphson: NewtonRaphsonParameters::default(),
            max_outer_iterations: DEFAULT_MAX_OUTER_ITERATIONS,
            voltage_init_mode: VoltageInitMode::Uniform,
            outer_loop_names: Vec::new(),
            slack_bus_p_max_mismatch: 0.01,
            max_tap_shift: 3,
            max_section_shift: 3,
            max_pq_pv_switches: 2,
        }
    }
}

impl AcLoadFlowParameters {
    pub fn outer_loop_types(&self) -> Result<Vec<OuterLoopType>> {
        parse_outer_loop_names(&self.outer_loop_names)
    }
}

impl AcLoadFlowParametersBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(max_outer_iterations) = self.max_outer_iterations {
            if max_outer_iterations < 1 {
                return Err(format!(
                    "max_outer_iterations must be >= 1, got {}",
                    max_outer_iterations
                ));
            }
        }
        if let Some(names) = &self.outer_loop_names {
            parse_outer_loop_names(names).map_err(|err| err.to_string())?;
        }
        if let Some(mismatch) = self.slack_bus_p_max_mismatch {
            if !(mismatch > 0.0) {
                return Err(format!(
                    "slack_bus_p_max_mismatch must be > 0, got {}",
                    mismatch
                ));
            }
        }
        if self.max_tap_shift == Some(0) || self.max_section_shift == Some(0) {
            return Err("discrete control step caps must be >= 1".to_string());
        }
        Ok(())
    }
}
