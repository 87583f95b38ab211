use crate::ac_system::{create_ac_equation_system, AcEquationSystemParameters};
use crate::equation_system::EquationSystem;
use crate::initializer::{voltage_initializer, PreviousValueVoltageInitializer, VoltageInitializer};
use crate::matrix::{MatrixFactory, SparseMatrixFactory};
use crate::network::Network;
use crate::newton_raphson::{NewtonRaphson, NewtonRaphsonStatus};
use crate::observer::{AcLoadFlowObserver, MultipleAcLoadFlowObserver};
use crate::outer_loop::{create_outer_loops, OuterLoop, OuterLoopContext, OuterLoopStatus};
use crate::parameters::{AcLoadFlowParameters, OuterLoopType};

use anyhow::Result;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum AcLoadFlowStatus {
    NoCalculation,
    Converged,
    MaxIterationReached,
    SolverFailed,
    MaxOuterIterations,
}

impl From<NewtonRaphsonStatus> for AcLoadFlowStatus {
    fn from(status: NewtonRaphsonStatus) -> Self {
        match status {
            NewtonRaphsonStatus::NotStarted | NewtonRaphsonStatus::Iterating => {
                AcLoadFlowStatus::NoCalculation
            }
            NewtonRaphsonStatus::Converged => AcLoadFlowStatus::Converged,
            NewtonRaphsonStatus::MaxIterationReached => AcLoadFlowStatus::MaxIterationReached,
            NewtonRaphsonStatus::SolverFailed => AcLoadFlowStatus::SolverFailed,
        }
    }
}

impl fmt::Display for AcLoadFlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcLoadFlowStatus::NoCalculation => "NO_CALCULATION",
            AcLoadFlowStatus::Converged => "CONVERGED",
            AcLoadFlowStatus::MaxIterationReached => "MAX_ITERATION_REACHED",
            AcLoadFlowStatus::SolverFailed => "SOLVER_FAILED",
            AcLoadFlowStatus::MaxOuterIterations => "MAX_OUTER_ITERATIONS",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcLoadFlowResult {
    pub status: AcLoadFlowStatus,

    /// Newton-Raphson runs triggered by an unstable outer loop.
    pub outer_iterations: usize,

    /// Newton-Raphson iterations over all runs.
    pub newton_raphson_iterations: usize,

    /// Slack bus active power mismatch of the last converged run (p.u.).
    pub slack_bus_active_power_mismatch: f64,
}

/// Network and configuration of a load flow, and its last results.
pub struct AcLoadFlowContext {
    network: Network,
    parameters: AcLoadFlowParameters,
    matrix_factory: Rc<dyn MatrixFactory>,
    /// Kept across runs, a loop undoes its own changes when initialized.
    outer_loops: Vec<Box<dyn OuterLoop>>,
    equation_system: Option<EquationSystem>,
    result: Option<AcLoadFlowResult>,
}

impl AcLoadFlowContext {
    /// Fails on an inconsistent network or outer loop configuration.
    pub fn new(network: Network, parameters: AcLoadFlowParameters) -> Result<Self> {
        network.validate()?;
        let outer_loops = create_outer_loops(&parameters)?;
        Ok(Self {
            network,
            parameters,
            matrix_factory: Rc::new(SparseMatrixFactory::default()),
            outer_loops,
            equation_system: None,
            result: None,
        })
    }

    pub fn with_matrix_factory(mut self, matrix_factory: Rc<dyn MatrixFactory>) -> Self {
        self.matrix_factory = matrix_factory;
        self
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn parameters(&self) -> &AcLoadFlowParameters {
        &self.parameters
    }

    /// Equation system of the last run.
    pub fn equation_system(&self) -> Option<&EquationSystem> {
        self.equation_system.as_ref()
    }

    pub fn result(&self) -> Option<&AcLoadFlowResult> {
        self.result.as_ref()
    }

    pub fn into_network(self) -> Network {
        self.network
    }
}

/// Runs Newton-Raphson solves separated by outer loop checks until every
/// outer loop is stable.
pub struct AcLoadFlowEngine<'a> {
    context: &'a mut AcLoadFlowContext,
    observer: MultipleAcLoadFlowObserver,
    reinitialize: bool,
}

impl<'a> AcLoadFlowEngine<'a> {
    pub fn new(context: &'a mut AcLoadFlowContext) -> Self {
        Self {
            context,
            observer: MultipleAcLoadFlowObserver::default(),
            reinitialize: false,
        }
    }

    pub fn add_observer(mut self, observer: Box<dyn AcLoadFlowObserver>) -> Self {
        self.observer.add(observer);
        self
    }

    /// Uses the configured voltage initializer even if the context was
    /// already solved, instead of restarting from the previous solution.
    pub fn reinitialize(mut self) -> Self {
        self.reinitialize = true;
        self
    }

    pub fn run(mut self) -> Result<AcLoadFlowResult> {
        let context = &mut *self.context;
        let parameters = context.parameters.clone();
        let observer = &mut self.observer;

        let outer_loops = &mut context.outer_loops;
        for outer_loop in outer_loops.iter_mut() {
            outer_loop.initialize(&mut context.network)?;
        }
        let kinds: Vec<OuterLoopType> = outer_loops.iter().map(|l| l.kind()).collect();

        observer.before_equation_system_creation(&context.network);
        let mut system = create_ac_equation_system(
            &context.network,
            &AcEquationSystemParameters {
                transformer_ratio_variables: kinds
                    .contains(&OuterLoopType::TransformerVoltageControl),
                shunt_susceptance_variables: kinds.contains(&OuterLoopType::ShuntVoltageControl),
            },
        )?;
        let equations = system.sorted_equations_to_solve().len();
        let variables = system.sorted_variables_to_find().len();
        observer.after_equation_system_creation(equations, variables);

        let mut initializer: Box<dyn VoltageInitializer> =
            if context.result.is_some() && !self.reinitialize {
                Box::new(PreviousValueVoltageInitializer)
            } else {
                voltage_initializer(parameters.voltage_init_mode)
            };
        let mut newton_raphson =
            NewtonRaphson::new(&parameters.newton_raphson, context.matrix_factory.clone());

        let mut status = AcLoadFlowStatus::NoCalculation;
        let mut outer_iterations = 0;
        let mut solve_count = 0;
        let mut slack_bus_active_power_mismatch = f64::NAN;

        for _ in 0..parameters.max_outer_iterations {
            let result = newton_raphson.run(
                &mut system,
                &mut context.network,
                initializer.as_mut(),
                observer,
            )?;
            if result.status != NewtonRaphsonStatus::Converged {
                status = result.status.into();
                break;
            }
            solve_count += 1;
            slack_bus_active_power_mismatch = result.slack_bus_active_power_mismatch;
            initializer = Box::new(PreviousValueVoltageInitializer);

            let mut unstable = None;
            for outer_loop in outer_loops.iter_mut() {
                observer.before_outer_loop_body(outer_iterations, outer_loop.name());
                let mut outer_context = OuterLoopContext {
                    network: &mut context.network,
                    system: &mut system,
                    newton_raphson: &mut newton_raphson,
                    last_result: result,
                    outer_iteration: outer_iterations,
                    solve_count,
                };
                let outer_status = outer_loop.check(&mut outer_context)?;
                observer.after_outer_loop_body(outer_iterations, outer_loop.name());
                log::debug!(
                    "outer loop {} at iteration {}: {}",
                    outer_loop.name(),
                    outer_iterations,
                    outer_status
                );
                if outer_status == OuterLoopStatus::Unstable {
                    unstable = Some(outer_loop.name());
                    break;
                }
            }

            match unstable {
                None => {
                    status = AcLoadFlowStatus::Converged;
                    break;
                }
                Some(name) => {
                    log::debug!("outer loop {} unstable, solving again", name);
                    outer_iterations += 1;
                }
            }
        }
        if status == AcLoadFlowStatus::NoCalculation {
            status = AcLoadFlowStatus::MaxOuterIterations;
        }

        let result = AcLoadFlowResult {
            status,
            outer_iterations,
            newton_raphson_iterations: newton_raphson.total_iterations(),
            slack_bus_active_power_mismatch,
        };
        newton_raphson.close();

        log::info!(
            "AC load flow of '{}': {} after {} outer iterations and {} Newton-Raphson iterations",
            context.network.name,
            result.status,
            result.outer_iterations,
            result.newton_raphson_iterations
        );
        context.equation_system = Some(system);
        context.result = Some(result);
        Ok(result)
    }
}
