use crate::equation::EquationType;
use crate::equation_system::EquationSystem;
use crate::initializer::VoltageInitializer;
use crate::jacobian::JacobianMatrix;
use crate::math::norm_inf;
use crate::matrix::MatrixFactory;
use crate::network::Network;
use crate::observer::AcLoadFlowObserver;
use crate::parameters::NewtonRaphsonParameters;
use crate::stopping_criteria::NewtonRaphsonStoppingCriteria;

use anyhow::{bail, ensure, Result};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum NewtonRaphsonStatus {
    NotStarted,
    Iterating,
    Converged,
    MaxIterationReached,
    SolverFailed,
}

impl fmt::Display for NewtonRaphsonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NewtonRaphsonStatus::NotStarted => "NOT_STARTED",
            NewtonRaphsonStatus::Iterating => "ITERATING",
            NewtonRaphsonStatus::Converged => "CONVERGED",
            NewtonRaphsonStatus::MaxIterationReached => "MAX_ITERATION_REACHED",
            NewtonRaphsonStatus::SolverFailed => "SOLVER_FAILED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewtonRaphsonResult {
    pub status: NewtonRaphsonStatus,

    /// Iterations of this run.
    pub iterations: usize,

    /// Active power the slack bus injects beyond its target (p.u.). NaN
    /// unless converged.
    pub slack_bus_active_power_mismatch: f64,
}

/// Newton-Raphson session.
///
/// Owns the Jacobian and its LU decomposition across repeated runs: the
/// Jacobian is only rebuilt when the equation system structure changed since
/// the previous run, otherwise its values are updated in place.
pub struct NewtonRaphson {
    parameters: NewtonRaphsonParameters,
    stopping_criteria: Box<dyn NewtonRaphsonStoppingCriteria>,
    matrix_factory: Rc<dyn MatrixFactory>,
    jacobian: Option<JacobianMatrix>,
    x: Vec<f64>,
    /// Structure version `x` is indexed for.
    x_version: Option<u64>,
    status: NewtonRaphsonStatus,
    total_iterations: usize,
}

impl NewtonRaphson {
    pub fn new(parameters: &NewtonRaphsonParameters, matrix_factory: Rc<dyn MatrixFactory>) -> Self {
        Self {
            parameters: parameters.clone(),
            stopping_criteria: parameters.stopping_criteria.criteria(),
            matrix_factory,
            jacobian: None,
            x: Vec::new(),
            x_version: None,
            status: NewtonRaphsonStatus::NotStarted,
            total_iterations: 0,
        }
    }

    pub fn status(&self) -> NewtonRaphsonStatus {
        self.status
    }

    /// Iterations over every run of this session.
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn matrix_factory(&self) -> &dyn MatrixFactory {
        self.matrix_factory.as_ref()
    }

    pub fn jacobian(&self) -> Option<&JacobianMatrix> {
        self.jacobian.as_ref()
    }

    /// State vector of the last run.
    pub fn state_vector(&self) -> &[f64] {
        &self.x
    }

    /// Solves the active equations of `system`, starting from the voltages
    /// given by `initializer`. The network is only written back when the run
    /// converges.
    pub fn run(
        &mut self,
        system: &mut EquationSystem,
        network: &mut Network,
        initializer: &mut dyn VoltageInitializer,
        observer: &mut dyn AcLoadFlowObserver,
    ) -> Result<NewtonRaphsonResult> {
        observer.before_voltage_initializer_preparation();
        initializer.prepare(network, self.matrix_factory.as_ref())?;
        observer.after_voltage_initializer_preparation();

        let mut x = system.create_state_vector(network, initializer)?;
        let targets = system.create_target_vector(network)?;
        ensure!(
            x.len() == targets.len(),
            "{} equations to solve for {} variables",
            targets.len(),
            x.len()
        );

        system.update_equations(&x);
        let mut fx = system.create_equation_vector();
        subtract(&mut fx, &targets);

        self.status = NewtonRaphsonStatus::Iterating;
        let mut iteration = 0;

        let test = self
            .stopping_criteria
            .test(&fx, system.sorted_equations_to_solve());
        observer.state_vector(iteration, &x);
        observer.equation_vector(iteration, &fx);
        observer.norm(iteration, test.norm);
        log::debug!("norm_f{}: {} (max {})", iteration, test.norm, norm_inf(&fx));
        if test.stop {
            self.status = NewtonRaphsonStatus::Converged;
        }

        while self.status == NewtonRaphsonStatus::Iterating {
            if iteration >= self.parameters.max_iterations {
                self.status = NewtonRaphsonStatus::MaxIterationReached;
                break;
            }
            iteration += 1;
            observer.begin_iteration(iteration);

            // evaluate Jacobian
            observer.before_jacobian_build(iteration);
            let jacobian = self.ensure_jacobian(system)?;
            observer.after_jacobian_build(iteration);
            log::trace!("J_{}:\n{}", iteration, jacobian.matrix().to_table());

            observer.before_lu_decomposition(iteration);
            let lu = jacobian.decompose_lu();
            observer.after_lu_decomposition(iteration);
            if let Err(err) = lu {
                log::warn!("Jacobian decomposition failed at iteration {}: {}", iteration, err);
                self.status = NewtonRaphsonStatus::SolverFailed;
                observer.end_iteration(iteration);
                break;
            }

            // compute update step
            let mut dx = fx.clone();
            observer.before_linear_solve(iteration);
            let solved = jacobian.solve(&mut dx);
            observer.after_linear_solve(iteration);
            if let Err(err) = solved {
                log::warn!("linear solve failed at iteration {}: {}", iteration, err);
                self.status = NewtonRaphsonStatus::SolverFailed;
                observer.end_iteration(iteration);
                break;
            }

            subtract(&mut x, &dx);
            system.update_equations(&x);
            system.update_equation_vector(&mut fx);
            subtract(&mut fx, &targets);

            let test = self
                .stopping_criteria
                .test(&fx, system.sorted_equations_to_solve());
            observer.state_vector(iteration, &x);
            observer.equation_vector(iteration, &fx);
            observer.norm(iteration, test.norm);
            log::debug!("norm_f{}: {} (max {})", iteration, test.norm, norm_inf(&fx));
            if test.stop {
                self.status = NewtonRaphsonStatus::Converged;
            }
            observer.end_iteration(iteration);
        }
        self.total_iterations += iteration;

        let mut slack_bus_active_power_mismatch = f64::NAN;
        if self.status == NewtonRaphsonStatus::Converged {
            log::info!("Newton-Raphson converged in {} iterations", iteration);
            system.update_network(&x, network)?;
            slack_bus_active_power_mismatch = slack_bus_active_power_mismatch_of(system, network)?;
            network.update_flows(slack_bus_active_power_mismatch);
        } else {
            log::info!(
                "Newton-Raphson did not converge in {} iterations: {}",
                iteration,
                self.status
            );
        }
        self.x = x;
        self.x_version = Some(system.structure_version());

        Ok(NewtonRaphsonResult {
            status: self.status,
            iterations: iteration,
            slack_bus_active_power_mismatch,
        })
    }

    /// Jacobian of the current structure, rebuilt if the structure changed,
    /// updated in place otherwise.
    fn ensure_jacobian(&mut self, system: &mut EquationSystem) -> Result<&mut JacobianMatrix> {
        let version = system.structure_version();
        let rebuild = match &self.jacobian {
            Some(j) => j.structure_version() != version,
            None => true,
        };
        if rebuild {
            if let Some(mut old) = self.jacobian.take() {
                log::debug!("equation system structure changed, rebuilding Jacobian");
                old.clean_lu();
            }
            self.jacobian = Some(JacobianMatrix::create(system, self.matrix_factory.as_ref())?);
        } else if let Some(j) = self.jacobian.as_mut() {
            j.update(system);
        }
        match self.jacobian.as_mut() {
            Some(j) => Ok(j),
            None => unreachable!(),
        }
    }

    /// Solves `J^T w = rhs` in place at the state of the last run.
    ///
    /// `w[row(eq)]` is then the sensitivity of the quantity selected by
    /// `rhs` to the target of equation `eq`.
    pub fn calculate_sensitivities(
        &mut self,
        system: &mut EquationSystem,
        rhs: &mut [f64],
    ) -> Result<()> {
        ensure!(
            self.x_version == Some(system.structure_version()),
            "equation system changed since the last Newton-Raphson run"
        );
        system.update_equations(&self.x);
        let jacobian = self.ensure_jacobian(system)?;
        jacobian.decompose_lu()?;
        jacobian.solve_transposed(rhs)
    }

    /// Releases the Jacobian and its decomposition.
    pub fn close(mut self) {
        if let Some(mut jacobian) = self.jacobian.take() {
            jacobian.clean_lu();
        }
    }
}

fn subtract(a: &mut [f64], b: &[f64]) {
    a.iter_mut().zip(b).for_each(|(a, b)| *a -= b);
}

/// Active power the slack bus injects beyond its target: the value of its
/// (inactive) active power equation less the target.
pub fn slack_bus_active_power_mismatch_of(
    system: &mut EquationSystem,
    network: &Network,
) -> Result<f64> {
    let slack = match network.slack_bus() {
        Some(bus) => bus.num,
        None => bail!("network '{}' has no slack bus", network.name),
    };
    let id = crate::equation::EquationId {
        num: slack,
        kind: EquationType::BusP,
    };
    let value = match system.evaluate(id) {
        Some(value) => value,
        None => return Ok(f64::NAN),
    };
    let rhs = system.equation(id).map_or(0.0, |eq| eq.rhs());
    Ok(value - (system.target(id, network)? - rhs))
}
