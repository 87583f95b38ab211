use crate::debug::format_f64_vec;
use crate::network::Network;

/// Hooks into the load flow lifecycle. Every method defaults to a no-op.
pub trait AcLoadFlowObserver {
    fn before_equation_system_creation(&mut self, _network: &Network) {}

    fn after_equation_system_creation(&mut self, _equations: usize, _variables: usize) {}

    fn before_voltage_initializer_preparation(&mut self) {}

    fn after_voltage_initializer_preparation(&mut self) {}

    fn begin_iteration(&mut self, _iteration: usize) {}

    fn end_iteration(&mut self, _iteration: usize) {}

    /// Mismatch norm after `iteration` Newton steps, `0` being the initial
    /// state.
    fn norm(&mut self, _iteration: usize, _norm: f64) {}

    fn state_vector(&mut self, _iteration: usize, _x: &[f64]) {}

    fn equation_vector(&mut self, _iteration: usize, _fx: &[f64]) {}

    fn before_jacobian_build(&mut self, _iteration: usize) {}

    fn after_jacobian_build(&mut self, _iteration: usize) {}

    fn before_lu_decomposition(&mut self, _iteration: usize) {}

    fn after_lu_decomposition(&mut self, _iteration: usize) {}

    fn before_linear_solve(&mut self, _iteration: usize) {}

    fn after_linear_solve(&mut self, _iteration: usize) {}

    fn before_outer_loop_body(&mut self, _outer_iteration: usize, _outer_loop: &str) {}

    fn after_outer_loop_body(&mut self, _outer_iteration: usize, _outer_loop: &str) {}
}

/// Forwards every event to a list of observers, in order.
#[derive(Default)]
pub struct MultipleAcLoadFlowObserver {
    observers: Vec<Box<dyn AcLoadFlowObserver>>,
}

impl MultipleAcLoadFlowObserver {
    pub fn add(&mut self, observer: Box<dyn AcLoadFlowObserver>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

macro_rules! forward {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            fn $name(&mut self, $($arg: $ty),*) {
                for o in self.observers.iter_mut() {
                    o.$name($($arg),*);
                }
            }
        )*
    };
}

impl AcLoadFlowObserver for MultipleAcLoadFlowObserver {
    forward! {
        before_equation_system_creation(network: &Network);
        after_equation_system_creation(equations: usize, variables: usize);
        before_voltage_initializer_preparation();
        after_voltage_initializer_preparation();
        begin_iteration(iteration: usize);
        end_iteration(iteration: usize);
        norm(iteration: usize, norm: f64);
        state_vector(iteration: usize, x: &[f64]);
        equation_vector(iteration: usize, fx: &[f64]);
        before_jacobian_build(iteration: usize);
        after_jacobian_build(iteration: usize);
        before_lu_decomposition(iteration: usize);
        after_lu_decomposition(iteration: usize);
        before_linear_solve(iteration: usize);
        after_linear_solve(iteration: usize);
        before_outer_loop_body(outer_iteration: usize, outer_loop: &str);
        after_outer_loop_body(outer_iteration: usize, outer_loop: &str);
    }
}

/// Logs the mismatch norm of each iteration as a table, and the state and
/// mismatch vectors at trace level.
#[derive(Default)]
pub struct LoggingObserver;

impl AcLoadFlowObserver for LoggingObserver {
    fn after_equation_system_creation(&mut self, equations: usize, variables: usize) {
        log::debug!(
            "equation system created: {} equations, {} variables",
            equations,
            variables
        );
    }

    fn norm(&mut self, iteration: usize, norm: f64) {
        if iteration == 0 {
            log::info!(" it    ||f||2 mismatch (p.u.)");
            log::info!("----  ------------------------");
        }
        log::info!("{:3}        {:10.3e}", iteration, norm);
    }

    fn state_vector(&mut self, iteration: usize, x: &[f64]) {
        log::trace!("x_{}: {}", iteration, format_f64_vec(x));
    }

    fn equation_vector(&mut self, iteration: usize, fx: &[f64]) {
        log::trace!("F_{}: {}", iteration, format_f64_vec(fx));
    }

    fn before_outer_loop_body(&mut self, outer_iteration: usize, outer_loop: &str) {
        log::debug!("outer iteration {}: checking {}", outer_iteration, outer_loop);
    }
}
