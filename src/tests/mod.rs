mod load_flow;
mod newton_raphson;
mod outer_loops;

use crate::matrix::{LUDecomposition, Matrix, MatrixFactory, SparseMatrixFactory};
use crate::network::{Branch, Bus, Generator, Network, Shunt, ShuntSections, TapChanger};
use crate::observer::AcLoadFlowObserver;
use anyhow::{bail, Result};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) fn assert_near(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {} +/- {}, got {}",
        expected,
        tol,
        actual
    );
}

/// Slack bus feeding a 1 + j0.5 p.u. load through a transformer whose
/// tap changer regulates the load bus voltage to 1 p.u.
pub(crate) fn tap_changer_network() -> Network {
    let mut net = Network::new("tap-changer");
    net.buses.push(Bus::new(0, "source").slack());
    net.buses.push(Bus::new(1, "load").load(1.0, 0.5));
    net.generators
        .push(Generator::new(0, 0, 0.0).voltage_control(1.0));
    net.branches
        .push(Branch::new(0, 0, 1, 0.0, 0.1).tap_changer(TapChanger {
            ratios: (0..17).map(|i| 0.9 + 0.0125 * i as f64).collect(),
            position: 8,
            regulating: true,
            controlled_bus: 1,
            target_v: 1.0,
            target_deadband: 0.02,
        }));
    net
}

/// Same load behind a line, with a switchable capacitor bank regulating
/// the load bus voltage to 1 p.u.
pub(crate) fn shunt_network() -> Network {
    let mut net = Network::new("shunt");
    net.buses.push(Bus::new(0, "source").slack());
    net.buses.push(Bus::new(1, "load").load(1.0, 0.5));
    net.generators
        .push(Generator::new(0, 0, 0.0).voltage_control(1.0));
    net.branches.push(Branch::new(0, 0, 1, 0.0, 0.1));
    net.shunts.push(Shunt::new(0, 1, 0.0, 0.0).sections(ShuntSections {
        b_per_section: 0.1,
        maximum_section_count: 10,
        section_count: 0,
        regulating: true,
        target_v: 1.0,
        target_deadband: 0.02,
    }));
    net
}

/// Records observer events as strings.
#[derive(Clone, Default)]
pub(crate) struct RecordingObserver {
    pub events: Rc<RefCell<Vec<String>>>,
    pub norms: Rc<RefCell<Vec<(usize, f64)>>>,
}

impl RecordingObserver {
    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl AcLoadFlowObserver for RecordingObserver {
    fn before_equation_system_creation(&mut self, _network: &Network) {
        self.push("before_equation_system_creation".to_string());
    }

    fn after_equation_system_creation(&mut self, equations: usize, variables: usize) {
        self.push(format!(
            "after_equation_system_creation({}, {})",
            equations, variables
        ));
    }

    fn before_voltage_initializer_preparation(&mut self) {
        self.push("before_voltage_initializer_preparation".to_string());
    }

    fn after_voltage_initializer_preparation(&mut self) {
        self.push("after_voltage_initializer_preparation".to_string());
    }

    fn begin_iteration(&mut self, iteration: usize) {
        self.push(format!("begin_iteration({})", iteration));
    }

    fn end_iteration(&mut self, iteration: usize) {
        self.push(format!("end_iteration({})", iteration));
    }

    fn norm(&mut self, iteration: usize, norm: f64) {
        self.norms.borrow_mut().push((iteration, norm));
    }

    fn before_lu_decomposition(&mut self, iteration: usize) {
        self.push(format!("before_lu_decomposition({})", iteration));
    }

    fn after_lu_decomposition(&mut self, iteration: usize) {
        self.push(format!("after_lu_decomposition({})", iteration));
    }

    fn before_outer_loop_body(&mut self, outer_iteration: usize, outer_loop: &str) {
        self.push(format!("before_outer_loop_body({}, {})", outer_iteration, outer_loop));
    }

    fn after_outer_loop_body(&mut self, outer_iteration: usize, outer_loop: &str) {
        self.push(format!("after_outer_loop_body({}, {})", outer_iteration, outer_loop));
    }
}

/// Creates sparse matrices whose decomposition always fails.
pub(crate) struct FailingMatrixFactory;

struct FailingMatrix {
    inner: Box<dyn Matrix>,
}

impl MatrixFactory for FailingMatrixFactory {
    fn create(&self, rows: usize, columns: usize, estimated_nnz: usize) -> Box<dyn Matrix> {
        Box::new(FailingMatrix {
            inner: SparseMatrixFactory::default().create(rows, columns, estimated_nnz),
        })
    }
}

impl Matrix for FailingMatrix {
    fn row_count(&self) -> usize {
        self.inner.row_count()
    }

    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn add_and_get_index(&mut self, row: usize, column: usize, value: f64) -> usize {
        self.inner.add_and_get_index(row, column, value)
    }

    fn add_at_index(&mut self, index: usize, value: f64) {
        self.inner.add_at_index(index, value)
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn entries(&self) -> Vec<(usize, usize, f64)> {
        self.inner.entries()
    }

    fn decompose_lu(&self) -> Result<Box<dyn LUDecomposition>> {
        bail!("matrix is singular")
    }

    fn to_table(&self) -> String {
        self.inner.to_table()
    }
}
