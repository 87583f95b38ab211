use crate::equation_system::{EquationSystem, JacobianCell};
use crate::matrix::{LUDecomposition, Matrix, MatrixFactory};
use anyhow::{ensure, Result};

/// Jacobian of the active equations of an [`EquationSystem`].
///
/// The sparse structure is captured once at creation: one matrix element
/// per `(equation term, variable)` pair, duplicates accumulating into the
/// same element. `update` then only rewrites values, and the LU
/// decomposition is refreshed in place after the first one. A structural
/// change of the equation system requires a new `JacobianMatrix`.
pub struct JacobianMatrix {
    matrix: Box<dyn Matrix>,
    cells: Vec<JacobianCell>,
    elements: Vec<usize>,
    lu: Option<Box<dyn LUDecomposition>>,
    structure_version: u64,
}

impl JacobianMatrix {
    pub fn create(system: &mut EquationSystem, factory: &dyn MatrixFactory) -> Result<Self> {
        let rows = system.sorted_equations_to_solve().len();
        let columns = system.sorted_variables_to_find().len();
        ensure!(
            rows == columns,
            "Jacobian matrix must be square: {} equations for {} variables",
            rows,
            columns
        );

        let cells = system.jacobian_cells();
        let mut matrix = factory.create(rows, columns, cells.len());
        let elements = cells
            .iter()
            .map(|c| {
                let value = system.term_der(c.slot, c.term, c.variable);
                matrix.add_and_get_index(c.row, c.column, value)
            })
            .collect();
        log::debug!(
            "Jacobian matrix {}x{} created with {} non-zeros",
            rows,
            columns,
            matrix.entries().len()
        );

        Ok(Self {
            matrix,
            cells,
            elements,
            lu: None,
            structure_version: system.structure_version(),
        })
    }

    /// Structure version of the equation system this matrix was built for.
    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    /// Recomputes every element from the current term state, keeping the
    /// sparsity pattern.
    pub fn update(&mut self, system: &EquationSystem) {
        assert_eq!(
            self.structure_version,
            system.structure_version(),
            "equation system structure changed since Jacobian creation"
        );
        self.matrix.reset();
        for (c, &element) in self.cells.iter().zip(self.elements.iter()) {
            let value = system.term_der(c.slot, c.term, c.variable);
            self.matrix.add_at_index(element, value);
        }
    }

    /// Full decomposition the first time, in place refresh afterwards.
    pub fn decompose_lu(&mut self) -> Result<()> {
        match self.lu.as_mut() {
            Some(lu) => lu.update(self.matrix.as_ref())?,
            None => self.lu = Some(self.matrix.decompose_lu()?),
        }
        Ok(())
    }

    /// Solves `J x = b` in place, decomposing first if needed.
    pub fn solve(&mut self, b: &mut [f64]) -> Result<()> {
        if self.lu.is_none() {
            self.decompose_lu()?;
        }
        match &self.lu {
            Some(lu) => lu.solve(b),
            None => unreachable!(),
        }
    }

    /// Solves `J^T x = b` in place, decomposing first if needed.
    pub fn solve_transposed(&mut self, b: &mut [f64]) -> Result<()> {
        if self.lu.is_none() {
            self.decompose_lu()?;
        }
        match &self.lu {
            Some(lu) => lu.solve_transposed(b),
            None => unreachable!(),
        }
    }

    pub fn matrix(&self) -> &dyn Matrix {
        self.matrix.as_ref()
    }

    /// Releases the LU decomposition. Safe to call more than once.
    pub fn clean_lu(&mut self) {
        if self.lu.take().is_some() {
            log::trace!("Jacobian LU decomposition released");
        }
    }
}

impl Drop for JacobianMatrix {
    fn drop(&mut self) {
        self.clean_lu();
    }
}
