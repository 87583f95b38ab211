use anyhow::{bail, ensure, Result};
use sparsetools::coo::Coo;
use spsolve::rlu::RLU;
use spsolve::Solver;
use std::collections::HashMap;
use std::rc::Rc;

/// Square or rectangular sparse matrix assembled element by element.
///
/// Elements are identified by the index returned when first added, which
/// stays valid until the matrix is dropped. `reset` zeroes values but keeps
/// the pattern.
pub trait Matrix {
    fn row_count(&self) -> usize;

    fn column_count(&self) -> usize;

    /// Adds `value` to the element at `(row, column)`, creating it if
    /// needed, and returns the element index.
    fn add_and_get_index(&mut self, row: usize, column: usize, value: f64) -> usize;

    fn add_at_index(&mut self, index: usize, value: f64);

    fn reset(&mut self);

    /// `(row, column, value)` of each element, in element index order.
    fn entries(&self) -> Vec<(usize, usize, f64)>;

    fn decompose_lu(&self) -> Result<Box<dyn LUDecomposition>>;

    fn to_table(&self) -> String;
}

/// Factorization of a square matrix, refreshed in place as long as the
/// element pattern is unchanged.
pub trait LUDecomposition {
    /// Refactorizes from new values of the matrix this decomposition was
    /// computed from.
    fn update(&mut self, matrix: &dyn Matrix) -> Result<()>;

    /// Solves `A x = b` in place.
    fn solve(&self, b: &mut [f64]) -> Result<()>;

    /// Solves `A^T x = b` in place.
    fn solve_transposed(&self, b: &mut [f64]) -> Result<()>;
}

pub trait MatrixFactory {
    fn create(&self, rows: usize, columns: usize, estimated_nnz: usize) -> Box<dyn Matrix>;
}

/// Creates sparse matrices solved with an `spsolve` solver.
#[derive(Clone)]
pub struct SparseMatrixFactory {
    solver: Rc<dyn Solver<usize, f64>>,
}

impl SparseMatrixFactory {
    pub fn new(solver: Rc<dyn Solver<usize, f64>>) -> Self {
        Self { solver }
    }
}

impl Default for SparseMatrixFactory {
    fn default() -> Self {
        Self::new(Rc::new(RLU::default()))
    }
}

impl MatrixFactory for SparseMatrixFactory {
    fn create(&self, rows: usize, columns: usize, estimated_nnz: usize) -> Box<dyn Matrix> {
        Box::new(SparseMatrix::new(
            rows,
            columns,
            estimated_nnz,
            self.solver.clone(),
        ))
    }
}

pub struct SparseMatrix {
    rows: usize,
    columns: usize,
    cells: HashMap<(usize, usize), usize>,
    rowidx: Vec<usize>,
    colidx: Vec<usize>,
    values: Vec<f64>,
    solver: Rc<dyn Solver<usize, f64>>,
}

impl SparseMatrix {
    fn new(rows: usize, columns: usize, nnz: usize, solver: Rc<dyn Solver<usize, f64>>) -> Self {
        Self {
            rows,
            columns,
            cells: HashMap::with_capacity(nnz),
            rowidx: Vec::with_capacity(nnz),
            colidx: Vec::with_capacity(nnz),
            values: Vec::with_capacity(nnz),
            solver,
        }
    }
}

impl Matrix for SparseMatrix {
    fn row_count(&self) -> usize {
        self.rows
    }

    fn column_count(&self) -> usize {
        self.columns
    }

    fn add_and_get_index(&mut self, row: usize, column: usize, value: f64) -> usize {
        assert!(
            row < self.rows && column < self.columns,
            "element ({}, {}) outside of {}x{} matrix",
            row,
            column,
            self.rows,
            self.columns
        );
        match self.cells.get(&(row, column)) {
            Some(&index) => {
                self.values[index] += value;
                index
            }
            None => {
                let index = self.values.len();
                self.cells.insert((row, column), index);
                self.rowidx.push(row);
                self.colidx.push(column);
                self.values.push(value);
                index
            }
        }
    }

    fn add_at_index(&mut self, index: usize, value: f64) {
        self.values[index] += value;
    }

    fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    fn entries(&self) -> Vec<(usize, usize, f64)> {
        (0..self.values.len())
            .map(|i| (self.rowidx[i], self.colidx[i], self.values[i]))
            .collect()
    }

    fn decompose_lu(&self) -> Result<Box<dyn LUDecomposition>> {
        ensure!(
            self.rows == self.columns,
            "cannot decompose a non square {}x{} matrix",
            self.rows,
            self.columns
        );
        let mut lu = SparseLU::new(self.rows, &self.entries(), self.solver.clone());
        lu.update(self)?;
        Ok(Box::new(lu))
    }

    fn to_table(&self) -> String {
        match Coo::new(
            self.rows,
            self.columns,
            self.rowidx.clone(),
            self.colidx.clone(),
            self.values.clone(),
        ) {
            Ok(coo) => coo.to_csr().to_table(),
            Err(err) => format!("{}", err),
        }
    }
}

/// Compressed column copy of a [`SparseMatrix`] handed to the solver.
///
/// `spsolve` solvers factorize on every call, so the decomposition holds the
/// frozen compressed pattern and its values.
struct SparseLU {
    n: usize,
    /// Element `(row, column)` pattern the decomposition was built for.
    pattern: Vec<(usize, usize)>,
    /// Element index to compressed position.
    positions: Vec<usize>,
    rowidx: Vec<usize>,
    colptr: Vec<usize>,
    values: Vec<f64>,
    solver: Rc<dyn Solver<usize, f64>>,
}

impl SparseLU {
    fn new(n: usize, entries: &[(usize, usize, f64)], solver: Rc<dyn Solver<usize, f64>>) -> Self {
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| (entries[i].1, entries[i].0));

        let mut positions = vec![0; entries.len()];
        let mut rowidx = Vec::with_capacity(entries.len());
        let mut colptr = vec![0; n + 1];
        for (pos, &i) in order.iter().enumerate() {
            let (row, column, _) = entries[i];
            positions[i] = pos;
            rowidx.push(row);
            colptr[column + 1] += 1;
        }
        for j in 0..n {
            colptr[j + 1] += colptr[j];
        }

        Self {
            n,
            pattern: entries.iter().map(|&(r, c, _)| (r, c)).collect(),
            positions,
            rowidx,
            colptr,
            values: vec![0.0; entries.len()],
            solver,
        }
    }

    fn solve_in_place(&self, b: &mut [f64], trans: bool) -> Result<()> {
        ensure!(
            b.len() == self.n,
            "right hand side length {} does not match matrix size {}",
            b.len(),
            self.n
        );
        self.solver.solve(
            self.n,
            &self.rowidx,
            &self.colptr,
            &self.values,
            b,
            trans,
        )?;
        if b.iter().any(|v| !v.is_finite()) {
            bail!("matrix is singular");
        }
        Ok(())
    }
}

impl LUDecomposition for SparseLU {
    fn update(&mut self, matrix: &dyn Matrix) -> Result<()> {
        let entries = matrix.entries();
        ensure!(
            entries.len() == self.pattern.len()
                && entries
                    .iter()
                    .zip(self.pattern.iter())
                    .all(|(&(r, c, _), &(pr, pc))| r == pr && c == pc),
            "matrix structure changed since LU decomposition"
        );
        for (i, &(_, _, value)) in entries.iter().enumerate() {
            self.values[self.positions[i]] = value;
        }
        // Empty columns make the matrix structurally singular.
        for j in 0..self.n {
            if self.colptr[j] == self.colptr[j + 1] {
                bail!("matrix is singular, column {} is empty", j);
            }
        }
        Ok(())
    }

    fn solve(&self, b: &mut [f64]) -> Result<()> {
        self.solve_in_place(b, false)
    }

    fn solve_transposed(&self, b: &mut [f64]) -> Result<()> {
        self.solve_in_place(b, true)
    }
}
