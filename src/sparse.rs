//! Sparse matrix helpers.
//!
//! Assembly accumulates (row, col, value) triplets and converts them to CSR
//! once, summing duplicates.

use nalgebra::DMatrix;
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix;

use crate::error::{FerrostaticError, Result};

pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self::with_capacity(n_rows, n_cols, 0)
    }

    pub fn with_capacity(n_rows: usize, n_cols: usize, nnz_estimate: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rows: Vec::with_capacity(nnz_estimate),
            cols: Vec::with_capacity(nnz_estimate),
            values: Vec::with_capacity(nnz_estimate),
        }
    }

    /// Adds a value at (row, col). Duplicates are summed during conversion.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "Row index out of bounds");
        debug_assert!(col < self.n_cols, "Column index out of bounds");

        if value != 0.0 {
            self.rows.push(row);
            self.cols.push(col);
            self.values.push(value);
        }
    }

    /// Adds a dense element matrix at the given global indices
    pub fn add_submatrix(&mut self, indices: &[usize], submatrix: &DMatrix<f64>) {
        debug_assert_eq!(submatrix.nrows(), indices.len());
        debug_assert_eq!(submatrix.ncols(), indices.len());

        for (i, &row) in indices.iter().enumerate() {
            for (j, &col) in indices.iter().enumerate() {
                self.add(row, col, submatrix[(i, j)]);
            }
        }
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Converts to CSR, summing duplicate entries
    pub fn to_csr(self) -> Result<CsrMatrix<f64>> {
        let coo = CooMatrix::try_from_triplets(
            self.n_rows,
            self.n_cols,
            self.rows,
            self.cols,
            self.values,
        )
        .map_err(|err| FerrostaticError::Assembly(format!("invalid triplet data: {err}")))?;

        Ok(CsrMatrix::from(&coo))
    }
}

/// y = A x
pub fn spmv(matrix: &CsrMatrix<f64>, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(matrix.ncols(), x.len());
    debug_assert_eq!(matrix.nrows(), y.len());

    let offsets = matrix.row_offsets();
    let cols = matrix.col_indices();
    let values = matrix.values();

    for (row, out) in y.iter_mut().enumerate() {
        let mut sum = 0.0;
        for k in offsets[row]..offsets[row + 1] {
            sum += values[k] * x[cols[k]];
        }
        *out = sum;
    }
}

/// Diagonal entries of a square CSR matrix (zero where none is stored)
pub fn diagonal(matrix: &CsrMatrix<f64>) -> Vec<f64> {
    let mut diag = vec![0.0; matrix.nrows()];
    for (row, col, value) in matrix.triplet_iter() {
        if row == col {
            diag[row] += *value;
        }
    }
    diag
}
