//! Aggregation algebraic multigrid preconditioner.
//!
//! Nodes (blocks of `block_size` DOFs) are grouped into aggregates over the
//! strong connections of the matrix graph; each aggregate becomes one coarse
//! node. Prolongation is piecewise constant per component and the coarse
//! operator is the Galerkin product Pᵀ A P. One V-cycle applies a forward
//! Gauss-Seidel sweep, the coarse correction, then a backward sweep, which
//! keeps the preconditioner symmetric for conjugate gradients.

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use nalgebra_sparse::csr::CsrMatrix;

use crate::error::{FerrostaticError, Result};
use crate::sparse::{diagonal, spmv, TripletMatrix};

const MAX_LEVELS: usize = 10;
/// Stop coarsening at or below this many unknowns
const COARSE_SIZE: usize = 200;
/// Largest coarse system factorized densely
const MAX_DENSE_COARSE: usize = 3000;
const STRENGTH_THRESHOLD: f64 = 0.08;
const COARSE_SMOOTHING_SWEEPS: usize = 20;

pub trait Preconditioner {
    /// Approximates A⁻¹ r
    fn apply(&self, r: &[f64]) -> Vec<f64>;
}

struct AmgLevel {
    matrix: CsrMatrix<f64>,
    diag: Vec<f64>,
    /// Coarse DOF of every DOF on this level
    aggregate: Vec<usize>,
    n_coarse: usize,
}

enum CoarseSolve {
    Dense(Cholesky<f64, Dyn>),
    Smoothed {
        matrix: CsrMatrix<f64>,
        diag: Vec<f64>,
    },
}

pub struct AmgPreconditioner {
    levels: Vec<AmgLevel>,
    coarse: CoarseSolve,
}

impl AmgPreconditioner {
    /// Builds the multigrid hierarchy of an SPD matrix
    ///
    /// # Arguments
    /// * `matrix` - Symmetric positive definite system matrix
    /// * `block_size` - DOFs per node (3 for displacements, 1 for scalars)
    pub fn new(matrix: &CsrMatrix<f64>, block_size: usize) -> Result<AmgPreconditioner> {
        if block_size == 0 || matrix.nrows() % block_size != 0 || matrix.nrows() != matrix.ncols() {
            return Err(FerrostaticError::Solve(format!(
                "cannot build AMG for a {}x{} matrix with block size {}",
                matrix.nrows(),
                matrix.ncols(),
                block_size
            )));
        }

        let mut levels = Vec::new();
        let mut current = matrix.clone();

        while current.nrows() > COARSE_SIZE && levels.len() + 1 < MAX_LEVELS {
            let (aggregate, n_coarse) = aggregate_dofs(&current, block_size);
            if n_coarse == 0 || n_coarse as f64 > 0.9 * current.nrows() as f64 {
                break;
            }

            let coarse = galerkin_product(&current, &aggregate, n_coarse)?;
            debug!(
                "AMG level {}: {} -> {} unknowns",
                levels.len(),
                current.nrows(),
                n_coarse
            );

            let diag = diagonal(&current);
            levels.push(AmgLevel {
                matrix: current,
                diag,
                aggregate,
                n_coarse,
            });
            current = coarse;
        }

        let coarse = if current.nrows() <= MAX_DENSE_COARSE {
            let dense = DMatrix::from(&current);
            let factor = dense.cholesky().ok_or_else(|| {
                FerrostaticError::Solve(
                    "coarse AMG operator is not positive definite (is the body constrained?)"
                        .to_owned(),
                )
            })?;
            CoarseSolve::Dense(factor)
        } else {
            let diag = diagonal(&current);
            CoarseSolve::Smoothed {
                matrix: current,
                diag,
            }
        };

        debug!("AMG hierarchy with {} levels", levels.len() + 1);

        Ok(AmgPreconditioner { levels, coarse })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    fn v_cycle(&self, level: usize, b: &[f64]) -> Vec<f64> {
        if level == self.levels.len() {
            return self.coarse_solve(b);
        }

        let lvl = &self.levels[level];
        let n = b.len();
        let mut x = vec![0.0; n];

        gauss_seidel_forward(&lvl.matrix, &lvl.diag, b, &mut x);

        let mut ax = vec![0.0; n];
        spmv(&lvl.matrix, &x, &mut ax);
        let mut coarse_rhs = vec![0.0; lvl.n_coarse];
        for i in 0..n {
            coarse_rhs[lvl.aggregate[i]] += b[i] - ax[i];
        }

        let correction = self.v_cycle(level + 1, &coarse_rhs);
        for i in 0..n {
            x[i] += correction[lvl.aggregate[i]];
        }

        gauss_seidel_backward(&lvl.matrix, &lvl.diag, b, &mut x);

        x
    }

    fn coarse_solve(&self, b: &[f64]) -> Vec<f64> {
        match &self.coarse {
            CoarseSolve::Dense(factor) => factor
                .solve(&DVector::from_column_slice(b))
                .as_slice()
                .to_vec(),
            CoarseSolve::Smoothed { matrix, diag } => {
                let mut x = vec![0.0; b.len()];
                for _ in 0..COARSE_SMOOTHING_SWEEPS {
                    gauss_seidel_forward(matrix, diag, b, &mut x);
                    gauss_seidel_backward(matrix, diag, b, &mut x);
                }
                x
            }
        }
    }
}

impl Preconditioner for AmgPreconditioner {
    fn apply(&self, r: &[f64]) -> Vec<f64> {
        self.v_cycle(0, r)
    }
}

fn gauss_seidel_row(matrix: &CsrMatrix<f64>, diag: &[f64], b: &[f64], x: &mut [f64], row: usize) {
    if diag[row] == 0.0 {
        return;
    }

    let offsets = matrix.row_offsets();
    let cols = matrix.col_indices();
    let values = matrix.values();

    let mut sum = b[row];
    for k in offsets[row]..offsets[row + 1] {
        if cols[k] != row {
            sum -= values[k] * x[cols[k]];
        }
    }
    x[row] = sum / diag[row];
}

fn gauss_seidel_forward(matrix: &CsrMatrix<f64>, diag: &[f64], b: &[f64], x: &mut [f64]) {
    for row in 0..x.len() {
        gauss_seidel_row(matrix, diag, b, x, row);
    }
}

fn gauss_seidel_backward(matrix: &CsrMatrix<f64>, diag: &[f64], b: &[f64], x: &mut [f64]) {
    for row in (0..x.len()).rev() {
        gauss_seidel_row(matrix, diag, b, x, row);
    }
}

/// Summed absolute block entries between nodes, per node row
fn node_graph(matrix: &CsrMatrix<f64>, block_size: usize) -> (Vec<Vec<(usize, f64)>>, Vec<f64>) {
    let n_nodes = matrix.nrows() / block_size;
    let mut graph: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_nodes];
    let mut self_weight = vec![0.0; n_nodes];

    for (row, col, value) in matrix.triplet_iter() {
        let (i, j) = (row / block_size, col / block_size);
        if i == j {
            self_weight[i] += value.abs();
        } else {
            graph[i].push((j, value.abs()));
        }
    }

    for neighbors in graph.iter_mut() {
        neighbors.sort_unstable_by_key(|(j, _)| *j);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(neighbors.len());
        for &(j, w) in neighbors.iter() {
            match merged.last_mut() {
                Some((last, total)) if *last == j => *total += w,
                _ => merged.push((j, w)),
            }
        }
        *neighbors = merged;
    }

    (graph, self_weight)
}

/// Greedy aggregation over strong node connections. Returns the coarse DOF of
/// every fine DOF and the number of coarse DOFs.
fn aggregate_dofs(matrix: &CsrMatrix<f64>, block_size: usize) -> (Vec<usize>, usize) {
    let (graph, self_weight) = node_graph(matrix, block_size);
    let n_nodes = graph.len();

    let strong: Vec<Vec<usize>> = (0..n_nodes)
        .map(|i| {
            graph[i]
                .iter()
                .filter(|(j, w)| {
                    *w >= STRENGTH_THRESHOLD * (self_weight[i] * self_weight[*j]).sqrt()
                        && *w > 0.0
                })
                .map(|(j, _)| *j)
                .collect()
        })
        .collect();

    let mut node_aggregate: Vec<Option<usize>> = vec![None; n_nodes];
    let mut n_aggregates = 0;

    // seed aggregates from nodes whose whole strong neighbourhood is free
    for i in 0..n_nodes {
        if node_aggregate[i].is_some() || strong[i].is_empty() {
            continue;
        }
        if strong[i].iter().all(|j| node_aggregate[*j].is_none()) {
            node_aggregate[i] = Some(n_aggregates);
            for &j in &strong[i] {
                node_aggregate[j] = Some(n_aggregates);
            }
            n_aggregates += 1;
        }
    }

    // attach leftovers to a neighbouring aggregate
    let snapshot = node_aggregate.clone();
    for i in 0..n_nodes {
        if node_aggregate[i].is_some() {
            continue;
        }
        if let Some(agg) = strong[i].iter().find_map(|j| snapshot[*j]) {
            node_aggregate[i] = Some(agg);
        }
    }

    // whatever is left forms its own aggregates
    for i in 0..n_nodes {
        if node_aggregate[i].is_some() {
            continue;
        }
        node_aggregate[i] = Some(n_aggregates);
        for &j in &strong[i] {
            if node_aggregate[j].is_none() {
                node_aggregate[j] = Some(n_aggregates);
            }
        }
        n_aggregates += 1;
    }

    let aggregate = (0..matrix.nrows())
        .map(|dof| {
            let node = dof / block_size;
            block_size * node_aggregate[node].unwrap_or(0) + dof % block_size
        })
        .collect();

    (aggregate, block_size * n_aggregates)
}

/// Pᵀ A P for a piecewise-constant prolongation
fn galerkin_product(
    matrix: &CsrMatrix<f64>,
    aggregate: &[usize],
    n_coarse: usize,
) -> Result<CsrMatrix<f64>> {
    let mut triplets = TripletMatrix::with_capacity(n_coarse, n_coarse, matrix.nnz());
    for (row, col, value) in matrix.triplet_iter() {
        triplets.add(aggregate[row], aggregate[col], *value);
    }
    triplets.to_csr()
}
