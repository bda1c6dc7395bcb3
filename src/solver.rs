use std::sync::{Arc, Mutex};
use std::time::Instant;

use argmin::core::{
    observers::{Observe, ObserverMode},
    Error, Executor, IterState, Operator, Problem, Solver, State, TerminationReason,
    TerminationStatus, KV,
};
use argmin_math::{ArgminDot, ArgminL2Norm, ArgminScaledAdd};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use nalgebra::DMatrix;
use nalgebra_sparse::csc::CscMatrix;
use nalgebra_sparse::csr::CsrMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use serde::Serialize;

use crate::amg::{AmgPreconditioner, Preconditioner};
use crate::assembly::LinearSystem;
use crate::config::SolverSettings;
use crate::error::{FerrostaticError, Result};
use crate::function_space::DOF_PER_NODE;
use crate::sparse::spmv;

/// Systems with fewer DOFs than this are factorized directly
pub const DIRECT_SOLVE_DOF_LIMIT: usize = 10_000;

pub const DIRECT_SOLVE_LOG: &str = "no iterative output for LU";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolverKind {
    #[serde(rename = "cholesky")]
    Direct,
    #[serde(rename = "cg")]
    Iterative,
}

impl SolverKind {
    pub fn preconditioner(&self) -> &'static str {
        match self {
            SolverKind::Direct => "none",
            SolverKind::Iterative => "amg",
        }
    }
}

pub fn select_solver(num_dofs: usize) -> SolverKind {
    if num_dofs < DIRECT_SOLVE_DOF_LIMIT {
        SolverKind::Direct
    } else {
        SolverKind::Iterative
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub kind: SolverKind,
    pub iterations: usize,
    pub residual: f64,
    pub seconds: f64,
    /// Convergence monitor output, one entry per line
    pub log: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub displacement: Vec<f64>,
    pub report: SolveReport,
}

/// Result of one preconditioned conjugate gradient run
#[derive(Debug, Clone)]
pub struct IterativeOutcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub log: Vec<String>,
}

/// Runs multiplication for the conjugate gradient solver
struct SystemOperator<'a> {
    matrix: &'a CsrMatrix<f64>,
}

impl<'a> Operator for SystemOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let mut y = vec![0.0; self.matrix.nrows()];
        spmv(self.matrix, x, &mut y);
        Ok(y)
    }
}

type CgState = IterState<Vec<f64>, (), (), (), (), f64>;

/// Conjugate gradient on A x = b with a symmetric preconditioner M ≈ A⁻¹.
/// The state cost is the residual norm ‖b − A x‖.
struct PreconditionedConjugateGradient<'a, P> {
    b: &'a [f64],
    preconditioner: &'a P,
    tolerance: f64,
    r: Vec<f64>,
    p: Vec<f64>,
    rz: f64,
}

impl<'a, P: Preconditioner> PreconditionedConjugateGradient<'a, P> {
    fn new(b: &'a [f64], preconditioner: &'a P, tolerance: f64) -> Self {
        PreconditionedConjugateGradient {
            b,
            preconditioner,
            tolerance,
            r: Vec::new(),
            p: Vec::new(),
            rz: 0.0,
        }
    }
}

impl<'a, O, P> Solver<O, CgState> for PreconditionedConjugateGradient<'a, P>
where
    O: Operator<Param = Vec<f64>, Output = Vec<f64>>,
    P: Preconditioner,
{
    const NAME: &'static str = "Preconditioned Conjugate Gradient";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: CgState,
    ) -> std::result::Result<(CgState, Option<KV>), Error> {
        let x = state
            .get_param()
            .ok_or_else(|| Error::msg("conjugate gradient needs an initial guess"))?
            .clone();

        let ax = problem.apply(&x)?;
        self.r = self.b.to_vec().scaled_add(&-1.0f64, &ax);
        let z = self.preconditioner.apply(&self.r);
        self.rz = self.r.dot(&z);
        self.p = z;

        let residual: f64 = self.r.l2_norm();
        Ok((state.param(x).cost(residual), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: CgState,
    ) -> std::result::Result<(CgState, Option<KV>), Error> {
        let x = state
            .get_param()
            .ok_or_else(|| Error::msg("conjugate gradient lost its iterate"))?
            .clone();

        let ap = problem.apply(&self.p)?;
        let pap: f64 = self.p.dot(&ap);
        if !(pap > 0.0) {
            return Err(Error::msg(format!(
                "operator is not positive definite (pᵀAp = {pap:e})"
            )));
        }

        let alpha = self.rz / pap;
        let x = x.scaled_add(&alpha, &self.p);
        self.r = self.r.scaled_add(&-alpha, &ap);

        let z = self.preconditioner.apply(&self.r);
        let rz_next: f64 = self.r.dot(&z);
        let beta = rz_next / self.rz;
        self.rz = rz_next;
        self.p = z.scaled_add(&beta, &self.p);

        let residual: f64 = self.r.l2_norm();
        Ok((state.param(x).cost(residual), None))
    }

    fn terminate(&mut self, state: &CgState) -> TerminationStatus {
        if state.get_cost() <= self.tolerance {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}

/// Records residual norms in PETSc monitor style and drives a progress bar
struct ResidualMonitor {
    lines: Arc<Mutex<Vec<String>>>,
    bar: ProgressBar,
    count: usize,
}

impl ResidualMonitor {
    fn new(lines: Arc<Mutex<Vec<String>>>, max_iterations: usize) -> ResidualMonitor {
        ResidualMonitor {
            lines,
            bar: ProgressBar::new(max_iterations as u64),
            count: 0,
        }
    }

    fn record(&mut self, residual: f64) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("{:3} KSP Residual norm {:.12e}", self.count, residual));
        }
        self.bar.set_position(self.count as u64);
        self.count += 1;
    }
}

impl Observe<CgState> for ResidualMonitor {
    fn observe_init(
        &mut self,
        _name: &str,
        state: &CgState,
        _kv: &KV,
    ) -> std::result::Result<(), Error> {
        self.record(state.get_cost());
        Ok(())
    }

    fn observe_iter(&mut self, state: &CgState, _kv: &KV) -> std::result::Result<(), Error> {
        self.record(state.get_cost());
        Ok(())
    }

    fn observe_final(&mut self, _state: &CgState) -> std::result::Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Solves `A x = b` with preconditioned conjugate gradients.
///
/// Converges when ‖b − A x‖ ≤ max(rtol ‖b‖, atol). Running out of iterations
/// is an error.
pub fn run_conjugate_gradient<P: Preconditioner>(
    matrix: &CsrMatrix<f64>,
    rhs: &[f64],
    preconditioner: &P,
    settings: &SolverSettings,
) -> Result<IterativeOutcome> {
    let rhs_norm: f64 = rhs.to_vec().l2_norm();
    let tolerance = (settings.relative_tolerance * rhs_norm).max(settings.absolute_tolerance);

    if rhs_norm == 0.0 {
        return Ok(IterativeOutcome {
            x: vec![0.0; rhs.len()],
            iterations: 0,
            residual: 0.0,
            log: vec![format!("{:3} KSP Residual norm {:.12e}", 0, 0.0)],
        });
    }

    let operator = SystemOperator { matrix };
    let solver = PreconditionedConjugateGradient::new(rhs, preconditioner, tolerance);
    let initial_guess = vec![0.0; rhs.len()];
    let lines = Arc::new(Mutex::new(Vec::new()));

    let mut executor = Executor::new(operator, solver).configure(|state| {
        state
            .param(initial_guess)
            .max_iters(settings.max_iterations as u64)
    });
    if settings.monitor_convergence {
        executor = executor.add_observer(
            ResidualMonitor::new(lines.clone(), settings.max_iterations),
            ObserverMode::Always,
        );
    }

    let res = executor
        .run()
        .map_err(|err| FerrostaticError::Solve(format!("Conjugate Gradient error: {err}")))?;

    let state = res.state();
    let residual = state.get_cost();
    let iterations = state.get_iter() as usize;

    let x = match state.get_param() {
        Some(x) => x.clone(),
        None => {
            return Err(FerrostaticError::Solve(
                "Conjugate Gradient could not produce a solution".to_owned(),
            ))
        }
    };

    if !(residual <= tolerance) {
        return Err(FerrostaticError::Solve(format!(
            "Conjugate Gradient did not converge in {iterations} iterations \
             (residual {residual:e}, tolerance {tolerance:e})"
        )));
    }

    let log = lines.lock().map(|l| l.clone()).unwrap_or_default();

    Ok(IterativeOutcome {
        x,
        iterations,
        residual,
        log,
    })
}

/// Sparse Cholesky factorization and solve
pub fn solve_direct(matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<Vec<f64>> {
    let csc = CscMatrix::from(matrix);
    let factor = CscCholesky::factor(&csc).map_err(|err| {
        FerrostaticError::Solve(format!(
            "Cholesky factorization failed ({err:?}), is the body fully constrained?"
        ))
    })?;

    let b = DMatrix::from_column_slice(rhs.len(), 1, rhs);
    let x = factor.solve(&b);

    if x.iter().any(|v| !v.is_finite()) {
        return Err(FerrostaticError::Solve(
            "direct solve produced non-finite displacements".to_owned(),
        ));
    }

    Ok(x.as_slice().to_vec())
}

/// Solves the system with a given solver kind
pub fn solve_with(
    kind: SolverKind,
    system: &LinearSystem,
    settings: &SolverSettings,
) -> Result<Solution> {
    let start = Instant::now();
    info!(
        "solving {} DOFs with {:?} solver (preconditioner: {})...",
        system.num_dofs(),
        kind,
        kind.preconditioner()
    );

    let (displacement, iterations, residual, log) = match kind {
        SolverKind::Direct => {
            let x = solve_direct(&system.matrix, &system.rhs)?;
            let mut ax = vec![0.0; x.len()];
            spmv(&system.matrix, &x, &mut ax);
            let residual: f64 = ax
                .iter()
                .zip(&system.rhs)
                .map(|(a, b)| a - b)
                .collect::<Vec<f64>>()
                .l2_norm();
            (x, 0, residual, vec![DIRECT_SOLVE_LOG.to_owned()])
        }
        SolverKind::Iterative => {
            let preconditioner = AmgPreconditioner::new(&system.matrix, DOF_PER_NODE)?;
            debug!("AMG preconditioner with {} levels", preconditioner.num_levels());
            let outcome =
                run_conjugate_gradient(&system.matrix, &system.rhs, &preconditioner, settings)?;
            (outcome.x, outcome.iterations, outcome.residual, outcome.log)
        }
    };

    let seconds = start.elapsed().as_secs_f64();
    info!(
        "solved system in {:.3} seconds ({} iterations, residual {:.3e})",
        seconds, iterations, residual
    );
    if log.is_empty() && kind == SolverKind::Iterative {
        warn!("convergence monitoring is off, no solver log was captured");
    }

    Ok(Solution {
        displacement,
        report: SolveReport {
            kind,
            iterations,
            residual,
            seconds,
            log,
        },
    })
}

/// Solves an assembled system, choosing the solver by its size
pub fn solve_system(system: LinearSystem, settings: &SolverSettings) -> Result<Solution> {
    let kind = select_solver(system.num_dofs());
    solve_with(kind, &system, settings)
}
