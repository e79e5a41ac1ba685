use crate::estimate::FitError;
use crate::linalg::sparse_exact::{
    certify_gram_rank, frobenius_norm_sq, gram_matrix, solve_least_squares_qr, solve_symmetric,
    sparse_matvec, sparse_transpose_matvec, vstack,
};
use crate::smoothness::AxisPenalty;
use crate::types::SolverKind;
use faer::sparse::SparseColMat;
use ndarray::{Array1, ArrayView1, s};

/// Largest accepted relative gradient `|A'(b - Az)|` of a solution.
const NORMAL_RESIDUAL_TOL: f64 = 1e-6;

/// Smallest accepted eigenvalue of `A'A`, relative to its largest row sum.
const RANK_TOL: f64 = 1e-11;

/// Fidelity rows on top of all penalty rows, with `rhs = [y; 0]`.
#[derive(Debug, Clone)]
pub struct StackedSystem {
    pub matrix: SparseColMat<usize, f64>,
    pub rhs: Array1<f64>,
    pub fidelity_rows: usize,
}

impl StackedSystem {
    /// Consumes the assembled blocks; they are released once copied into the
    /// stacked matrix.
    pub fn from_blocks(
        fidelity: SparseColMat<usize, f64>,
        penalties: Vec<AxisPenalty>,
        values: ArrayView1<'_, f64>,
    ) -> Result<Self, FitError> {
        if values.len() != fidelity.nrows() {
            return Err(FitError::InputShape {
                field: "values",
                expected: fidelity.nrows(),
                found: values.len(),
            });
        }
        let ncols = fidelity.ncols();
        let mut blocks: Vec<&SparseColMat<usize, f64>> = Vec::with_capacity(1 + penalties.len());
        blocks.push(&fidelity);
        blocks.extend(penalties.iter().map(|p| &p.matrix));
        let matrix = vstack(&blocks, ncols)?;

        let mut rhs = Array1::<f64>::zeros(matrix.nrows());
        rhs.slice_mut(s![..values.len()]).assign(&values);
        Ok(Self {
            matrix,
            rhs,
            fidelity_rows: values.len(),
        })
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn nonzeros(&self) -> usize {
        self.matrix.parts().1.len()
    }

    /// `A z - rhs`.
    pub fn residual(&self, solution: &Array1<f64>) -> Array1<f64> {
        sparse_matvec(&self.matrix, solution) - &self.rhs
    }
}

/// Solved grid values in flat layout order.
#[derive(Debug, Clone)]
pub struct Solution {
    pub coefficients: Array1<f64>,
    /// `|A'(b - Az)|` relative to the scale of the system.
    pub normal_residual: f64,
}

/// Solves the stacked least-squares system with the requested method.
///
/// Both solvers first require `A` to have full column rank: every eigenvalue
/// of `A'A` must exceed [`RANK_TOL`] times its norm. The solution must then be
/// finite and satisfy the normal equations to within [`NORMAL_RESIDUAL_TOL`].
/// Anything else is reported as a singular system.
pub fn solve_stacked(system: &StackedSystem, solver: SolverKind) -> Result<Solution, FitError> {
    let (nrows, ncols) = (system.nrows(), system.ncols());
    if nrows < ncols {
        return Err(FitError::SingularSystem {
            reason: format!(
                "{nrows} equations cannot determine {ncols} grid values; \
                 add data or use a positive smoothness on more axes"
            ),
        });
    }
    if let Some(node) = first_unconstrained_column(&system.matrix) {
        return Err(FitError::SingularSystem {
            reason: format!("grid node {node} does not appear in any equation"),
        });
    }
    log::debug!(
        "solving {nrows} x {ncols} system ({} nonzeros) with the {solver} solver",
        system.nonzeros()
    );

    let gram = gram_matrix(&system.matrix)?;
    if let Err(deficiency) = certify_gram_rank(&gram, RANK_TOL)? {
        return Err(FitError::SingularSystem {
            reason: format!(
                "the {nrows} x {ncols} system is rank deficient: the normal matrix has an \
                 eigenvalue at or below {:.3e} (pivot {}); add data where the grid is \
                 unconstrained or increase the smoothness",
                deficiency.shift, deficiency.pivot
            ),
        });
    }

    let coefficients = match solver {
        SolverKind::Normal => {
            let atb = sparse_transpose_matvec(&system.matrix, &system.rhs);
            solve_symmetric(&gram, &atb)
        }
        SolverKind::Direct => solve_least_squares_qr(&system.matrix, &system.rhs),
    }?;

    if let Some(index) = coefficients.iter().position(|v| !v.is_finite()) {
        return Err(FitError::SingularSystem {
            reason: format!("solution is not finite at grid node {index}"),
        });
    }

    let normal_residual = relative_normal_residual(system, &coefficients);
    log::debug!("relative normal-equation residual {normal_residual:.3e}");
    if !(normal_residual <= NORMAL_RESIDUAL_TOL) {
        return Err(FitError::SingularSystem {
            reason: format!(
                "solution does not satisfy the normal equations (relative residual {normal_residual:.3e})"
            ),
        });
    }

    Ok(Solution {
        coefficients,
        normal_residual,
    })
}

fn first_unconstrained_column(matrix: &SparseColMat<usize, f64>) -> Option<usize> {
    let (symbolic, values) = matrix.parts();
    let col_ptr = symbolic.col_ptr();
    (0..matrix.ncols()).find(|&col| values[col_ptr[col]..col_ptr[col + 1]].iter().all(|&v| v == 0.0))
}

fn relative_normal_residual(system: &StackedSystem, solution: &Array1<f64>) -> f64 {
    let residual = system.residual(solution);
    let gradient = sparse_transpose_matvec(&system.matrix, &residual);
    let atb = sparse_transpose_matvec(&system.matrix, &system.rhs);
    let norm = |v: &Array1<f64>| v.dot(v).sqrt();
    let scale = norm(&atb) + frobenius_norm_sq(&system.matrix) * norm(solution);
    if scale == 0.0 {
        return norm(&gradient);
    }
    norm(&gradient) / scale
}
