use crate::estimate::FitError;
use crate::linalg::faer_ndarray::{FaerColView, FaerLinalgError, column_to_array};
use faer::Side;
use faer::linalg::solvers::{Solve, SolveLstsq};
use faer::linalg::cholesky::llt::factor::LltError as NumericLltError;
use faer::sparse::linalg::LltError;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::Array1;

/// `A * x` for a CSC matrix.
pub fn sparse_matvec(matrix: &SparseColMat<usize, f64>, vector: &Array1<f64>) -> Array1<f64> {
    debug_assert_eq!(matrix.ncols(), vector.len());
    let mut out = Array1::<f64>::zeros(matrix.nrows());
    let (symbolic, values) = matrix.parts();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    for col in 0..matrix.ncols() {
        let x = vector[col];
        if x == 0.0 {
            continue;
        }
        for idx in col_ptr[col]..col_ptr[col + 1] {
            out[row_idx[idx]] += values[idx] * x;
        }
    }
    out
}

/// `A' * v` for a CSC matrix.
pub fn sparse_transpose_matvec(
    matrix: &SparseColMat<usize, f64>,
    vector: &Array1<f64>,
) -> Array1<f64> {
    debug_assert_eq!(matrix.nrows(), vector.len());
    let mut out = Array1::<f64>::zeros(matrix.ncols());
    let (symbolic, values) = matrix.parts();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    for col in 0..matrix.ncols() {
        let mut acc = 0.0;
        for idx in col_ptr[col]..col_ptr[col + 1] {
            acc += values[idx] * vector[row_idx[idx]];
        }
        out[col] = acc;
    }
    out
}

pub fn row_sums(matrix: &SparseColMat<usize, f64>) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(matrix.nrows());
    let (symbolic, values) = matrix.parts();
    for (&row, &value) in symbolic.row_idx().iter().zip(values) {
        out[row] += value;
    }
    out
}

pub fn frobenius_norm_sq(matrix: &SparseColMat<usize, f64>) -> f64 {
    matrix.parts().1.iter().map(|v| v * v).sum()
}

/// Stacks blocks with a common column count on top of each other.
pub fn vstack(
    blocks: &[&SparseColMat<usize, f64>],
    ncols: usize,
) -> Result<SparseColMat<usize, f64>, FitError> {
    let nnz: usize = blocks.iter().map(|b| b.parts().1.len()).sum();
    let mut triplets = Vec::with_capacity(nnz);
    let mut row_offset = 0usize;
    for (block_index, block) in blocks.iter().enumerate() {
        if block.ncols() != ncols {
            return Err(FitError::SparseAssembly(format!(
                "block {block_index} has {} columns, expected {ncols}",
                block.ncols()
            )));
        }
        let (symbolic, values) = block.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        for col in 0..block.ncols() {
            for idx in col_ptr[col]..col_ptr[col + 1] {
                triplets.push(Triplet::new(row_offset + row_idx[idx], col, values[idx]));
            }
        }
        row_offset += block.nrows();
    }
    SparseColMat::try_new_from_triplets(row_offset, ncols, &triplets)
        .map_err(|err| FitError::SparseAssembly(format!("stacked system: {err:?}")))
}

/// Forms `A' * A` row by row from the CSR form of `A`.
pub fn gram_matrix(matrix: &SparseColMat<usize, f64>) -> Result<SparseColMat<usize, f64>, FitError> {
    let csr = matrix.as_ref().to_row_major().map_err(|err| {
        FitError::SparseAssembly(format!("failed to convert system to CSR: {err:?}"))
    })?;
    let symbolic = csr.symbolic();
    let row_ptr = symbolic.row_ptr();
    let col_idx = symbolic.col_idx();
    let values = csr.val();

    let products: usize = (0..csr.nrows())
        .map(|row| {
            let len = row_ptr[row + 1] - row_ptr[row];
            len * len
        })
        .sum();
    let mut triplets = Vec::with_capacity(products);
    for row in 0..csr.nrows() {
        let start = row_ptr[row];
        let end = row_ptr[row + 1];
        for a in start..end {
            for b in start..end {
                triplets.push(Triplet::new(col_idx[a], col_idx[b], values[a] * values[b]));
            }
        }
    }
    SparseColMat::try_new_from_triplets(matrix.ncols(), matrix.ncols(), &triplets)
        .map_err(|err| FitError::SparseAssembly(format!("normal matrix: {err:?}")))
}

/// Largest absolute row sum of a symmetric matrix, an upper bound on its
/// largest eigenvalue.
pub fn symmetric_inf_norm(matrix: &SparseColMat<usize, f64>) -> f64 {
    let (symbolic, values) = matrix.parts();
    let col_ptr = symbolic.col_ptr();
    (0..matrix.ncols())
        .map(|col| {
            values[col_ptr[col]..col_ptr[col + 1]]
                .iter()
                .map(|v| v.abs())
                .sum::<f64>()
        })
        .fold(0.0, f64::max)
}

/// Checks that the smallest eigenvalue of the Gram matrix `G = A'A` exceeds
/// `rel_tol * |G|`.
///
/// The check factorizes `G - shift * I` with `shift = rel_tol * |G|_inf`. That
/// matrix is positive definite exactly when every eigenvalue of `G` lies
/// above the shift, so a non-positive Cholesky pivot means `A` is rank
/// deficient to working precision. Returns the shift on success.
pub fn certify_gram_rank(
    gram: &SparseColMat<usize, f64>,
    rel_tol: f64,
) -> Result<Result<f64, RankDeficiency>, FaerLinalgError> {
    let norm = symmetric_inf_norm(gram);
    let shift = rel_tol * norm;
    if norm == 0.0 {
        return Ok(Err(RankDeficiency { shift, pivot: 1 }));
    }

    let mut shifted = gram.clone();
    {
        let ncols = shifted.ncols();
        let col_ptr = shifted.symbolic().col_ptr().to_vec();
        let row_idx = shifted.symbolic().row_idx().to_vec();
        let values = shifted.val_mut();
        for col in 0..ncols {
            for idx in col_ptr[col]..col_ptr[col + 1] {
                if row_idx[idx] == col {
                    values[idx] -= shift;
                }
            }
        }
    }

    match shifted.as_ref().sp_cholesky(Side::Lower) {
        Ok(_) => Ok(Ok(shift)),
        Err(LltError::Numeric(NumericLltError::NonPositivePivot { index })) => {
            Ok(Err(RankDeficiency { shift, pivot: index }))
        }
        Err(err) => Err(FaerLinalgError::Cholesky(format!("{err:?}"))),
    }
}

/// The Gram matrix has an eigenvalue at or below `shift`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankDeficiency {
    pub shift: f64,
    /// Pivot at which the shifted factorization broke down, in the
    /// factorization's fill-reducing order.
    pub pivot: usize,
}

/// Solves the symmetric positive definite system `G z = rhs` with a sparse
/// Cholesky factorization.
pub fn solve_symmetric(
    gram: &SparseColMat<usize, f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>, FaerLinalgError> {
    let n = gram.ncols();
    let rhs_view = FaerColView::new(rhs);
    let llt = gram
        .as_ref()
        .sp_cholesky(Side::Lower)
        .map_err(|err| FaerLinalgError::Cholesky(format!("{err:?}")))?;
    let out = llt.solve(rhs_view.as_ref());
    Ok(column_to_array(out.as_ref(), n))
}

/// Minimizes `|A z - rhs|` with a sparse QR of the rectangular matrix.
pub fn solve_least_squares_qr(
    matrix: &SparseColMat<usize, f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>, FaerLinalgError> {
    let qr = matrix
        .as_ref()
        .sp_qr()
        .map_err(|err| FaerLinalgError::Qr(format!("{err:?}")))?;
    let rhs_view = FaerColView::new(rhs);
    let out = qr.solve_lstsq(rhs_view.as_ref());
    Ok(column_to_array(out.as_ref(), matrix.ncols()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn from_dense(rows: &[&[f64]]) -> SparseColMat<usize, f64> {
        let mut triplets = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    triplets.push(Triplet::new(i, j, v));
                }
            }
        }
        SparseColMat::try_new_from_triplets(rows.len(), rows[0].len(), &triplets)
            .expect("valid triplets")
    }

    #[test]
    fn matvec_and_transpose_agree_with_hand_computation() {
        let a = from_dense(&[&[1.0, 0.0, 2.0], &[0.0, -1.0, 0.5]]);
        let x = array![1.0, 2.0, 3.0];
        assert_eq!(sparse_matvec(&a, &x), array![7.0, -0.5]);
        let v = array![2.0, -1.0];
        assert_eq!(sparse_transpose_matvec(&a, &v), array![2.0, 1.0, 3.5]);
        assert_eq!(row_sums(&a), array![3.0, -0.5]);
        assert_abs_diff_eq!(frobenius_norm_sq(&a), 1.0 + 4.0 + 1.0 + 0.25);
    }

    #[test]
    fn duplicate_triplets_accumulate() {
        let triplets = vec![Triplet::new(0, 1, 0.25), Triplet::new(0, 1, 0.5)];
        let a = SparseColMat::try_new_from_triplets(1, 2, &triplets).expect("triplets");
        assert_eq!(sparse_matvec(&a, &array![0.0, 1.0]), array![0.75]);
    }

    #[test]
    fn vstack_offsets_rows() {
        let top = from_dense(&[&[1.0, 2.0]]);
        let bottom = from_dense(&[&[0.0, 3.0], &[4.0, 0.0]]);
        let stacked = vstack(&[&top, &bottom], 2).expect("stack");
        assert_eq!((stacked.nrows(), stacked.ncols()), (3, 2));
        assert_eq!(sparse_matvec(&stacked, &array![1.0, 1.0]), array![3.0, 3.0, 4.0]);

        let wide = from_dense(&[&[1.0, 0.0, 1.0]]);
        assert!(matches!(
            vstack(&[&top, &wide], 2),
            Err(FitError::SparseAssembly(_))
        ));
    }

    #[test]
    fn gram_matrix_matches_dense_product() {
        let a = from_dense(&[&[1.0, 2.0, 0.0], &[0.0, 1.0, -1.0], &[3.0, 0.0, 1.0]]);
        let g = gram_matrix(&a).expect("gram");
        let expected = [[10.0, 2.0, 3.0], [2.0, 5.0, -1.0], [3.0, -1.0, 2.0]];
        for (j, col) in expected.iter().enumerate() {
            let mut e = Array1::zeros(3);
            e[j] = 1.0;
            let got = sparse_matvec(&g, &e);
            for i in 0..3 {
                assert_abs_diff_eq!(got[i], col[i], epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn full_rank_gram_is_certified() {
        let a = from_dense(&[&[1.0, 0.0], &[1.0, 1.0], &[1.0, 2.0]]);
        let g = gram_matrix(&a).expect("gram");
        let shift = certify_gram_rank(&g, 1e-11)
            .expect("factorization")
            .expect("full rank");
        assert!(shift > 0.0 && shift < 1e-9);
    }

    #[test]
    fn dependent_columns_fail_certification() {
        // Third column is the sum of the first two.
        let a = from_dense(&[
            &[1.0, 0.0, 1.0],
            &[0.0, 1.0, 1.0],
            &[2.0, 1.0, 3.0],
            &[1.0, 3.0, 4.0],
        ]);
        let g = gram_matrix(&a).expect("gram");
        let outcome = certify_gram_rank(&g, 1e-11).expect("factorization");
        assert!(outcome.is_err(), "rank-2 Gram matrix was certified: {outcome:?}");

        let zero = from_dense(&[&[0.0, 0.0]]);
        let g = gram_matrix(&zero).expect("gram");
        assert!(certify_gram_rank(&g, 1e-11).expect("norm").is_err());
    }

    #[test]
    fn symmetric_and_qr_solves_agree_on_overdetermined_system() {
        let a = from_dense(&[
            &[1.0, 0.0],
            &[1.0, 1.0],
            &[1.0, 2.0],
            &[1.0, 3.0],
        ]);
        let b = array![1.0, 2.9, 5.1, 7.0];
        let g = gram_matrix(&a).expect("gram");
        let normal = solve_symmetric(&g, &sparse_transpose_matvec(&a, &b)).expect("normal");
        let direct = solve_least_squares_qr(&a, &b).expect("qr");
        assert_eq!(direct.len(), 2);
        // Ordinary least-squares line through the four points.
        assert_abs_diff_eq!(normal[0], 0.97, epsilon = 1e-10);
        assert_abs_diff_eq!(normal[1], 2.02, epsilon = 1e-10);
        assert_abs_diff_eq!(direct[0], normal[0], epsilon = 1e-10);
        assert_abs_diff_eq!(direct[1], normal[1], epsilon = 1e-10);
    }
}
