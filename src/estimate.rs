//! Public entry points: validation, assembly and solve of a grid fit.

use crate::fidelity::assemble_fidelity;
use crate::grid::{GridSpec, check_values};
use crate::layout::GridLayout;
use crate::linalg::faer_ndarray::FaerLinalgError;
use crate::locate::locate_points;
use crate::smoothness::{AxisPenalty, assemble_smoothness};
use crate::solver::{StackedSystem, solve_stacked};
use crate::types::{FitOptions, InterpMethod, Smoothness, SolverKind};
use faer::sparse::SparseColMat;
use ndarray::{Array1, ArrayD, ArrayView1, ArrayView2, s};
use thiserror::Error;

/// Every way a fit can fail.
///
/// Validation errors are raised before any matrix is assembled; only
/// `SingularSystem` and `SparseAssembly` can come out of the numerical stages.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Shape mismatch in `{field}`: expected {expected}, found {found}.")]
    InputShape {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("`{field}` must not be empty.")]
    EmptyInput { field: &'static str },

    #[error("Non-finite entry in `{field}` at index {index}.")]
    NonFiniteValue { field: &'static str, index: usize },

    #[error(
        "Point {point} lies outside the grid along axis {axis}: {value} is not within [{min}, {max}]. \
         Extend the grid; points are never clamped."
    )]
    DomainBounds {
        axis: usize,
        point: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error(
        "Grid axis {axis} is not strictly increasing: node {position} ({current}) does not exceed the previous node ({previous})."
    )]
    NonMonotonicGrid {
        axis: usize,
        position: usize,
        previous: f64,
        current: f64,
    },

    #[error("Grid axis {axis} has {found} nodes but at least {required} are required.")]
    InsufficientGridSize {
        axis: usize,
        required: usize,
        found: usize,
    },

    #[error("Unsupported interpolation method '{0}'; expected 'nearest' or 'linear'.")]
    UnsupportedMethod(String),

    #[error("Unsupported solver '{0}'; expected 'direct' or 'normal'.")]
    UnsupportedSolver(String),

    #[error("Smoothness for axis {axis} must be finite and non-negative, got {value}.")]
    InvalidSmoothness { axis: usize, value: f64 },

    #[error("The assembled system is numerically singular: {reason}")]
    SingularSystem { reason: String },

    #[error("Sparse assembly failed: {0}")]
    SparseAssembly(String),
}

impl From<FaerLinalgError> for FitError {
    fn from(err: FaerLinalgError) -> Self {
        Self::SingularSystem {
            reason: err.to_string(),
        }
    }
}

/// Fidelity and smoothness blocks before they are stacked and solved.
#[derive(Debug, Clone)]
pub struct AssembledSystem {
    /// `m x N` interpolation weights of the scattered points.
    pub fidelity: SparseColMat<usize, f64>,
    /// One scaled block per axis with positive smoothness, in axis order.
    pub penalties: Vec<AxisPenalty>,
}

impl AssembledSystem {
    pub fn ncols(&self) -> usize {
        self.fidelity.ncols()
    }

    pub fn smoothness_rows(&self) -> usize {
        self.penalties.iter().map(AxisPenalty::nrows).sum()
    }

    pub fn row_count(&self) -> usize {
        self.fidelity.nrows() + self.smoothness_rows()
    }

    /// `[values; 0]`, the right-hand side matching [`AssembledSystem::stacked`].
    pub fn rhs(&self, values: ArrayView1<'_, f64>) -> Result<Array1<f64>, FitError> {
        let m = self.fidelity.nrows();
        if values.len() != m {
            return Err(FitError::InputShape {
                field: "values",
                expected: m,
                found: values.len(),
            });
        }
        let mut rhs = Array1::<f64>::zeros(self.row_count());
        rhs.slice_mut(s![..m]).assign(&values);
        Ok(rhs)
    }

    /// Stacks the blocks with `rhs = [values; 0]`.
    pub fn stacked(self, values: ArrayView1<'_, f64>) -> Result<StackedSystem, FitError> {
        StackedSystem::from_blocks(self.fidelity, self.penalties, values)
    }
}

/// Summary of the solved system.
#[derive(Debug, Clone, PartialEq)]
pub struct FitDiagnostics {
    pub solver: SolverKind,
    pub interp_method: InterpMethod,
    pub fidelity_rows: usize,
    /// Penalty rows per axis; zero for axes with zero smoothness.
    pub smoothness_rows: Vec<usize>,
    pub nonzeros: usize,
    /// Root-mean-square misfit at the scattered points.
    pub fidelity_rmse: f64,
    /// Euclidean norm of the scaled penalty rows at the solution.
    pub penalty_norm: f64,
    pub normal_residual: f64,
}

/// A grid node of a fitted surface.
#[derive(Debug, Clone, PartialEq)]
pub struct GridNode {
    pub index: Vec<usize>,
    pub coords: Vec<f64>,
    pub value: f64,
}

/// Fitted node values, shaped like the grid.
#[derive(Debug, Clone)]
pub struct FitResult {
    values: ArrayD<f64>,
    grid: GridSpec,
    pub diagnostics: FitDiagnostics,
}

impl FitResult {
    /// Node values indexed `[i0, i1, ...]` by per-axis node position.
    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Node values in flat layout order (axis 0 fastest).
    pub fn flat(&self) -> Result<Array1<f64>, FitError> {
        self.grid.layout().flatten(&self.values)
    }

    /// Every node with its subscripts and coordinates, in flat layout order.
    pub fn node_values(&self) -> impl Iterator<Item = GridNode> + '_ {
        let layout: &GridLayout = self.grid.layout();
        (0..layout.total_nodes()).map(move |flat| {
            let index = layout.subscripts(flat);
            let coords = self.grid.node_coordinates(&index);
            let value = self.values[index.as_slice()];
            GridNode {
                index,
                coords,
                value,
            }
        })
    }
}

fn validate_inputs(
    points: ArrayView2<'_, f64>,
    grid: &GridSpec,
    smoothness: &Smoothness,
) -> Result<Vec<f64>, FitError> {
    let weights = smoothness.resolve(grid.ndim())?;
    grid.check_points(points)?;
    Ok(weights)
}

fn assemble(
    points: ArrayView2<'_, f64>,
    grid: &GridSpec,
    weights: &[f64],
    method: InterpMethod,
) -> Result<AssembledSystem, FitError> {
    let locations = locate_points(grid, points);
    let fidelity = assemble_fidelity(grid, &locations, method)?;
    let penalties = assemble_smoothness(grid, weights, points.nrows())?;
    Ok(AssembledSystem {
        fidelity,
        penalties,
    })
}

/// Assembles the fidelity and per-axis smoothness blocks without solving, for
/// callers that add their own rows or use their own solver.
pub fn build_system(
    points: ArrayView2<'_, f64>,
    grid: &GridSpec,
    smoothness: &Smoothness,
    method: InterpMethod,
) -> Result<AssembledSystem, FitError> {
    let weights = validate_inputs(points, grid, smoothness)?;
    assemble(points, grid, &weights, method)
}

/// Fits node values of `grid` to scattered `points` (one per row) and their
/// `values`.
pub fn fit_grid(
    points: ArrayView2<'_, f64>,
    values: ArrayView1<'_, f64>,
    grid: &GridSpec,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let weights = validate_inputs(points, grid, &options.smoothness)?;
    check_values(points, values)?;
    if weights.iter().all(|&w| w == 0.0) {
        log::warn!(
            "all smoothness weights are zero; grid nodes away from the data will be unconstrained"
        );
    }

    let system = assemble(points, grid, &weights, options.interp_method)?;
    let mut smoothness_rows = vec![0usize; grid.ndim()];
    for penalty in &system.penalties {
        smoothness_rows[penalty.axis] = penalty.nrows();
    }
    let stacked = system.stacked(values)?;
    let solution = solve_stacked(&stacked, options.solver)?;

    let residual = stacked.residual(&solution.coefficients);
    let m = stacked.fidelity_rows;
    let fit_part = residual.slice(s![..m]);
    let penalty_part = residual.slice(s![m..]);
    let diagnostics = FitDiagnostics {
        solver: options.solver,
        interp_method: options.interp_method,
        fidelity_rows: m,
        smoothness_rows,
        nonzeros: stacked.nonzeros(),
        fidelity_rmse: (fit_part.dot(&fit_part) / m as f64).sqrt(),
        penalty_norm: penalty_part.dot(&penalty_part).sqrt(),
        normal_residual: solution.normal_residual,
    };
    drop(stacked);

    let values = grid.layout().reshape(solution.coefficients)?;
    Ok(FitResult {
        values,
        grid: grid.clone(),
        diagnostics,
    })
}

/// Builds the grid from raw node vectors and fits it; grid errors surface here.
pub fn fit_scattered<A>(
    points: ArrayView2<'_, f64>,
    values: ArrayView1<'_, f64>,
    axes: Vec<A>,
    options: &FitOptions,
) -> Result<FitResult, FitError>
where
    A: Into<Array1<f64>>,
{
    let grid = GridSpec::new(axes)?;
    fit_grid(points, values, &grid, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, IxDyn, array};

    #[test]
    fn exact_nodes_are_reproduced_with_negligible_smoothing() {
        let points = array![[0.0], [1.0], [2.0], [3.0]];
        let values = array![0.0, 1.0, 4.0, 9.0];
        let options = FitOptions::new(1e-8, InterpMethod::Linear, SolverKind::Normal);
        let fit = fit_scattered(
            points.view(),
            values.view(),
            vec![array![0.0, 1.0, 2.0, 3.0]],
            &options,
        )
        .expect("fit");
        assert_eq!(fit.shape(), &[4]);
        for (i, expected) in values.iter().enumerate() {
            assert_abs_diff_eq!(fit.values()[IxDyn(&[i])], *expected, epsilon = 1e-6);
        }
        assert_eq!(fit.diagnostics.fidelity_rows, 4);
        assert_eq!(fit.diagnostics.smoothness_rows, vec![2]);
        assert!(fit.diagnostics.fidelity_rmse < 1e-6);
    }

    #[test]
    fn validation_happens_before_assembly() {
        let points = array![[0.5, 0.5], [1.5, 0.5]];
        let values = array![1.0, 2.0];
        let grid = GridSpec::uniform(&[(0.0, 1.0, 3), (0.0, 1.0, 3)]).expect("grid");
        let err = fit_grid(points.view(), values.view(), &grid, &FitOptions::default()).unwrap_err();
        assert!(matches!(err, FitError::DomainBounds { axis: 0, point: 1, .. }));

        let points = array![[0.5, 0.5]];
        let err = fit_grid(points.view(), values.view(), &grid, &FitOptions::default()).unwrap_err();
        assert!(matches!(err, FitError::InputShape { field: "values", .. }));

        let options = FitOptions::new(vec![0.1], InterpMethod::Linear, SolverKind::Normal);
        let err = fit_grid(points.view(), array![1.0].view(), &grid, &options).unwrap_err();
        assert!(matches!(err, FitError::InputShape { field: "smoothness", .. }));
    }

    #[test]
    fn build_system_exposes_blocks_without_solving() {
        let grid = GridSpec::uniform(&[(0.0, 1.0, 4), (0.0, 2.0, 3)]).expect("grid");
        let points = array![[0.1, 0.1], [0.9, 1.9], [0.5, 1.0]];
        let system = build_system(
            points.view(),
            &grid,
            &Smoothness::PerAxis(vec![1.0, 0.0]),
            InterpMethod::Nearest,
        )
        .expect("system");
        assert_eq!(system.fidelity.nrows(), 3);
        assert_eq!(system.ncols(), 12);
        assert_eq!(system.penalties.len(), 1);
        assert_eq!(system.penalties[0].axis, 0);
        assert_eq!(system.smoothness_rows(), 2 * 3);
        assert_eq!(system.row_count(), 3 + 6);

        let values = array![1.0, 2.0, 3.0];
        let rhs = system.rhs(values.view()).expect("rhs");
        assert_eq!(rhs.len(), 9);
        assert_eq!(rhs.slice(s![..3]), values);
        assert!(rhs.slice(s![3..]).iter().all(|&v| v == 0.0));

        let stacked = system.stacked(values.view()).expect("stack");
        assert_eq!(stacked.nrows(), 9);
        assert_eq!(stacked.rhs, rhs);
    }

    #[test]
    fn rhs_rejects_mismatched_value_counts() {
        let grid = GridSpec::uniform(&[(0.0, 1.0, 3), (0.0, 1.0, 3)]).expect("grid");
        let points = array![[0.2, 0.2], [0.7, 0.4]];
        let system = build_system(
            points.view(),
            &grid,
            &Smoothness::Uniform(1.0),
            InterpMethod::Linear,
        )
        .expect("system");
        for values in [array![1.0], array![1.0, 2.0, 3.0]] {
            match system.rhs(values.view()) {
                Err(FitError::InputShape {
                    field,
                    expected,
                    found,
                }) => {
                    assert_eq!(field, "values");
                    assert_eq!(expected, 2);
                    assert_eq!(found, values.len());
                }
                other => panic!("expected InputShape, got {other:?}"),
            }
        }
    }

    #[test]
    fn nodes_iterate_in_layout_order_with_coordinates() {
        let grid = GridSpec::new(vec![array![0.0, 1.0, 2.0], array![10.0, 20.0, 30.0]])
            .expect("grid");
        let points = Array2::from_shape_fn((9, 2), |(i, j)| {
            if j == 0 { (i % 3) as f64 } else { 10.0 * (1 + i / 3) as f64 }
        });
        let values = Array1::from_shape_fn(9, |i| (i % 3) as f64 + 0.1 * (10.0 * (1 + i / 3) as f64));
        let fit = fit_grid(points.view(), values.view(), &grid, &FitOptions::default()).expect("fit");
        let nodes: Vec<GridNode> = fit.node_values().collect();
        assert_eq!(nodes.len(), 9);
        assert_eq!(nodes[1].index, vec![1, 0]);
        assert_eq!(nodes[3].coords, vec![0.0, 20.0]);
        for node in &nodes {
            let expected = node.coords[0] + 0.1 * node.coords[1];
            assert_abs_diff_eq!(node.value, expected, epsilon = 1e-8);
        }
        let flat = fit.flat().expect("flat");
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(flat[i], node.value);
        }
    }
}
