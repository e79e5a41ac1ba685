//! Second-derivative penalty rows along each grid axis.
//!
//! For axis `d`, every node that is interior along `d` (first and last index
//! excluded, all positions on the other axes included) contributes one row
//! with three entries: the second derivative of the parabola through the three
//! consecutive nodes centred on it. Nodes may be unevenly spaced.
//!
//! Each block is scaled by `weight * sqrt(m / k) * extent^2`, where `m` is the
//! number of scattered points, `k` the number of rows in the block and
//! `extent` the axis span. The square root balances the aggregate fidelity and
//! smoothness contributions whatever the node count; the squared extent keeps
//! a given weight meaningful whatever the coordinate units.

use crate::estimate::FitError;
use crate::grid::GridSpec;
use faer::sparse::{SparseColMat, Triplet};
use rayon::prelude::*;

/// Scaled second-derivative penalty block for one axis.
#[derive(Debug, Clone)]
pub struct AxisPenalty {
    pub axis: usize,
    pub weight: f64,
    pub scale: f64,
    pub matrix: SparseColMat<usize, f64>,
}

impl AxisPenalty {
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }
}

/// Second derivative of the Lagrange parabola through `x1 < x2 < x3`, as
/// weights on the three ordinates.
#[inline]
pub fn second_derivative_weights(x1: f64, x2: f64, x3: f64) -> [f64; 3] {
    [
        2.0 / ((x1 - x2) * (x1 - x3)),
        2.0 / ((x2 - x1) * (x2 - x3)),
        2.0 / ((x3 - x1) * (x3 - x2)),
    ]
}

/// Number of penalty rows for `axis`: interior nodes along it times the node
/// count of every other axis.
pub fn smoothness_equation_count(grid: &GridSpec, axis: usize) -> usize {
    let len = grid.shape()[axis];
    (grid.total_nodes() / len) * (len - 2)
}

/// Multiplier applied to the raw second-derivative block of one axis.
pub fn axis_penalty_scale(weight: f64, num_points: usize, num_equations: usize, extent: f64) -> f64 {
    weight * (num_points as f64 / num_equations as f64).sqrt() * extent * extent
}

/// Builds the scaled penalty block for `axis`.
pub fn assemble_axis_penalty(
    grid: &GridSpec,
    axis: usize,
    weight: f64,
    num_points: usize,
) -> Result<AxisPenalty, FitError> {
    let layout = grid.layout();
    let grid_axis = grid.axis(axis);
    let nodes = grid_axis.nodes();
    let len = grid_axis.len();
    let stride = layout.stride(axis);
    let num_equations = smoothness_equation_count(grid, axis);
    let scale = axis_penalty_scale(weight, num_points, num_equations, grid_axis.extent());

    // One stencil per interior index along the axis, shared by every position
    // on the other axes.
    let stencils: Vec<[f64; 3]> = (1..len - 1)
        .map(|i| {
            second_derivative_weights(nodes[i - 1], nodes[i], nodes[i + 1]).map(|w| w * scale)
        })
        .collect();

    let mut triplets = Vec::with_capacity(3 * num_equations);
    let mut subs = vec![0usize; grid.ndim()];
    let mut row = 0usize;
    for flat in 0..layout.total_nodes() {
        layout.subscripts_into(flat, &mut subs);
        let i = subs[axis];
        if i == 0 || i == len - 1 {
            continue;
        }
        let [w1, w2, w3] = stencils[i - 1];
        triplets.push(Triplet::new(row, flat - stride, w1));
        triplets.push(Triplet::new(row, flat, w2));
        triplets.push(Triplet::new(row, flat + stride, w3));
        row += 1;
    }
    debug_assert_eq!(row, num_equations);

    log::debug!(
        "smoothness block axis {axis}: {row} rows, weight {weight:.3e}, scale {scale:.6e}"
    );

    let matrix = SparseColMat::try_new_from_triplets(row, layout.total_nodes(), &triplets)
        .map_err(|err| FitError::SparseAssembly(format!("smoothness block {axis}: {err:?}")))?;
    Ok(AxisPenalty {
        axis,
        weight,
        scale,
        matrix,
    })
}

/// Builds penalty blocks for every axis with a positive weight, in axis order.
///
/// Axes with weight zero produce no block at all.
pub fn assemble_smoothness(
    grid: &GridSpec,
    weights: &[f64],
    num_points: usize,
) -> Result<Vec<AxisPenalty>, FitError> {
    if weights.len() != grid.ndim() {
        return Err(FitError::InputShape {
            field: "smoothness",
            expected: grid.ndim(),
            found: weights.len(),
        });
    }
    if num_points == 0 {
        return Err(FitError::EmptyInput { field: "points" });
    }
    let active: Vec<(usize, f64)> = weights
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, w)| w > 0.0)
        .collect();
    active
        .into_par_iter()
        .map(|(axis, weight)| assemble_axis_penalty(grid, axis, weight, num_points))
        .collect()
}
