use crate::assembly::{CHUNK_SIZE, PAR_THRESHOLD, assembly_thread_pool};
use crate::estimate::FitError;
use crate::grid::GridSpec;
use crate::layout::GridLayout;
use crate::locate::{CellLocation, CellLocations};
use crate::types::InterpMethod;
use faer::sparse::{SparseColMat, Triplet};
use rayon::prelude::*;

/// Emits the interpolation weights of one located point.
///
/// `corner` is scratch space of length `ndim`.
fn fill_point_row<F>(
    locs: &[CellLocation],
    layout: &GridLayout,
    method: InterpMethod,
    corner: &mut [usize],
    mut write_entry: F,
) where
    F: FnMut(usize, f64),
{
    match method {
        InterpMethod::Nearest => {
            for (slot, loc) in corner.iter_mut().zip(locs) {
                // Round half up: a point exactly mid-cell goes to the upper node.
                *slot = loc.cell + usize::from(loc.fraction >= 0.5);
            }
            write_entry(layout.flat_index(corner), 1.0);
        }
        InterpMethod::Linear => {
            let ndim = locs.len();
            for bits in 0..(1usize << ndim) {
                let mut weight = 1.0f64;
                for (axis, (slot, loc)) in corner.iter_mut().zip(locs).enumerate() {
                    if (bits >> axis) & 1 == 1 {
                        *slot = loc.cell + 1;
                        weight *= loc.fraction;
                    } else {
                        *slot = loc.cell;
                        weight *= 1.0 - loc.fraction;
                    }
                }
                write_entry(layout.flat_index(corner), weight);
            }
        }
    }
}

/// Builds the `m x N` data-fit matrix: row `i` expresses the interpolated grid
/// value at point `i` as a weighted sum of node values.
///
/// Every row sums to one. Linear rows carry all `2^n` corner entries, including
/// zero weights for points on a cell face.
pub fn assemble_fidelity(
    grid: &GridSpec,
    locations: &CellLocations,
    method: InterpMethod,
) -> Result<SparseColMat<usize, f64>, FitError> {
    let layout = grid.layout();
    let ndim = grid.ndim();
    if locations.ndim() != ndim {
        return Err(FitError::InputShape {
            field: "cell locations",
            expected: ndim,
            found: locations.ndim(),
        });
    }
    let nrows = locations.len();
    let per_row = method.weights_per_point(ndim);

    let triplets: Vec<Triplet<usize, usize, f64>> = if nrows >= PAR_THRESHOLD {
        assembly_thread_pool().install(|| {
            let row_starts: Vec<usize> = (0..nrows).step_by(CHUNK_SIZE).collect();
            let chunks: Vec<Vec<Triplet<usize, usize, f64>>> = row_starts
                .into_par_iter()
                .map_init(
                    || vec![0usize; ndim],
                    |corner, chunk_start| {
                        let row_end = (chunk_start + CHUNK_SIZE).min(nrows);
                        let mut local = Vec::with_capacity((row_end - chunk_start) * per_row);
                        for row in chunk_start..row_end {
                            fill_point_row(
                                locations.point(row),
                                layout,
                                method,
                                corner,
                                |col, value| local.push(Triplet::new(row, col, value)),
                            );
                        }
                        local
                    },
                )
                .collect();
            // Chunks are concatenated in row order so the result does not depend
            // on scheduling.
            chunks.concat()
        })
    } else {
        let mut corner = vec![0usize; ndim];
        let mut triplets = Vec::with_capacity(nrows * per_row);
        for (row, locs) in locations.iter().enumerate() {
            fill_point_row(locs, layout, method, &mut corner, |col, value| {
                triplets.push(Triplet::new(row, col, value))
            });
        }
        triplets
    };

    log::debug!(
        "fidelity block: {} rows x {} cols, {} entries ({} scheme)",
        nrows,
        layout.total_nodes(),
        triplets.len(),
        method
    );

    SparseColMat::try_new_from_triplets(nrows, layout.total_nodes(), &triplets)
        .map_err(|err| FitError::SparseAssembly(format!("fidelity block: {err:?}")))
}
