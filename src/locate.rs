use crate::assembly::{CHUNK_SIZE, PAR_THRESHOLD, assembly_thread_pool};
use crate::grid::GridSpec;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

/// Position of a coordinate within one axis of the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellLocation {
    /// 0-based interval index in `0..len - 1`; the interval spans nodes
    /// `cell` and `cell + 1`.
    pub cell: usize,
    /// Offset within the interval: 0 at the lower node, 1 at the upper node.
    pub fraction: f64,
}

/// Cell locations for a batch of points, stored point-major.
#[derive(Debug, Clone, PartialEq)]
pub struct CellLocations {
    ndim: usize,
    entries: Vec<CellLocation>,
}

impl CellLocations {
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn len(&self) -> usize {
        self.entries.len().checked_div(self.ndim).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-axis locations of point `index`.
    pub fn point(&self, index: usize) -> &[CellLocation] {
        &self.entries[index * self.ndim..(index + 1) * self.ndim]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[CellLocation]> {
        self.entries.chunks_exact(self.ndim)
    }
}

/// Locates `x` within a strictly increasing node vector.
///
/// A coordinate equal to the last node lands in the last interval with
/// fraction 1. The caller guarantees `x` lies within the node range.
#[inline]
pub fn locate_coordinate(nodes: ArrayView1<'_, f64>, x: f64) -> CellLocation {
    let n = nodes.len();
    debug_assert!(n >= 2);
    let below = match nodes.as_slice() {
        Some(slice) => slice.partition_point(|&node| node <= x),
        None => nodes.iter().take_while(|&&node| node <= x).count(),
    };
    let cell = below.saturating_sub(1).min(n - 2);
    let lo = nodes[cell];
    let hi = nodes[cell + 1];
    let fraction = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
    CellLocation { cell, fraction }
}

fn locate_row(grid: &GridSpec, row: ArrayView1<'_, f64>, out: &mut Vec<CellLocation>) {
    for (axis, &x) in grid.axes().iter().zip(row.iter()) {
        out.push(locate_coordinate(axis.nodes(), x));
    }
}

/// Locates every point (one per row) in the grid.
///
/// Points must already have passed [`GridSpec::check_points`].
pub fn locate_points(grid: &GridSpec, points: ArrayView2<'_, f64>) -> CellLocations {
    let ndim = grid.ndim();
    let nrows = points.nrows();

    let entries = if nrows >= PAR_THRESHOLD {
        assembly_thread_pool().install(|| {
            let row_starts: Vec<usize> = (0..nrows).step_by(CHUNK_SIZE).collect();
            let chunks: Vec<Vec<CellLocation>> = row_starts
                .into_par_iter()
                .map(|chunk_start| {
                    let row_end = (chunk_start + CHUNK_SIZE).min(nrows);
                    let mut local = Vec::with_capacity((row_end - chunk_start) * ndim);
                    for row in chunk_start..row_end {
                        locate_row(grid, points.row(row), &mut local);
                    }
                    local
                })
                .collect();
            chunks.concat()
        })
    } else {
        let mut entries = Vec::with_capacity(nrows * ndim);
        for row in points.outer_iter() {
            locate_row(grid, row, &mut entries);
        }
        entries
    };

    CellLocations { ndim, entries }
}
