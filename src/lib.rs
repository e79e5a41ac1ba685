#![deny(unused_imports)]

//! Smooth gridded lookup surfaces from scattered n-dimensional measurements.
//!
//! A fit solves a regularized linear least-squares problem on the nodes of a
//! rectilinear grid: rows that interpolate the grid at every scattered point
//! (fidelity) stacked on rows that penalize the discrete second derivative
//! along each axis (smoothness). The solution is returned as an n-dimensional
//! array indexed by per-axis node position, ready for a standard multilinear
//! or nearest-neighbour grid interpolator.

mod assembly;
pub mod estimate;
pub mod fidelity;
pub mod grid;
pub mod layout;
pub mod linalg;
pub mod locate;
pub mod smoothness;
pub mod solver;
pub mod types;

pub use estimate::{
    AssembledSystem, FitDiagnostics, FitError, FitResult, GridNode, build_system, fit_grid,
    fit_scattered,
};
pub use grid::{GridAxis, GridSpec, MIN_NODES_PER_AXIS};
pub use layout::GridLayout;
pub use locate::{CellLocation, CellLocations, locate_points};
pub use smoothness::AxisPenalty;
pub use types::{FitOptions, InterpMethod, Smoothness, SolverKind};
