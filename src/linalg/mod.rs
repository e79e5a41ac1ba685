//! Sparse linear algebra on faer matrices with ndarray vectors at the edges.

pub mod faer_ndarray;
pub mod sparse_exact;
