//! Batch splitting shared by point location and fidelity assembly.
//!
//! Batches at or above [`PAR_THRESHOLD`] rows run in [`CHUNK_SIZE`] chunks on a
//! dedicated pool; callers concatenate chunk outputs in chunk order.

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::OnceLock;

/// Row count above which assembly is split across the thread pool.
pub(crate) const PAR_THRESHOLD: usize = 256;
pub(crate) const CHUNK_SIZE: usize = 1024;

pub(crate) fn assembly_thread_pool() -> &'static ThreadPool {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .build()
            .expect("assembly thread pool initialization should succeed")
    })
}
