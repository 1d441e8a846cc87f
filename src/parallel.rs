//! Parallel processing configuration
//!
//! Per-grid-point kernels (SPI, Köppen, seasonal extremes) and axis reductions
//! run on Rayon's global thread pool. This module configures that pool.

use crate::errors::{PmpError, Result};
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

/// Configuration for parallel processing
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Create a configuration that uses all available CPU cores
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Create a configuration that uses a specific number of threads
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Set up the global Rayon thread pool with the specified configuration
    ///
    /// # Errors
    ///
    /// Returns [`PmpError::ThreadPool`] if the requested thread count is zero
    /// or the global pool has already been initialized.
    pub fn setup_global_pool(&self) -> Result<()> {
        match self.num_threads {
            Some(0) => Err(PmpError::ThreadPool(
                "thread count must be at least 1".to_string(),
            )),
            Some(num_threads) => {
                ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build_global()
                    .map_err(|e| {
                        PmpError::ThreadPool(format!(
                            "Failed to initialize thread pool with {num_threads} threads: {e}"
                        ))
                    })?;
                info!(threads = num_threads, "configured parallel processing");
                Ok(())
            }
            None => {
                debug!(
                    threads = rayon::current_num_threads(),
                    "using default thread pool configuration"
                );
                Ok(())
            }
        }
    }

    /// Get the current number of threads being used
    pub fn current_threads(&self) -> usize {
        rayon::current_num_threads()
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone)]
pub struct ParallelInfo {
    pub current_threads: usize,
    pub available_cores: usize,
    pub available_parallelism: usize,
}

/// Get information about the current parallel configuration
pub fn get_parallel_info() -> ParallelInfo {
    ParallelInfo {
        current_threads: rayon::current_num_threads(),
        available_cores: num_cpus::get(),
        available_parallelism: std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1),
    }
}

impl ParallelInfo {
    /// Log parallel processing information
    pub fn log(&self) {
        info!(
            current_threads = self.current_threads,
            available_cores = self.available_cores,
            available_parallelism = self.available_parallelism,
            "parallel processing information"
        );
    }
}
