//! Statistical computations and parallel reduction operations
//!
//! # Organization
//!
//! - [`operations`]: reduction kinds and the [`StatisticalReduction`] trait
//! - [`parallel`]: Rayon axis reductions and per-grid-point kernels
//! - [`metrics`]: area-weighted model vs reference statistics

pub mod metrics;
pub mod operations;
pub mod parallel;

pub use metrics::{
    annual_mean, bias_xy, bias_xyt, climatology_time_weights, cor_xy, correlation, mean_xy,
    meanabs_xy, meanabs_xyt, metric_definitions, rms_0, rms_xy, rms_xyt, rmsc_xy, seasonal_mean,
    std_xy, std_xyt, zonal_mean, MetricDefinition,
};
pub use operations::{nan_std, reduce_steps, reduce_time, StatOperation, StatisticalReduction};
pub use parallel::{
    map_grid_points, map_grid_points_scalar, parallel_max_axis, parallel_mean_axis,
    parallel_min_axis, parallel_std_axis, parallel_sum_axis,
};
