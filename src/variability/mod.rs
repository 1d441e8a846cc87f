//! Modes of variability (NAM, NAO, SAM, PNA, PDO, ...) from EOF analysis
//!
//! - [`eof`]: the weighted EOF solver
//! - [`analysis`]: anomaly preparation, sign conventions, regression
//! - [`stats`]: model vs observed pattern statistics
//! - [`driver`]: the end-to-end metrics run

pub mod analysis;
pub mod driver;
pub mod eof;
pub mod stats;

pub use analysis::{
    adjust_timeseries, arbitrary_checking, eof_analysis_get_variance_mode, gain_pcs_fraction,
    gain_pseudo_pcs, get_anomaly_timeseries, get_residual_timeseries, linear_regression,
    linear_regression_on_globe, VarianceMode,
};
pub use driver::{run, VariabilityConfig};
pub use eof::{EofSolver, PcScaling};
pub use stats::{calc_stats_save_dict, calc_std, ModeMethod, ModePattern, ObsPattern};
