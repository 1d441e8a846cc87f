//! pcmdi_metrics: climate model evaluation metrics
//!
//! A Rust library for comparing climate model output with observations. It
//! reads gridded NetCDF fields and produces the PMP metrics JSON files:
//! mean climate statistics, modes of variability, monsoon indices, drought
//! (SPI), daily extremes and Köppen classification.
//!
//! ## Key Features
//!
//! - **Parameter validation**: JSON parameter files checked option by option
//! - **Area-weighted statistics**: bias, RMS, centred RMS, correlation, std
//! - **EOF analysis**: variability modes with sign conventions and CBF projection
//! - **Parallel kernels**: per grid point computations on Rayon's global pool
//! - **CF calendars**: `standard`, `noleap`, `all_leap` and `360_day` time axes
//!
//! ## Module Organization
//!
//! - [`parameter`]: dynamic parameter object and its checks
//! - [`cmec`]: CMEC environment to parameter file conversion
//! - [`field`], [`calendar`], [`netcdf_io`]: gridded data model and I/O
//! - [`regions`], [`seasons`], [`template`]: shared helpers
//! - [`statistics`]: reductions and model vs reference metrics
//! - [`mean_climate`], [`variability`], [`monsoon`], [`drought`],
//!   [`extremes`], [`koppen`]: the metrics packages
//! - [`output`]: metrics JSON writer
//! - [`parallel`], [`logging`], [`errors`]: runtime plumbing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pcmdi_metrics::prelude::*;
//! use std::path::Path;
//!
//! let model = read_field(Path::new("model_ac.nc"), "tas").unwrap();
//! let obs = read_field(Path::new("obs_ac.nc"), "tas").unwrap();
//! let metrics = pcmdi_metrics::mean_climate::compute_metrics("tas", &model, &obs).unwrap();
//! println!("{}", metrics["rms_xy"]["ann"]);
//! ```

pub mod calendar;
pub mod cmec;
pub mod drought;
pub mod errors;
pub mod extremes;
pub mod field;
pub mod koppen;
pub mod logging;
pub mod mean_climate;
pub mod monsoon;
pub mod netcdf_io;
pub mod output;
pub mod parallel;
pub mod parameter;
pub mod regions;
pub mod seasons;
pub mod statistics;
pub mod template;
pub mod variability;

pub use errors::{ParameterError, PmpError, Result};
pub use field::{Field, Grid, TimeAxis};
pub use parameter::PmpParameter;

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::calendar::{Calendar, ModelDate};
    pub use crate::errors::{ParameterError, PmpError, Result};
    pub use crate::field::{Field, Grid, TimeAxis};
    pub use crate::netcdf_io::{read_field, NetCDFWriter};
    pub use crate::output::MetricsOutput;
    pub use crate::parallel::ParallelConfig;
    pub use crate::parameter::PmpParameter;
    pub use crate::regions::{find_region, RegionSpec};
    pub use crate::statistics::{StatOperation, StatisticalReduction};
}
