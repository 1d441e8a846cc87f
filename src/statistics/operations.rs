//! Core statistical operations and traits
//!
//! NaN marks missing data throughout the crate, so every reduction here skips
//! non-finite values and yields NaN when nothing valid is left.

use crate::errors::{PmpError, Result};
use ndarray::{Array3, ArrayD, Axis};

/// Supported statistical operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatOperation {
    /// Arithmetic mean
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Population standard deviation
    Std,
}

impl StatOperation {
    /// Get the string representation of the operation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "minimum",
            Self::Max => "maximum",
            Self::Std => "std",
        }
    }

    /// Reduce a series, skipping non-finite values.
    pub fn apply(self, values: &[f64]) -> f64 {
        let valid = values.iter().copied().filter(|v| v.is_finite());
        match self {
            Self::Sum => valid.sum(),
            Self::Min => valid.fold(f64::NAN, f64::min),
            Self::Max => valid.fold(f64::NAN, f64::max),
            Self::Mean => {
                let (sum, n) = valid.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 {
                    f64::NAN
                } else {
                    sum / n as f64
                }
            }
            Self::Std => nan_std(values, 0),
        }
    }
}

impl std::str::FromStr for StatOperation {
    type Err = PmpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "min" | "minimum" => Ok(Self::Min),
            "max" | "maximum" => Ok(Self::Max),
            "std" => Ok(Self::Std),
            other => Err(PmpError::Statistics(format!("unknown statistic '{other}'"))),
        }
    }
}

/// Standard deviation of the finite values with `ddof` delta degrees of freedom.
pub fn nan_std(values: &[f64], ddof: usize) -> f64 {
    let valid: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.len() <= ddof {
        return f64::NAN;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let ss: f64 = valid.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (valid.len() - ddof) as f64).sqrt()
}

/// Trait for types that can perform statistical reductions along an axis
pub trait StatisticalReduction<T> {
    /// Perform a statistical reduction along the specified axis
    ///
    /// # Errors
    ///
    /// Returns an error if the axis is out of bounds for the array.
    fn reduce_along_axis(&self, axis: usize, operation: StatOperation) -> Result<ArrayD<T>>;
}

impl StatisticalReduction<f64> for ArrayD<f64> {
    fn reduce_along_axis(&self, axis: usize, operation: StatOperation) -> Result<ArrayD<f64>> {
        if axis >= self.ndim() {
            return Err(PmpError::Statistics(format!(
                "Axis {axis} is out of bounds for array with {} dimensions",
                self.ndim()
            )));
        }

        match operation {
            StatOperation::Mean => super::parallel::parallel_mean_axis(self, axis),
            StatOperation::Sum => super::parallel::parallel_sum_axis(self, axis),
            StatOperation::Min => super::parallel::parallel_min_axis(self, axis),
            StatOperation::Max => super::parallel::parallel_max_axis(self, axis),
            StatOperation::Std => super::parallel::parallel_std_axis(self, axis),
        }
    }
}

/// Reduce a `(time, lat, lon)` cube over time.
pub fn reduce_time(data: &Array3<f64>, operation: StatOperation) -> Result<ndarray::Array2<f64>> {
    let reduced = data.clone().into_dyn().reduce_along_axis(0, operation)?;
    Ok(reduced.into_dimensionality()?)
}

/// Reduce the selected time steps of a cube into one map.
pub fn reduce_steps(
    data: &Array3<f64>,
    steps: &[usize],
    operation: StatOperation,
) -> Result<ndarray::Array2<f64>> {
    reduce_time(&data.select(Axis(0), steps), operation)
}
