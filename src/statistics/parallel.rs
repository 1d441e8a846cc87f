//! Parallel computation implementations for statistical operations
//!
//! Axis reductions plus [`map_grid_points`], which runs a kernel on every
//! `(lat, lon)` time series of a cube. Both use the global Rayon pool.

use super::operations::nan_std;
use crate::errors::{PmpError, Result};
use ndarray::{Array2, Array3, ArrayD, Axis};
use rayon::prelude::*;
use tracing::debug;

/// Gather the series along `axis` for every output element and reduce it.
fn parallel_reduce_axis<F>(data: &ArrayD<f64>, axis: usize, reduce: F) -> Result<ArrayD<f64>>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let original_shape = data.shape();
    let axis_len = original_shape[axis];

    let mut new_shape = original_shape.to_vec();
    new_shape.remove(axis);
    let output_size: usize = new_shape.iter().product();

    debug!(
        elements = output_size,
        threads = rayon::current_num_threads(),
        "parallel axis reduction"
    );

    let result: Vec<f64> = (0..output_size)
        .into_par_iter()
        .map(|flat_idx| {
            // Convert flat index back to multi-dimensional coordinates
            let mut coords = vec![0; original_shape.len()];
            let mut remaining = flat_idx;

            let mut coord_idx = 0;
            for dim_idx in 0..original_shape.len() {
                if dim_idx != axis {
                    let stride = new_shape[coord_idx + 1..].iter().product::<usize>();
                    coords[dim_idx] = remaining / stride;
                    remaining %= stride;
                    coord_idx += 1;
                }
            }

            let mut series = Vec::with_capacity(axis_len);
            for i in 0..axis_len {
                coords[axis] = i;
                if let Some(&value) = data.get(coords.as_slice()) {
                    series.push(value);
                }
            }
            reduce(&series)
        })
        .collect();

    Ok(ArrayD::from_shape_vec(new_shape, result)?)
}

/// Computes the NaN-skipping mean along an axis
///
/// # Errors
///
/// Returns an error if array reshaping fails.
pub fn parallel_mean_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    parallel_reduce_axis(data, axis, |series| {
        let (sum, count) = series
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if count > 0 {
            sum / count as f64
        } else {
            f64::NAN
        }
    })
}

/// Population standard deviation along an axis, skipping NaN
pub fn parallel_std_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    parallel_reduce_axis(data, axis, |series| nan_std(series, 0))
}

/// Computes sum along an axis using ndarray's `fold_axis`
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_sum_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let result = data.fold_axis(Axis(axis), 0.0_f64, |&acc, &x| {
        if x.is_finite() {
            acc + x
        } else {
            acc
        }
    });

    Ok(result.into_dyn())
}

/// Computes minimum along an axis
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_min_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let result = data.fold_axis(Axis(axis), f64::INFINITY, |&acc, &x| {
        if x.is_finite() {
            acc.min(x)
        } else {
            acc
        }
    });

    // INFINITY means no valid values were found
    let final_result = result.mapv(|x| if x == f64::INFINITY { f64::NAN } else { x });
    Ok(final_result.into_dyn())
}

/// Computes maximum along an axis
///
/// # Errors
///
/// Returns an error if the axis is invalid.
pub fn parallel_max_axis(data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>> {
    let result = data.fold_axis(Axis(axis), f64::NEG_INFINITY, |&acc, &x| {
        if x.is_finite() {
            acc.max(x)
        } else {
            acc
        }
    });

    let final_result = result.mapv(|x| if x == f64::NEG_INFINITY { f64::NAN } else { x });
    Ok(final_result.into_dyn())
}

/// Apply `kernel` to the time series at every grid point in parallel.
///
/// The kernel must return exactly `out_len` values; they form the leading
/// axis of the result.
///
/// # Errors
///
/// Propagates the first kernel error, or a shape error when a kernel
/// returns the wrong number of values.
pub fn map_grid_points<F>(data: &Array3<f64>, out_len: usize, kernel: F) -> Result<Array3<f64>>
where
    F: Fn(&[f64]) -> Result<Vec<f64>> + Sync,
{
    let (_, nlat, nlon) = data.dim();
    debug!(
        points = nlat * nlon,
        threads = rayon::current_num_threads(),
        "mapping kernel over grid points"
    );

    let columns: Vec<Vec<f64>> = (0..nlat * nlon)
        .into_par_iter()
        .map(|idx| {
            let (i, j) = (idx / nlon, idx % nlon);
            let series: Vec<f64> = data.slice(ndarray::s![.., i, j]).to_vec();
            let out = kernel(&series)?;
            if out.len() != out_len {
                return Err(PmpError::ShapeMismatch {
                    context: "grid point kernel output".into(),
                    left: vec![out.len()],
                    right: vec![out_len],
                });
            }
            Ok(out)
        })
        .collect::<Result<_>>()?;

    let mut result = Array3::from_elem((out_len, nlat, nlon), f64::NAN);
    for (idx, column) in columns.into_iter().enumerate() {
        let (i, j) = (idx / nlon, idx % nlon);
        for (t, value) in column.into_iter().enumerate() {
            result[[t, i, j]] = value;
        }
    }
    Ok(result)
}

/// Apply a scalar kernel at every grid point, producing a map.
pub fn map_grid_points_scalar<F>(data: &Array3<f64>, kernel: F) -> Result<Array2<f64>>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let out = map_grid_points(data, 1, |series| Ok(vec![kernel(series)]))?;
    Ok(out.index_axis_move(Axis(0), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn mean_axis_skips_nan() {
        let mut data = Array3::from_shape_fn((3, 2, 2), |(t, _, _)| t as f64).into_dyn();
        data[[2, 0, 0]] = f64::NAN;
        let mean = parallel_mean_axis(&data, 0).unwrap();
        assert_relative_eq!(mean[[0, 0]], 0.5);
        assert_relative_eq!(mean[[1, 1]], 1.0);
    }

    #[test]
    fn min_max_all_nan_column() {
        let data = Array3::from_elem((2, 1, 1), f64::NAN).into_dyn();
        assert!(parallel_min_axis(&data, 0).unwrap()[[0, 0]].is_nan());
        assert!(parallel_max_axis(&data, 0).unwrap()[[0, 0]].is_nan());
    }

    #[test]
    fn kernel_runs_per_point() {
        let data = Array3::from_shape_fn((4, 2, 3), |(t, i, j)| (t + i * 10 + j * 100) as f64);
        let cumsum = map_grid_points(&data, 4, |s| {
            Ok(s.iter()
                .scan(0.0, |acc, v| {
                    *acc += v;
                    Some(*acc)
                })
                .collect())
        })
        .unwrap();
        assert_relative_eq!(cumsum[[3, 1, 2]], 4.0 * 210.0 + 6.0);

        let err = map_grid_points(&data, 2, |s| Ok(s.to_vec())).unwrap_err();
        assert!(matches!(err, PmpError::ShapeMismatch { .. }));
    }
}
