//! Area-weighted comparison statistics between a model field (`dm`) and a
//! reference field (`do`).
//!
//! Spatial functions take `(lat, lon)` maps and a weight map of the same
//! shape (usually [`Grid::area_weights`](crate::field::Grid::area_weights)).
//! `*_xyt` functions take `(time, lat, lon)` cubes plus one weight per time
//! step. Points where either input is NaN are excluded.

use crate::errors::{PmpError, Result};
use crate::field::Field;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
use serde::Serialize;

/// Day weights per climatology step used by [`seasonal_mean`]. The table is
/// shifted by one month relative to the calendar (December weighs 30,
/// February 31); published metrics use it as is.
pub const SEASON_MONTH_WEIGHTS: [f64; 12] =
    [31.0, 31.0, 28.25, 31.0, 30.0, 31.0, 30.0, 31.0, 31.0, 30.0, 31.0, 30.0];

const CONTACT: &str = "pcmdi-metrics@llnl.gov";

/// Self-description of a metric, written to the metrics JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    #[serde(rename = "Name")]
    pub name: &'static str,
    #[serde(rename = "Abstract")]
    pub summary: &'static str,
    #[serde(rename = "URI", skip_serializing_if = "Option::is_none")]
    pub uri: Option<&'static str>,
    #[serde(rename = "Contact")]
    pub contact: &'static str,
    #[serde(rename = "Comments", skip_serializing_if = "Option::is_none")]
    pub comments: Option<&'static str>,
}

impl MetricDefinition {
    const fn new(name: &'static str, summary: &'static str) -> Self {
        Self {
            name,
            summary,
            uri: None,
            contact: CONTACT,
            comments: None,
        }
    }

    const fn with_comments(mut self, comments: &'static str) -> Self {
        self.comments = Some(comments);
        self
    }
}

/// Definitions of every metric, keyed by function name.
pub fn metric_definitions() -> Vec<(&'static str, MetricDefinition)> {
    let clim = "Assumes input are 12 months climatology";
    vec![
        ("annual_mean", MetricDefinition::new("Annual Mean", "Compute Annual Mean").with_comments(clim)),
        ("bias_xy", MetricDefinition::new("Bias", "Compute Full Average of Model - Observation")),
        ("bias_xyt", MetricDefinition::new("Bias", "Compute Full Average of Model - Observation")),
        ("cor_xy", MetricDefinition::new("Spatial Correlation", "Compute Spatial Correlation")),
        ("mean_xy", MetricDefinition::new("Mean", "Area Mean (area weighted)")),
        (
            "meanabs_xy",
            MetricDefinition::new(
                "Mean Absolute Error",
                "Compute Full Average of Absolute Difference Between Model And Observation",
            ),
        ),
        (
            "meanabs_xyt",
            MetricDefinition::new(
                "Mean Absolute Error",
                "Compute Full Average of Absolute Difference Between Model And Observation",
            ),
        ),
        (
            "rms_0",
            MetricDefinition::new(
                "Root Mean Square over First Axis",
                "Compute Root Mean Square over the first axis",
            ),
        ),
        ("rms_xy", MetricDefinition::new("Spatial Root Mean Square", "Compute Spatial Root Mean Square")),
        (
            "rms_xyt",
            MetricDefinition::new(
                "Spatio-Temporal Root Mean Square",
                "Compute Spatial and Temporal Root Mean Square",
            ),
        ),
        (
            "rmsc_xy",
            MetricDefinition::new("Spatial Root Mean Square", "Compute Centered Spatial Root Mean Square"),
        ),
        ("seasonal_mean", MetricDefinition::new("Seasonal Mean", "Compute Seasonal Mean").with_comments(clim)),
        ("std_xy", MetricDefinition::new("Spatial Standard Deviation", "Compute Spatial Standard Deviation")),
        (
            "std_xyt",
            MetricDefinition::new(
                "Spatial-temporal Standard Deviation",
                "Compute Space-Time Standard Deviation",
            ),
        ),
        ("zonal_mean", MetricDefinition::new("Zonal Mean", "Compute Zonal Mean").with_comments("")),
    ]
}

fn check_same(context: &str, a: &[usize], b: &[usize]) -> Result<()> {
    if a != b {
        return Err(PmpError::ShapeMismatch {
            context: context.to_string(),
            left: a.to_vec(),
            right: b.to_vec(),
        });
    }
    Ok(())
}

/// Weighted mean of the finite values of `d`.
pub fn mean_xy(d: ArrayView2<'_, f64>, weights: ArrayView2<'_, f64>) -> Result<f64> {
    check_same("mean_xy weights", d.shape(), weights.shape())?;
    let mut sum = 0.0;
    let mut wsum = 0.0;
    Zip::from(&d).and(&weights).for_each(|&v, &w| {
        if v.is_finite() && w.is_finite() {
            sum += v * w;
            wsum += w;
        }
    });
    Ok(if wsum > 0.0 { sum / wsum } else { f64::NAN })
}

/// Both maps with NaN wherever either is missing.
fn common_mask(dm: ArrayView2<'_, f64>, d_o: ArrayView2<'_, f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    check_same("model vs reference", dm.shape(), d_o.shape())?;
    let mut a = dm.to_owned();
    let mut b = d_o.to_owned();
    Zip::from(&mut a).and(&mut b).for_each(|x, y| {
        if !(x.is_finite() && y.is_finite()) {
            *x = f64::NAN;
            *y = f64::NAN;
        }
    });
    Ok((a, b))
}

pub fn bias_xy(dm: ArrayView2<'_, f64>, d_o: ArrayView2<'_, f64>, w: ArrayView2<'_, f64>) -> Result<f64> {
    check_same("bias_xy", dm.shape(), d_o.shape())?;
    mean_xy((&dm - &d_o).view(), w)
}

pub fn meanabs_xy(dm: ArrayView2<'_, f64>, d_o: ArrayView2<'_, f64>, w: ArrayView2<'_, f64>) -> Result<f64> {
    check_same("meanabs_xy", dm.shape(), d_o.shape())?;
    mean_xy((&dm - &d_o).mapv(f64::abs).view(), w)
}

pub fn rms_xy(dm: ArrayView2<'_, f64>, d_o: ArrayView2<'_, f64>, w: ArrayView2<'_, f64>) -> Result<f64> {
    check_same("rms_xy", dm.shape(), d_o.shape())?;
    Ok(mean_xy((&dm - &d_o).mapv(|x| x * x).view(), w)?.sqrt())
}

/// Centered RMS: each field has its own area mean removed first, and is
/// optionally divided by its own spatial standard deviation.
pub fn rmsc_xy(
    dm: ArrayView2<'_, f64>,
    d_o: ArrayView2<'_, f64>,
    w: ArrayView2<'_, f64>,
    normalize_by_own_std: bool,
) -> Result<f64> {
    let (mut a, mut b) = common_mask(dm, d_o)?;
    if normalize_by_own_std {
        let sa = std_xy(a.view(), w)?;
        let sb = std_xy(b.view(), w)?;
        a.mapv_inplace(|v| v / sa);
        b.mapv_inplace(|v| v / sb);
    }
    let ma = mean_xy(a.view(), w)?;
    let mb = mean_xy(b.view(), w)?;
    rms_xy((a - ma).view(), (b - mb).view(), w)
}

/// Population standard deviation with area weights
pub fn std_xy(d: ArrayView2<'_, f64>, w: ArrayView2<'_, f64>) -> Result<f64> {
    let average = mean_xy(d, w)?;
    Ok(mean_xy(d.mapv(|v| (v - average).powi(2)).view(), w)?.sqrt())
}

/// Weighted spatial (pattern) correlation
pub fn cor_xy(dm: ArrayView2<'_, f64>, d_o: ArrayView2<'_, f64>, w: ArrayView2<'_, f64>) -> Result<f64> {
    let (a, b) = common_mask(dm, d_o)?;
    let ma = mean_xy(a.view(), w)?;
    let mb = mean_xy(b.view(), w)?;
    let covariance = mean_xy(((&a - ma) * (&b - mb)).view(), w)?;
    Ok(covariance / (std_xy(a.view(), w)? * std_xy(b.view(), w)?))
}

/// Weighted average over time of per-step values, skipping NaN steps.
fn time_average(values: &[f64], time_weights: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut wsum = 0.0;
    for (&v, &w) in values.iter().zip(time_weights) {
        if v.is_finite() {
            sum += v * w;
            wsum += w;
        }
    }
    if wsum > 0.0 {
        sum / wsum
    } else {
        f64::NAN
    }
}

fn per_step<F>(dm: &Array3<f64>, d_o: &Array3<f64>, time_weights: &[f64], f: F) -> Result<Vec<f64>>
where
    F: Fn(ArrayView2<'_, f64>, ArrayView2<'_, f64>) -> Result<f64>,
{
    check_same("model vs reference", dm.shape(), d_o.shape())?;
    if time_weights.len() != dm.len_of(Axis(0)) {
        return Err(PmpError::ShapeMismatch {
            context: "time weights".into(),
            left: vec![time_weights.len()],
            right: vec![dm.len_of(Axis(0))],
        });
    }
    dm.axis_iter(Axis(0))
        .zip(d_o.axis_iter(Axis(0)))
        .map(|(a, b)| f(a, b))
        .collect()
}

pub fn bias_xyt(dm: &Array3<f64>, d_o: &Array3<f64>, w: ArrayView2<'_, f64>, tw: &[f64]) -> Result<f64> {
    let steps = per_step(dm, d_o, tw, |a, b| bias_xy(a, b, w))?;
    Ok(time_average(&steps, tw))
}

pub fn meanabs_xyt(dm: &Array3<f64>, d_o: &Array3<f64>, w: ArrayView2<'_, f64>, tw: &[f64]) -> Result<f64> {
    let steps = per_step(dm, d_o, tw, |a, b| meanabs_xy(a, b, w))?;
    Ok(time_average(&steps, tw))
}

/// Time average of the per-step spatial RMS
pub fn rms_xyt(dm: &Array3<f64>, d_o: &Array3<f64>, w: ArrayView2<'_, f64>, tw: &[f64]) -> Result<f64> {
    let steps = per_step(dm, d_o, tw, |a, b| rms_xy(a, b, w))?;
    Ok(time_average(&steps, tw))
}

/// Space-time standard deviation about the space-time mean
pub fn std_xyt(d: &Array3<f64>, w: ArrayView2<'_, f64>, tw: &[f64]) -> Result<f64> {
    let means = per_step(d, d, tw, |a, _| mean_xy(a, w))?;
    let average = time_average(&means, tw);
    let variances = per_step(d, d, tw, |a, _| mean_xy(a.mapv(|v| (v - average).powi(2)).view(), w))?;
    Ok(time_average(&variances, tw).sqrt())
}

/// Mean over longitude of each latitude row, skipping NaN
pub fn zonal_mean(d: ArrayView2<'_, f64>) -> Array1<f64> {
    d.map_axis(Axis(1), |row| {
        let (s, n) = row
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            f64::NAN
        } else {
            s / n as f64
        }
    })
}

/// Latitude-weighted RMS of two zonal-mean profiles
pub fn rms_0(dm: ArrayView1<'_, f64>, d_o: ArrayView1<'_, f64>, lat_weights: ArrayView1<'_, f64>) -> Result<f64> {
    check_same("rms_0", dm.shape(), d_o.shape())?;
    check_same("rms_0 weights", dm.shape(), lat_weights.shape())?;
    let mut sum = 0.0;
    let mut wsum = 0.0;
    for ((&a, &b), &w) in dm.iter().zip(d_o.iter()).zip(lat_weights.iter()) {
        let d = a - b;
        if d.is_finite() {
            sum += d * d * w;
            wsum += w;
        }
    }
    Ok(if wsum > 0.0 { (sum / wsum).sqrt() } else { f64::NAN })
}

/// Time-weighted mean of a cube, e.g. the annual mean of a climatology.
pub fn annual_mean(d: &Array3<f64>, time_weights: &[f64]) -> Result<Array2<f64>> {
    if time_weights.len() != d.len_of(Axis(0)) {
        return Err(PmpError::ShapeMismatch {
            context: "annual_mean time weights".into(),
            left: vec![time_weights.len()],
            right: vec![d.len_of(Axis(0))],
        });
    }
    Ok(d.map_axis(Axis(0), |series| time_average(&series.to_vec(), time_weights)))
}

/// Month indices (0-based) of a standard season
pub fn season_months(season: &str) -> Result<[usize; 3]> {
    match season.to_ascii_lowercase().as_str() {
        "djf" => Ok([11, 0, 1]),
        "mam" => Ok([2, 3, 4]),
        "jja" => Ok([5, 6, 7]),
        "son" => Ok([8, 9, 10]),
        other => Err(PmpError::InvalidSeason(other.to_string())),
    }
}

/// Day-weighted seasonal mean of a 12-step climatology.
pub fn seasonal_mean(clim: &Array3<f64>, season: &str) -> Result<Array2<f64>> {
    if clim.len_of(Axis(0)) != 12 {
        return Err(PmpError::Statistics(format!(
            "seasonal_mean needs a 12 month climatology, got {} steps",
            clim.len_of(Axis(0))
        )));
    }
    let months = season_months(season)?;
    let days: f64 = months.iter().map(|&m| SEASON_MONTH_WEIGHTS[m]).sum();
    let mut out = Array2::zeros((clim.shape()[1], clim.shape()[2]));
    for &m in &months {
        out.scaled_add(SEASON_MONTH_WEIGHTS[m], &clim.index_axis(Axis(0), m));
    }
    Ok(out / days)
}

/// Days per time step of a climatology field, used as `*_xyt` weights.
pub fn climatology_time_weights(field: &Field) -> Vec<f64> {
    match &field.time {
        Some(axis) => axis
            .dates
            .iter()
            .map(|d| f64::from(axis.calendar.days_in_month(d.year, d.month)))
            .collect(),
        None => vec![1.0; field.n_time()],
    }
}

/// Pearson correlation of two series over pairs where both are finite
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let ma = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mb = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    cov / (va * vb).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn weights() -> Array2<f64> {
        array![[1.0, 1.0], [2.0, 2.0]]
    }

    #[test]
    fn weighted_mean_and_bias() {
        let dm = array![[1.0, 1.0], [4.0, 4.0]];
        let d_o = array![[0.0, 0.0], [1.0, 1.0]];
        let w = weights();
        assert_relative_eq!(mean_xy(dm.view(), w.view()).unwrap(), 3.0);
        assert_relative_eq!(bias_xy(dm.view(), d_o.view(), w.view()).unwrap(), 7.0 / 3.0);
        assert_relative_eq!(rms_xy(dm.view(), d_o.view(), w.view()).unwrap(), (19.0_f64 / 3.0).sqrt());
    }

    #[test]
    fn nan_points_are_skipped() {
        let dm = array![[f64::NAN, 2.0], [2.0, 2.0]];
        assert_relative_eq!(mean_xy(dm.view(), weights().view()).unwrap(), 2.0);
    }

    #[test]
    fn identical_fields_have_perfect_scores() {
        let grid = Grid::uniform(30.0, 60.0);
        let w = grid.area_weights();
        let d = Array2::from_shape_fn(grid.shape(), |(i, j)| (i * 7 + j * 3) as f64 % 11.0);
        assert_relative_eq!(cor_xy(d.view(), d.view(), w.view()).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(rmsc_xy(d.view(), d.view(), w.view(), false).unwrap(), 0.0);
        let shifted = &d + 5.0;
        assert_relative_eq!(rmsc_xy(shifted.view(), d.view(), w.view(), false).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(bias_xy(shifted.view(), d.view(), w.view()).unwrap(), 5.0, epsilon = 1e-12);
        let scaled = &d * 3.0;
        assert_relative_eq!(rmsc_xy(scaled.view(), d.view(), w.view(), true).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn seasonal_mean_uses_day_weights() {
        let clim = Array3::from_shape_fn((12, 1, 1), |(t, _, _)| t as f64);
        let djf = seasonal_mean(&clim, "djf").unwrap();
        let expected = (11.0 * 30.0 + 0.0 * 31.0 + 1.0 * 31.0) / 92.0;
        assert_relative_eq!(djf[[0, 0]], expected);
        assert!(seasonal_mean(&clim, "xyz").is_err());
    }

    #[test]
    fn xyt_statistics() {
        let dm = Array3::from_shape_fn((2, 2, 2), |(t, _, _)| if t == 0 { 1.0 } else { 3.0 });
        let d_o = Array3::zeros((2, 2, 2));
        let w = weights();
        let tw = [1.0, 1.0];
        assert_relative_eq!(rms_xyt(&dm, &d_o, w.view(), &tw).unwrap(), 2.0);
        assert_relative_eq!(bias_xyt(&dm, &d_o, w.view(), &tw).unwrap(), 2.0);
        assert_relative_eq!(std_xyt(&dm, w.view(), &tw).unwrap(), 1.0);
        let am = annual_mean(&dm, &[3.0, 1.0]).unwrap();
        assert_relative_eq!(am[[1, 1]], 1.5);
    }

    #[test]
    fn zonal_rms() {
        let zm = zonal_mean(array![[1.0, 3.0], [f64::NAN, 4.0]].view());
        assert_eq!(zm.to_vec(), vec![2.0, 4.0]);
        let r = rms_0(zm.view(), array![2.0, 2.0].view(), array![1.0, 3.0].view()).unwrap();
        assert_relative_eq!(r, 3.0_f64.sqrt());
    }

    #[test]
    fn temporal_correlation() {
        assert_relative_eq!(correlation(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0);
        assert_relative_eq!(correlation(&[1.0, 2.0, 3.0, f64::NAN], &[3.0, 2.0, 1.0, 0.0]), -1.0);
    }
}
