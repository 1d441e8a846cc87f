//! Standardized Precipitation Index (SPI)
//!
//! Monthly precipitation is accumulated over `scale` months, a gamma
//! distribution is fitted per calendar month on a calibration record and the
//! cumulative probability is mapped onto the standard normal.
//!
//! Both records must be monthly and start in January.

use crate::errors::{ParameterError, PmpError, Result};
use crate::field::Field;
use crate::netcdf_io::{read_field, NetCDFWriter};
use crate::statistics::map_grid_points;
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Gamma, Normal};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

pub const SPI_UPPER_LIMIT: f64 = 3.09;
pub const SPI_LOWER_LIMIT: f64 = -3.09;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    #[default]
    Gamma,
}

impl FromStr for Distribution {
    type Err = PmpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gamma" => Ok(Self::Gamma),
            other => Err(ParameterError::InvalidValue {
                name: "distribution".into(),
                reason: format!("'{other}' is not supported, only 'gamma' is"),
            }
            .into()),
        }
    }
}

/// Running `scale`-month totals arranged as `(years, 12)`.
///
/// The first `scale - 1` months have no complete window and are NaN, as are
/// the months padding an incomplete final year.
pub fn accumulation(data: &[f64], scale: usize) -> Result<Array2<f64>> {
    if scale == 0 {
        return Err(ParameterError::InvalidValue {
            name: "temporal_scale".into(),
            reason: "must be at least 1".into(),
        }
        .into());
    }
    let n_years = data.len().div_ceil(12);
    let mut out = vec![f64::NAN; n_years * 12];
    for i in (scale - 1)..data.len() {
        out[i] = data[i + 1 - scale..=i].iter().sum();
    }
    Ok(Array2::from_shape_vec((n_years, 12), out)?)
}

struct GammaFit {
    shape: f64,
    scale: f64,
    p_zero: f64,
}

/// Thom maximum likelihood estimate on the positive values of one month.
fn fit_month(values: &[f64]) -> Option<GammaFit> {
    let valid: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let positive: Vec<f64> = valid.iter().copied().filter(|&v| v > 0.0).collect();
    if positive.is_empty() {
        return None;
    }
    let n = positive.len() as f64;
    let mean = positive.iter().sum::<f64>() / n;
    let log_mean = positive.iter().map(|v| v.ln()).sum::<f64>() / n;
    let a = mean.ln() - log_mean;
    if a.is_nan() || a <= 0.0 {
        return None;
    }
    let shape = (1.0 + (1.0 + 4.0 * a / 3.0).sqrt()) / (4.0 * a);
    Some(GammaFit {
        shape,
        scale: mean / shape,
        p_zero: (valid.len() - positive.len()) as f64 / valid.len() as f64,
    })
}

/// Standardize `calculation` with gamma fits from `calibration`, month by
/// month. Both are `(years, 12)`; the result is flattened back to a series.
pub fn gamma_transformation(calibration: &Array2<f64>, calculation: &Array2<f64>) -> Result<Vec<f64>> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| PmpError::Statistics(e.to_string()))?;
    let mut out = Array2::from_elem(calculation.dim(), f64::NAN);

    for month in 0..12 {
        let cal = calibration.column(month).to_vec();
        let Some(fit) = fit_month(&cal) else {
            continue;
        };
        let gamma = Gamma::new(fit.shape, 1.0 / fit.scale).map_err(|e| PmpError::Statistics(e.to_string()))?;
        for (year, &value) in calculation.column(month).iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            let p_gamma = if value > 0.0 { gamma.cdf(value) } else { 0.0 };
            let p = fit.p_zero + (1.0 - fit.p_zero) * p_gamma;
            out[[year, month]] = normal.inverse_cdf(p);
        }
    }
    Ok(out.into_iter().collect())
}

fn clip_negative(data: &[f64], label: &str) -> Vec<f64> {
    if data.iter().any(|&v| v < 0.0) {
        warn!("{label} data must be positive, negative values are set to 0");
    }
    data.iter().map(|&v| if v < 0.0 { 0.0 } else { v }).collect()
}

/// SPI-`scale` of a monthly precipitation series.
///
/// `calibration` provides the distribution parameters and may be the same
/// record as `calculation`. The result has the length of `calculation` and
/// is clipped to `[lower, upper]`; NaN stays NaN.
pub fn spi(
    calibration: &[f64],
    calculation: &[f64],
    scale: usize,
    distribution: Distribution,
    upper: f64,
    lower: f64,
) -> Result<Vec<f64>> {
    let cal = accumulation(&clip_negative(calibration, "Calibration"), scale)?;
    let calc = accumulation(&clip_negative(calculation, "Calculation"), scale)?;
    let transformed = match distribution {
        Distribution::Gamma => gamma_transformation(&cal, &calc)?,
    };
    Ok(transformed
        .into_iter()
        .take(calculation.len())
        .map(|v| if v.is_nan() { v } else { v.clamp(lower, upper) })
        .collect())
}

/// SPI at every grid point of `calculation`, calibrated on the same point
/// of `calibration`.
pub fn spi_field(
    calibration: &Field,
    calculation: &Field,
    scale: usize,
    distribution: Distribution,
) -> Result<Field> {
    if calibration.grid.shape() != calculation.grid.shape() {
        let (a, b) = (calibration.grid.shape(), calculation.grid.shape());
        return Err(PmpError::ShapeMismatch {
            context: "SPI calibration vs calculation grid".into(),
            left: vec![a.0, a.1],
            right: vec![b.0, b.1],
        });
    }
    let n_cal = calibration.n_time();
    let n_calc = calculation.n_time();
    let stacked = concatenate(Axis(0), &[calibration.data.view(), calculation.data.view()])?;
    let data = map_grid_points(&stacked, n_calc, |series| {
        let (cal, calc) = series.split_at(n_cal);
        if calc.iter().all(|v| !v.is_finite()) {
            return Ok(vec![f64::NAN; n_calc]);
        }
        spi(cal, calc, scale, distribution, SPI_UPPER_LIMIT, SPI_LOWER_LIMIT)
    })?;
    let mut out = calculation.with_data(data)?;
    out.name = format!("SPI{scale}");
    out.units = "1".into();
    Ok(out)
}

/// Settings of an SPI run, read from a JSON parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    pub prd_path: PathBuf,
    pub var: String,
    pub scales: Vec<usize>,
    pub distribution: Distribution,
    pub calib_start_year: Option<i32>,
    pub calib_end_year: Option<i32>,
    pub results_dir: PathBuf,
    pub model: String,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            prd_path: PathBuf::new(),
            var: "pr".into(),
            scales: vec![3, 6],
            distribution: Distribution::Gamma,
            calib_start_year: None,
            calib_end_year: None,
            results_dir: PathBuf::from("."),
            model: "model".into(),
        }
    }
}

impl SpiConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Compute every configured SPI scale and write one NetCDF file per scale.
pub fn run(config: &SpiConfig) -> Result<Vec<PathBuf>> {
    let field = read_field(&config.prd_path, &config.var)?;
    let calibration = field.select_years(config.calib_start_year, config.calib_end_year)?;
    if calibration.dates()?.first().map(|d| d.month) != Some(1) {
        return Err(PmpError::Calendar("SPI calibration period must start in January".into()));
    }
    let mut written = Vec::new();
    for &scale in &config.scales {
        info!(model = %config.model, scale, "computing SPI");
        let index = spi_field(&calibration, &field, scale, config.distribution)?;
        let path = config
            .results_dir
            .join(format!("SPI{scale}_{}.nc", config.model));
        NetCDFWriter::new(&path).write_field(&index, &index.name)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn accumulation_pads_incomplete_year() {
        let data: Vec<f64> = (1..=14).map(f64::from).collect();
        let acc = accumulation(&data, 3).unwrap();
        assert_eq!(acc.dim(), (2, 12));
        assert!(acc[[0, 0]].is_nan() && acc[[0, 1]].is_nan());
        assert_relative_eq!(acc[[0, 2]], 6.0);
        assert_relative_eq!(acc[[1, 1]], 12.0 + 13.0 + 14.0);
        assert!(acc[[1, 2]].is_nan());
    }

    #[test]
    fn zero_scale_rejected() {
        assert!(accumulation(&[1.0], 0).is_err());
    }

    #[test]
    fn spi_is_standardized_and_clipped() {
        // 30 years with a reproducible spread of monthly totals
        let data: Vec<f64> = (0..360)
            .map(|i| 50.0 + 40.0 * ((i as f64 * 0.37).sin() + 0.5 * (i as f64 * 1.3).cos()).abs())
            .collect();
        let index = spi(&data, &data, 1, Distribution::Gamma, 3.09, -3.09).unwrap();
        assert_eq!(index.len(), 360);
        let mean = index.iter().sum::<f64>() / index.len() as f64;
        assert!(mean.abs() < 0.2, "mean {mean}");
        assert!(index.iter().all(|v| (-3.09..=3.09).contains(v)));
    }

    #[test]
    fn larger_totals_give_larger_index() {
        let mut data: Vec<f64> = (0..240).map(|i| 20.0 + (i % 7) as f64 * 5.0).collect();
        data[230] = 500.0;
        let index = spi(&data, &data, 1, Distribution::Gamma, 3.09, -3.09).unwrap();
        let march_max = (0..20)
            .map(|y| y * 12 + 2)
            .filter(|&i| i != 230)
            .map(|i| index[i])
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(index[230] > march_max);
    }

    /// Monthly totals that vary from year to year in every calendar month.
    fn wavy(n: usize, phase: f64) -> Vec<f64> {
        (0..n)
            .map(|i| 30.0 + 25.0 * ((i as f64 * 0.73 + phase).sin() + 0.4 * (i as f64 * 2.1).cos()).abs())
            .collect()
    }

    fn same_or_both_nan(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-12)
    }

    #[test]
    fn leading_months_are_missing() {
        let data = wavy(120, 0.0);
        let index = spi(&data, &data, 6, Distribution::Gamma, 3.09, -3.09).unwrap();
        assert!(index[..5].iter().all(|v| v.is_nan()));
        assert!(index[5].is_finite());
        assert!(index[5..].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn dry_years_shift_the_probability() {
        // January is dry in 5 of 20 calibration years
        let mut data = wavy(240, 0.3);
        for year in [1, 4, 9, 13, 17] {
            data[year * 12] = 0.0;
        }
        let index = spi(&data, &data, 1, Distribution::Gamma, 3.09, -3.09).unwrap();
        let normal = Normal::new(0.0, 1.0).unwrap();
        assert_relative_eq!(index[12], normal.inverse_cdf(0.25), epsilon = 1e-12);
        assert_relative_eq!(index[48], index[12]);
        let mut wet_januaries = (0..20).filter(|y| ![1, 4, 9, 13, 17].contains(y)).map(|y| index[y * 12]);
        assert!(wet_januaries.all(|v| v > index[12]));

        // a month that never rains in the calibration has no distribution
        let mut never = wavy(240, 0.3);
        for year in 0..20 {
            never[year * 12 + 6] = 0.0;
        }
        let index = spi(&never, &data, 1, Distribution::Gamma, 3.09, -3.09).unwrap();
        assert!(index[6].is_nan() && index[18].is_nan());
        assert!(index[7].is_finite());
    }

    #[test]
    fn calibration_record_sets_the_distribution() {
        let calibration = wavy(240, 0.0);
        let subset = &calibration[..30];
        let full = spi(&calibration, &calibration, 3, Distribution::Gamma, 3.09, -3.09).unwrap();
        let part = spi(&calibration, subset, 3, Distribution::Gamma, 3.09, -3.09).unwrap();
        assert_eq!(part.len(), 30);
        assert!(same_or_both_nan(&part, &full[..30]));

        let wet = vec![900.0; 36];
        let dry = vec![0.5; 36];
        let wet_index = spi(&calibration, &wet, 3, Distribution::Gamma, 3.09, -3.09).unwrap();
        let dry_index = spi(&calibration, &dry, 3, Distribution::Gamma, 3.09, -3.09).unwrap();
        assert!(wet_index[2..].iter().all(|&v| v == SPI_UPPER_LIMIT));
        assert!(dry_index[2..].iter().all(|&v| v == SPI_LOWER_LIMIT));
    }

    #[test]
    fn field_with_shorter_calculation_record() {
        use crate::calendar::{monthly_range, Calendar};
        use crate::field::{Grid, TimeAxis};
        use ndarray::{Array1, Array3};

        let grid = Grid::new(Array1::from(vec![-5.0, 5.0]), Array1::from(vec![0.0, 10.0]));
        let field = |n: usize, phase: f64| {
            let columns: Vec<Vec<f64>> = (0..4).map(|p| wavy(n, phase + p as f64)).collect();
            let mut data = Array3::from_shape_fn((n, 2, 2), |(t, i, j)| columns[i * 2 + j][t]);
            if phase > 0.0 {
                data.slice_mut(ndarray::s![.., 1, 1]).fill(f64::NAN);
            }
            let time = TimeAxis::new(monthly_range(1980, n), Calendar::NoLeap);
            Field::new("pr", "mm", grid.clone(), Some(time), data).unwrap()
        };
        let calibration = field(240, 0.0);
        let calculation = field(60, 0.5);

        let index = spi_field(&calibration, &calculation, 3, Distribution::Gamma).unwrap();
        assert_eq!(index.n_time(), 60);
        assert_eq!(index.name, "SPI3");

        let cal: Vec<f64> = calibration.data.slice(ndarray::s![.., 0, 1]).to_vec();
        let calc: Vec<f64> = calculation.data.slice(ndarray::s![.., 0, 1]).to_vec();
        let expected = spi(&cal, &calc, 3, Distribution::Gamma, SPI_UPPER_LIMIT, SPI_LOWER_LIMIT).unwrap();
        let got: Vec<f64> = index.data.slice(ndarray::s![.., 0, 1]).to_vec();
        assert!(same_or_both_nan(&got, &expected));
        assert!(got[2..].iter().all(|v| v.is_finite()));
        assert!(index.data.slice(ndarray::s![.., 1, 1]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn unknown_distribution() {
        assert!("pearson3".parse::<Distribution>().is_err());
        assert_eq!("Gamma".parse::<Distribution>().unwrap(), Distribution::Gamma);
    }
}
