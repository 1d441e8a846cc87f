//! Preparing anomaly fields and extracting one variability mode.

use super::eof::{box_mean, EofSolver, PcScaling};
use crate::errors::{PmpError, Result};
use crate::field::Field;
use crate::regions::{region_subset, RegionSpec};
use crate::seasons::{custom_season_departure, departures, seasonal_series, AveragingMethod};
use crate::statistics::{map_grid_points, mean_xy, nan_std};
use ndarray::{Array2, Axis};
use tracing::debug;

/// Modes whose residual removes the near-global mean when the domain mean
/// is kept.
const GLOBAL_MEAN_MODES: [&str; 3] = ["PDO", "NPGO", "AMO"];

fn subtract_series_mean(field: &Field) -> Result<Field> {
    let mean = field
        .data
        .mean_axis(Axis(0))
        .ok_or_else(|| PmpError::Statistics(format!("'{}' has no time steps", field.name)))?;
    let mut data = field.data.clone();
    for mut map in data.axis_iter_mut(Axis(0)) {
        map -= &mean;
    }
    field.with_data(data)
}

/// Monthly anomalies with the annual cycle removed, reduced to the
/// requested season: `monthly`, `yearly`, one of DJF/MAM/JJA/SON (complete
/// seasons only) or a custom month string such as `"NDJFM"`.
///
/// For DJF the first January/February and the last December are dropped so
/// that every season is whole.
pub fn get_anomaly_timeseries(field: &Field, season: &str) -> Result<Field> {
    let mut field = field.clone();
    if season.eq_ignore_ascii_case("DJF") {
        let dates = field.dates()?;
        let start = if dates.first().map(|d| d.month) == Some(1) { 2 } else { 0 };
        let end = if dates.last().map(|d| d.month) == Some(12) {
            dates.len().saturating_sub(1)
        } else {
            dates.len()
        };
        if start >= end {
            return Err(PmpError::Calendar("series too short for DJF".into()));
        }
        field = field.select_time(&(start..end).collect::<Vec<_>>())?;
    }

    let anomaly = departures(&field)?;
    match season {
        "monthly" => Ok(anomaly),
        "yearly" => subtract_series_mean(&seasonal_series(&anomaly, "yearly")?),
        s if ["DJF", "MAM", "JJA", "SON"].contains(&s.to_ascii_uppercase().as_str()) => {
            subtract_series_mean(&seasonal_series(&anomaly, s)?)
        }
        custom => custom_season_departure(&anomaly, custom, AveragingMethod::Weighted),
    }
}

fn area_mean_series(field: &Field) -> Result<Vec<f64>> {
    let weights = field.grid.area_weights();
    (0..field.n_time())
        .map(|t| mean_xy(field.map(t), weights.view()))
        .collect()
}

fn subtract_per_step(field: &Field, means: &[f64]) -> Result<Field> {
    let mut data = field.data.clone();
    for (mut map, &m) in data.axis_iter_mut(Axis(0)).zip(means) {
        map.mapv_inplace(|v| v - m);
    }
    field.with_data(data)
}

/// Remove the domain mean of each time step, or, when the domain mean is
/// kept, the 60S-70N mean for PDO/NPGO/AMO.
pub fn get_residual_timeseries(
    anomaly: &Field,
    mode: &str,
    remove_domain_mean: bool,
    domain: &RegionSpec,
) -> Result<Field> {
    if remove_domain_mean {
        let regional = region_subset(anomaly, domain)?;
        let means = area_mean_series(&regional)?;
        debug!(mode, "removing domain mean");
        subtract_per_step(anomaly, &means)
    } else if GLOBAL_MEAN_MODES.contains(&mode) {
        let lat_idx = anomaly.grid.lat_indices(-60.0, 70.0);
        let lon_idx: Vec<usize> = (0..anomaly.grid.lon.len()).collect();
        let band = anomaly.subset(&lat_idx, &lon_idx)?;
        let means = area_mean_series(&band)?;
        debug!(mode, "removing 60S-70N mean");
        subtract_per_step(anomaly, &means)
    } else {
        Ok(anomaly.clone())
    }
}

/// Anomalies then residual, as applied to every input before EOF analysis.
pub fn adjust_timeseries(
    field: &Field,
    mode: &str,
    season: &str,
    domain: &RegionSpec,
    remove_domain_mean: bool,
) -> Result<Field> {
    let anomaly = get_anomaly_timeseries(field, season)?;
    get_residual_timeseries(&anomaly, mode, remove_domain_mean, domain)
}

/// Whether the EOF pattern should be multiplied by -1 so that each mode
/// has a conventional sign.
pub fn arbitrary_checking(mode: &str, eof: &Field) -> bool {
    let map = eof.map(0);
    let grid = &eof.grid;
    match mode {
        "PDO" => box_mean(grid, map, (30.0, 40.0), Some((150.0, 180.0))) >= 0.0,
        "PNA" => box_mean(grid, map, (80.0, 90.0), None) <= 0.0,
        "NAM" | "NAO" => box_mean(grid, map, (60.0, 80.0), None) >= 0.0,
        "SAM" => box_mean(grid, map, (-60.0, -90.0), None) >= 0.0,
        _ => {
            let (nlat, nlon) = grid.shape();
            let last = map[[nlat - 1, nlon - 1]];
            if last.is_finite() {
                last >= 0.0
            } else if nlat > 1 && nlon > 1 {
                let second = map[[nlat - 2, nlon - 2]];
                second.is_finite() && second >= 0.0
            } else {
                false
            }
        }
    }
}

/// One EOF mode of a field with its sign fixed.
#[derive(Debug, Clone)]
pub struct VarianceMode {
    /// Covariance EOF map, one time step
    pub eof: Field,
    pub pc: Vec<f64>,
    pub frac: f64,
    pub reverse_sign: bool,
}

/// Extract mode `eofn` (1-based) from an existing decomposition.
pub fn variance_mode_from_solver(
    mode: &str,
    field: &Field,
    solver: &EofSolver,
    eofn: usize,
    eof_scaling: bool,
) -> Result<VarianceMode> {
    let eofs = solver.eofs_as_covariance(eofn)?;
    let scaling = if eof_scaling {
        PcScaling::UnitVariance
    } else {
        PcScaling::Unscaled
    };
    let pcs = solver.pcs(eofn, scaling)?;
    let frac = solver.variance_fraction()[eofn - 1];

    let map = eofs
        .into_iter()
        .nth(eofn - 1)
        .ok_or_else(|| PmpError::Eof(format!("mode {eofn} unavailable")))?;
    let mut eof = Field::from_map(field.name.clone(), field.units.clone(), field.grid.clone(), map)?;
    let mut pc: Vec<f64> = pcs.column(eofn - 1).to_vec();

    let reverse_sign = arbitrary_checking(mode, &eof);
    if reverse_sign {
        eof.data.mapv_inplace(|v| -v);
        pc.iter_mut().for_each(|v| *v = -*v);
    }
    Ok(VarianceMode {
        eof,
        pc,
        frac,
        reverse_sign,
    })
}

/// EOF analysis of `field` returning mode `eofn` and the solver.
pub fn eof_analysis_get_variance_mode(
    mode: &str,
    field: &Field,
    eofn: usize,
    eof_scaling: bool,
) -> Result<(VarianceMode, EofSolver)> {
    let solver = EofSolver::new(field)?;
    let vm = variance_mode_from_solver(mode, field, &solver, eofn, eof_scaling)?;
    Ok((vm, solver))
}

/// Least-squares slope and intercept of `field` against `x` at every grid
/// point; NaN where the point has missing values.
pub fn linear_regression(x: &[f64], field: &Field) -> Result<(Array2<f64>, Array2<f64>)> {
    if x.len() != field.n_time() {
        return Err(PmpError::ShapeMismatch {
            context: "regression predictor vs field time".into(),
            left: vec![x.len()],
            right: vec![field.n_time()],
        });
    }
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    if sxx == 0.0 {
        return Err(PmpError::Statistics("regression predictor is constant".into()));
    }
    let fit = map_grid_points(&field.data, 2, |y| {
        if y.iter().any(|v| !v.is_finite()) {
            return Ok(vec![f64::NAN, f64::NAN]);
        }
        let my = y.iter().sum::<f64>() / n;
        let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let slope = sxy / sxx;
        Ok(vec![slope, my - slope * mx])
    })?;
    let mut parts = fit.outer_iter();
    match (parts.next(), parts.next()) {
        (Some(slope), Some(intercept)) => Ok((slope.to_owned(), intercept.to_owned())),
        _ => Err(PmpError::Statistics("regression produced no output".into())),
    }
}

/// Regress the (standardized unless already unit variance) PC onto the
/// global field, giving the teleconnection pattern `slope + intercept` and
/// its parts.
pub fn linear_regression_on_globe(
    pc: &[f64],
    field: &Field,
    stdv_pc: f64,
    eof_scaling: bool,
) -> Result<(Field, Array2<f64>, Array2<f64>)> {
    let predictor: Vec<f64> = if eof_scaling {
        pc.to_vec()
    } else {
        pc.iter().map(|v| v / stdv_pc).collect()
    };
    let (slope, intercept) = linear_regression(&predictor, field)?;
    let eof_lr = Field::from_map(
        field.name.clone(),
        field.units.clone(),
        field.grid.clone(),
        &slope + &intercept,
    )?;
    Ok((eof_lr, slope, intercept))
}

/// Pseudo-PCs of `field` projected onto mode `eofn` of another solver.
pub fn gain_pseudo_pcs(
    solver: &EofSolver,
    field: &Field,
    eofn: usize,
    reverse_sign: bool,
    eof_scaling: bool,
) -> Result<Vec<f64>> {
    let scaling = if eof_scaling {
        PcScaling::UnitVariance
    } else {
        PcScaling::Unscaled
    };
    let projected = solver.project_field(field, eofn, scaling)?;
    let sign = if reverse_sign { -1.0 } else { 1.0 };
    Ok(projected.column(eofn - 1).iter().map(|v| v * sign).collect())
}

/// Fraction of the area-mean temporal variance of `full_field` carried by
/// `eof_pattern * pcs`.
pub fn gain_pcs_fraction(full_field: &Field, eof_pattern: &Array2<f64>, pcs: &[f64]) -> Result<f64> {
    if full_field.data.shape()[1..] != *eof_pattern.shape() {
        return Err(PmpError::ShapeMismatch {
            context: "pcs fraction pattern".into(),
            left: eof_pattern.shape().to_vec(),
            right: full_field.data.shape()[1..].to_vec(),
        });
    }
    let weights = full_field.grid.area_weights();
    let variance_total = full_field.data.map_axis(Axis(0), |s| nan_std(&s.to_vec(), 0).powi(2));
    let pc_variance = nan_std(pcs, 0).powi(2);
    let variance_partial = eof_pattern.mapv(|e| e * e * pc_variance);
    let partial = mean_xy(variance_partial.view(), weights.view())?;
    let total = mean_xy(variance_total.view(), weights.view())?;
    Ok(partial / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{monthly_range, Calendar};
    use crate::field::{Grid, TimeAxis};
    use crate::regions::Domain;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array3};

    fn grid() -> Grid {
        Grid::new(
            Array1::from(vec![20.0, 40.0, 60.0, 70.0, 85.0]),
            Array1::from(vec![150.0, 160.0, 170.0, 180.0]),
        )
    }

    #[test]
    fn nao_sign_convention() {
        let map = Array2::from_shape_fn((5, 4), |(i, _)| if i >= 2 { 1.0 } else { -1.0 });
        let eof = Field::from_map("psl", "Pa", grid(), map).unwrap();
        assert!(arbitrary_checking("NAO", &eof));
        assert!(!arbitrary_checking("PNA", &eof));
    }

    #[test]
    fn fallback_uses_corner_point() {
        let mut map = Array2::from_elem((5, 4), -1.0);
        map[[4, 3]] = f64::NAN;
        map[[3, 2]] = 2.0;
        let eof = Field::from_map("x", "", grid(), map).unwrap();
        assert!(arbitrary_checking("OTHER", &eof));
    }

    #[test]
    fn regression_recovers_linear_dependence() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let data = Array3::from_shape_fn((10, 5, 4), |(t, i, _)| 2.0 * t as f64 + i as f64);
        let field = Field::new("psl", "Pa", grid(), None, data).unwrap();
        let (slope, intercept) = linear_regression(&x, &field).unwrap();
        assert_relative_eq!(slope[[3, 1]], 2.0, epsilon = 1e-12);
        assert_relative_eq!(intercept[[3, 1]], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn residual_removes_domain_mean() {
        let n = 24;
        let data = Array3::from_shape_fn((n, 5, 4), |(t, _, _)| t as f64);
        let field = Field::new(
            "psl",
            "Pa",
            grid(),
            Some(TimeAxis::new(monthly_range(2000, n), Calendar::NoLeap)),
            data,
        )
        .unwrap();
        let spec = RegionSpec {
            value: None,
            domain: Some(Domain {
                latitude: Some((20.0, 85.0)),
                longitude: None,
            }),
        };
        let residual = get_residual_timeseries(&field, "NAO", true, &spec).unwrap();
        assert!(residual.data.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn full_pattern_explains_all_variance() {
        let pcs: Vec<f64> = (0..12).map(|t| (t as f64).sin()).collect();
        let pattern = Array2::from_shape_fn((5, 4), |(i, j)| (i + j) as f64 + 1.0);
        let data = Array3::from_shape_fn((12, 5, 4), |(t, i, j)| pattern[[i, j]] * pcs[t]);
        let field = Field::new("x", "", grid(), None, data).unwrap();
        assert_relative_eq!(gain_pcs_fraction(&field, &pattern, &pcs).unwrap(), 1.0, epsilon = 1e-9);
    }
}
