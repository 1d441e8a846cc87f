//! Annual and seasonal extremes of daily data (Rx1day, Rx5day, TXx, TNn...).

use crate::calendar::ModelDate;
use crate::errors::{PmpError, Result};
use crate::field::{Field, TimeAxis};
use crate::regions::LAND_THRESHOLD;
use crate::statistics::{mean_xy, reduce_steps, StatOperation};
use ndarray::{Array2, Array3, Axis};
use crate::netcdf_io::{read_field, read_map};
use crate::output::MetricsOutput;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// How December enters the DJF season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecMode {
    /// December of the previous year with January/February
    #[default]
    Djf,
    /// January, February and December of the same year
    Jfd,
}

impl FromStr for DecMode {
    type Err = PmpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DJF" => Ok(Self::Djf),
            "JFD" => Ok(Self::Jfd),
            other => Err(PmpError::Generic(format!("dec_mode must be DJF or JFD, got '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Season {
    Ann,
    Djf,
    Mam,
    Jja,
    Son,
}

impl Season {
    pub const ALL: [Season; 5] = [Self::Ann, Self::Djf, Self::Mam, Self::Jja, Self::Son];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ann => "ANN",
            Self::Djf => "DJF",
            Self::Mam => "MAM",
            Self::Jja => "JJA",
            Self::Son => "SON",
        }
    }
}

impl FromStr for Season {
    type Err = PmpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ANN" => Ok(Self::Ann),
            "DJF" => Ok(Self::Djf),
            "MAM" => Ok(Self::Mam),
            "JJA" => Ok(Self::Jja),
            "SON" => Ok(Self::Son),
            other => Err(PmpError::InvalidSeason(other.to_string())),
        }
    }
}

/// Yearly statistics of a daily field.
#[derive(Debug, Clone)]
pub struct SeasonalAverager {
    field: Field,
    dec_mode: DecMode,
    drop_incomplete_djf: bool,
    annual_strict: bool,
    year_beg: i32,
    year_end: i32,
    pentad: Option<Field>,
}

impl SeasonalAverager {
    /// # Errors
    ///
    /// Fails without a time axis or when the series does not span at least
    /// two calendar years.
    pub fn new(
        field: Field,
        dec_mode: DecMode,
        drop_incomplete_djf: bool,
        annual_strict: bool,
    ) -> Result<Self> {
        let dates = field.dates()?;
        let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
            return Err(PmpError::Calendar("empty time axis".into()));
        };
        let (year_beg, year_end) = (first.year, last.year);
        if year_end < year_beg + 1 {
            return Err(PmpError::Calendar(
                "Final year must be greater than beginning year.".into(),
            ));
        }
        Ok(Self {
            field,
            dec_mode,
            drop_incomplete_djf,
            annual_strict,
            year_beg,
            year_end,
            pentad: None,
        })
    }

    pub fn year_range(&self) -> std::ops::RangeInclusive<i32> {
        self.year_beg..=self.year_end
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Trailing `window`-step mean; the first `window - 1` steps, and any
    /// window containing NaN, are NaN.
    pub fn rolling(&self, window: usize) -> Result<Field> {
        rolling_mean(&self.field, window)
    }

    /// Cached 5-day rolling mean
    pub fn pentad(&mut self) -> Result<&Field> {
        if self.pentad.is_none() {
            self.pentad = Some(self.rolling(5)?);
        }
        self.pentad
            .as_ref()
            .ok_or_else(|| PmpError::Statistics("pentad mean unavailable".into()))
    }

    pub fn daily_total(&self) -> Result<Field> {
        daily_reduce(&self.field, StatOperation::Sum)
    }

    pub fn daily_min(&self) -> Result<Field> {
        daily_reduce(&self.field, StatOperation::Min)
    }

    pub fn daily_max(&self) -> Result<Field> {
        daily_reduce(&self.field, StatOperation::Max)
    }

    /// Per-year statistic. In strict mode only Jan 5 to Dec 31 of each year
    /// is used, so 5-day means never reach into the previous year.
    pub fn annual_stats(&self, data: &Field, stat: StatOperation) -> Result<Field> {
        let dates = data.dates()?;
        let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (i, d) in dates.iter().enumerate() {
            if self.annual_strict {
                if !self.year_range().contains(&d.year) || (d.month == 1 && d.day < 5) {
                    continue;
                }
            }
            groups.entry(d.year).or_default().push(i);
        }
        let labels: Vec<i32> = groups.keys().copied().collect();
        grouped_stat(data, &labels, &groups, stat)
    }

    pub fn seasonal_stats(&self, data: &Field, season: Season, stat: StatOperation) -> Result<Field> {
        let dates = data.dates()?;
        let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();

        let labels: Vec<i32> = match (season, self.dec_mode) {
            (Season::Ann, _) => return self.annual_stats(data, stat),
            (Season::Djf, DecMode::Djf) => {
                for (i, d) in dates.iter().enumerate() {
                    let label = match d.month {
                        12 => d.year + 1,
                        1 | 2 => d.year,
                        _ => continue,
                    };
                    groups.entry(label).or_default().push(i);
                }
                if self.drop_incomplete_djf {
                    (self.year_beg + 1..=self.year_end).collect()
                } else {
                    (self.year_beg..=self.year_end + 1).collect()
                }
            }
            (Season::Djf, DecMode::Jfd) => {
                for (i, d) in dates.iter().enumerate() {
                    if matches!(d.month, 1 | 2 | 12) && self.year_range().contains(&d.year) {
                        groups.entry(d.year).or_default().push(i);
                    }
                }
                self.year_range().collect()
            }
            (Season::Mam | Season::Jja | Season::Son, _) => {
                let months = match season {
                    Season::Mam => 3..=5,
                    Season::Jja => 6..=8,
                    _ => 9..=11,
                };
                for (i, d) in dates.iter().enumerate() {
                    if months.contains(&d.month) && self.year_range().contains(&d.year) {
                        groups.entry(d.year).or_default().push(i);
                    }
                }
                self.year_range().collect()
            }
        };
        debug!(season = season.as_str(), years = labels.len(), "seasonal extremes");
        grouped_stat(data, &labels, &groups, stat)
    }
}

/// Reduce each labelled group to one map; labels without data give NaN.
fn grouped_stat(
    data: &Field,
    labels: &[i32],
    groups: &BTreeMap<i32, Vec<usize>>,
    stat: StatOperation,
) -> Result<Field> {
    let (nlat, nlon) = data.grid.shape();
    let mut out = Array3::from_elem((labels.len(), nlat, nlon), f64::NAN);
    for (k, label) in labels.iter().enumerate() {
        if let Some(steps) = groups.get(label) {
            out.index_axis_mut(Axis(0), k)
                .assign(&reduce_steps(&data.data, steps, stat)?);
        }
    }
    let dates = labels.iter().map(|&y| ModelDate::new(y, 1, 1)).collect();
    Field::new(
        data.name.clone(),
        data.units.clone(),
        data.grid.clone(),
        Some(TimeAxis::new(dates, data.calendar())),
        out,
    )
}

pub fn rolling_mean(field: &Field, window: usize) -> Result<Field> {
    if window == 0 {
        return Err(PmpError::Statistics("rolling window must be positive".into()));
    }
    let n = field.n_time();
    let mut out = Array3::from_elem(field.data.raw_dim(), f64::NAN);
    for t in window.saturating_sub(1)..n {
        let slab = field.data.slice(ndarray::s![t + 1 - window..=t, .., ..]);
        let mean = slab.mean_axis(Axis(0)).ok_or_else(|| {
            PmpError::Statistics("empty rolling window".into())
        })?;
        out.index_axis_mut(Axis(0), t).assign(&mean);
    }
    field.with_data(out)
}

/// Collapse sub-daily steps sharing a calendar date.
pub fn daily_reduce(field: &Field, stat: StatOperation) -> Result<Field> {
    let dates = field.dates()?;
    let mut days: Vec<ModelDate> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, d) in dates.iter().enumerate() {
        if days.last() == Some(d) {
            if let Some(group) = groups.last_mut() {
                group.push(i);
            }
        } else {
            days.push(*d);
            groups.push(vec![i]);
        }
    }
    let (nlat, nlon) = field.grid.shape();
    let mut out = Array3::zeros((days.len(), nlat, nlon));
    for (k, steps) in groups.iter().enumerate() {
        out.index_axis_mut(Axis(0), k)
            .assign(&reduce_steps(&field.data, steps, stat)?);
    }
    Field::new(
        field.name.clone(),
        field.units.clone(),
        field.grid.clone(),
        Some(TimeAxis::new(days, field.calendar())),
        out,
    )
}

/// Seasonal extremes for every season, keyed `ANN`, `DJF`, ...
pub type SeasonalFields = BTreeMap<Season, Field>;

fn all_seasons(averager: &SeasonalAverager, data: &Field, stat: StatOperation) -> Result<SeasonalFields> {
    Season::ALL
        .iter()
        .map(|&s| Ok((s, averager.seasonal_stats(data, s, stat)?)))
        .collect()
}

/// Yearly maximum and minimum of a daily temperature field
pub fn temperature_metrics(averager: &SeasonalAverager) -> Result<(SeasonalFields, SeasonalFields)> {
    let data = averager.field().clone();
    let tmax = all_seasons(averager, &data, StatOperation::Max)?;
    let tmin = all_seasons(averager, &data, StatOperation::Min)?;
    Ok((tmax, tmin))
}

/// Rx1day and Rx5day of a daily precipitation field
pub fn precipitation_metrics(averager: &mut SeasonalAverager) -> Result<(SeasonalFields, SeasonalFields)> {
    let daily = averager.field().clone();
    let rx1 = all_seasons(averager, &daily, StatOperation::Max)?;
    let pentad = averager.pentad()?.clone();
    let rx5 = all_seasons(averager, &pentad, StatOperation::Max)?;
    info!("computed Rx1day and Rx5day");
    Ok((rx1, rx5))
}

/// Land-area means per season and year, rounded to two decimals:
/// `{metric: {"land": {season: {year: value}}}}`.
pub fn metrics_json(data: &BTreeMap<String, SeasonalFields>, sftlf: &Array2<f64>) -> Result<Value> {
    let mut out = Map::new();
    for (metric, seasons) in data {
        let mut land = Map::new();
        for (season, field) in seasons {
            let weights = field.grid.area_weights();
            if sftlf.shape() != weights.shape() {
                return Err(PmpError::ShapeMismatch {
                    context: "sftlf vs extremes grid".into(),
                    left: sftlf.shape().to_vec(),
                    right: weights.shape().to_vec(),
                });
            }
            let masked_weights = ndarray::Zip::from(&weights)
                .and(sftlf)
                .map_collect(|&w, &f| if f >= LAND_THRESHOLD && f <= 100.0 { w } else { 0.0 });
            let mut years = Map::new();
            for (t, date) in field.dates()?.iter().enumerate() {
                let value = mean_xy(field.map(t), masked_weights.view())?;
                let rounded = (value * 100.0).round() / 100.0;
                years.insert(date.year.to_string(), json!(rounded));
            }
            land.insert(season.as_str().to_string(), Value::Object(years));
        }
        out.insert(metric.clone(), json!({ "land": land }));
    }
    Ok(Value::Object(out))
}

/// Settings of an extremes run, read from a JSON parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtremesConfig {
    /// Daily (or sub-daily) model file per variable, keyed by variable name
    pub test_data: BTreeMap<String, PathBuf>,
    pub sftlf_path: PathBuf,
    pub model: String,
    pub realization: String,
    pub dec_mode: DecMode,
    pub drop_incomplete_djf: bool,
    pub annual_strict: bool,
    /// Reduce sub-daily input to daily values first
    pub sub_daily: bool,
    pub results_dir: PathBuf,
}

impl Default for ExtremesConfig {
    fn default() -> Self {
        Self {
            test_data: BTreeMap::new(),
            sftlf_path: PathBuf::new(),
            model: "model".into(),
            realization: "r1i1p1f1".into(),
            dec_mode: DecMode::Djf,
            drop_incomplete_djf: true,
            annual_strict: true,
            sub_daily: false,
            results_dir: PathBuf::from("."),
        }
    }
}

impl ExtremesConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

fn prepared(config: &ExtremesConfig, var: &str, path: &Path) -> Result<Field> {
    let mut field = read_field(path, var)?;
    if var == "pr" && field.units.replace('.', " ").trim() == "kg m-2 s-1" {
        field.data.mapv_inplace(|v| v * 86400.0);
        field.units = "mm/day".into();
    }
    if !config.sub_daily {
        return Ok(field);
    }
    let stat = match var {
        "tasmax" => StatOperation::Max,
        "tasmin" => StatOperation::Min,
        _ => StatOperation::Mean,
    };
    daily_reduce(&field, stat)
}

/// Compute the extremes indices of every configured variable and write
/// their land means to one JSON file.
pub fn run(config: &ExtremesConfig) -> Result<PathBuf> {
    let (_, sftlf) = read_map(&config.sftlf_path, "sftlf")?;
    let mut indices: BTreeMap<String, SeasonalFields> = BTreeMap::new();

    for (var, path) in &config.test_data {
        info!(model = %config.model, variable = %var, "computing extremes");
        let field = prepared(config, var, path)?;
        let mut averager = SeasonalAverager::new(
            field,
            config.dec_mode,
            config.drop_incomplete_djf,
            config.annual_strict,
        )?;
        let (high, low, names) = match var.as_str() {
            "pr" => {
                let (rx1, rx5) = precipitation_metrics(&mut averager)?;
                (rx1, rx5, ["Rx1day", "Rx5day"])
            }
            "tasmax" => {
                let (x, n) = temperature_metrics(&averager)?;
                (x, n, ["TXx", "TXn"])
            }
            "tasmin" => {
                let (x, n) = temperature_metrics(&averager)?;
                (x, n, ["TNx", "TNn"])
            }
            other => {
                return Err(PmpError::Generic(format!(
                    "no extremes indices defined for '{other}'"
                )))
            }
        };
        indices.insert(names[0].to_string(), high);
        indices.insert(names[1].to_string(), low);
    }

    let metrics = metrics_json(&indices, &sftlf)?;
    let payload = json!({
        "DIMENSIONS": {
            "model": [config.model],
            "realization": [config.realization],
            "index": indices.keys().collect::<Vec<_>>(),
            "region": ["land"],
            "season": Season::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        },
        "RESULTS": { config.model.as_str(): { config.realization.as_str(): metrics } },
    });
    let name = format!("{}_{}_extremes_metrics", config.model, config.realization);
    MetricsOutput::new(&config.results_dir, &name)
        .with_structure(&["model", "realization", "index", "region", "season", "time"])
        .write(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{daily_range, Calendar};
    use crate::field::Grid;
    use approx::assert_relative_eq;

    /// Two noleap years of daily data whose value is the day index.
    fn daily_field(years: usize) -> Field {
        let n = 365 * years;
        let dates = daily_range(Calendar::NoLeap, ModelDate::new(2000, 1, 1), n).unwrap();
        let data = Array3::from_shape_fn((n, 1, 1), |(t, _, _)| t as f64);
        Field::new(
            "pr",
            "mm/day",
            Grid::uniform(180.0, 360.0),
            Some(TimeAxis::new(dates, Calendar::NoLeap)),
            data,
        )
        .unwrap()
    }

    #[test]
    fn needs_two_years() {
        let one_year = daily_field(1);
        assert!(SeasonalAverager::new(one_year, DecMode::Djf, true, true).is_err());
    }

    #[test]
    fn rolling_mean_leading_nan() {
        let avg = SeasonalAverager::new(daily_field(2), DecMode::Djf, true, true).unwrap();
        let r = avg.rolling(5).unwrap();
        assert!(r.data[[3, 0, 0]].is_nan());
        assert_relative_eq!(r.data[[4, 0, 0]], 2.0);
    }

    #[test]
    fn strict_annual_skips_first_days() {
        let avg = SeasonalAverager::new(daily_field(2), DecMode::Djf, true, true).unwrap();
        let min = avg.annual_stats(avg.field(), StatOperation::Min).unwrap();
        assert_relative_eq!(min.data[[0, 0, 0]], 4.0);
        assert_relative_eq!(min.data[[1, 0, 0]], 369.0);

        let loose = SeasonalAverager::new(daily_field(2), DecMode::Djf, true, false).unwrap();
        let min = loose.annual_stats(loose.field(), StatOperation::Min).unwrap();
        assert_relative_eq!(min.data[[0, 0, 0]], 0.0);
    }

    #[test]
    fn djf_labels_follow_drop_setting() {
        let field = daily_field(3);
        let dropped = SeasonalAverager::new(field.clone(), DecMode::Djf, true, true).unwrap();
        let djf = dropped.seasonal_stats(&field, Season::Djf, StatOperation::Max).unwrap();
        let years: Vec<i32> = djf.dates().unwrap().iter().map(|d| d.year).collect();
        assert_eq!(years, vec![2001, 2002]);
        // DJF 2001 ends on the last day of February 2001
        assert_relative_eq!(djf.data[[0, 0, 0]], 365.0 + 58.0);

        let kept = SeasonalAverager::new(field.clone(), DecMode::Djf, false, true).unwrap();
        let djf = kept.seasonal_stats(&field, Season::Djf, StatOperation::Max).unwrap();
        assert_eq!(djf.n_time(), 4);
        assert_relative_eq!(djf.data[[3, 0, 0]], 3.0 * 365.0 - 1.0);

        let jfd = SeasonalAverager::new(field.clone(), DecMode::Jfd, true, true).unwrap();
        let djf = jfd.seasonal_stats(&field, Season::Djf, StatOperation::Min).unwrap();
        assert_eq!(djf.n_time(), 3);
        assert_relative_eq!(djf.data[[1, 0, 0]], 365.0);
    }

    #[test]
    fn jja_uses_june_to_august() {
        let field = daily_field(2);
        let avg = SeasonalAverager::new(field.clone(), DecMode::Djf, true, true).unwrap();
        let jja = avg.seasonal_stats(&field, Season::Jja, StatOperation::Min).unwrap();
        assert_relative_eq!(jja.data[[0, 0, 0]], 151.0);
    }

    #[test]
    fn daily_reduce_groups_sub_daily_steps() {
        let dates = vec![
            ModelDate::new(2000, 1, 1),
            ModelDate::new(2000, 1, 1),
            ModelDate::new(2000, 1, 2),
        ];
        let field = Field::new(
            "pr",
            "mm",
            Grid::uniform(180.0, 360.0),
            Some(TimeAxis::new(dates, Calendar::NoLeap)),
            Array3::from_shape_vec((3, 1, 1), vec![1.0, 2.0, 5.0]).unwrap(),
        )
        .unwrap();
        let total = daily_reduce(&field, StatOperation::Sum).unwrap();
        assert_eq!(total.n_time(), 2);
        assert_relative_eq!(total.data[[0, 0, 0]], 3.0);
    }
}
