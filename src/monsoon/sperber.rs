//! Fractional accumulated precipitation of monsoon domains
//! (Sperber and Annamalai 2014, Clim Dyn 43:3219-3244).
//!
//! Daily precipitation is averaged over each monsoon domain, cut into
//! pentads year by year and composited. The normalized cumulative composite
//! gives the onset (first pentad reaching 20%) and decay (80%) of the
//! rainy season. Southern Hemisphere domains use July-June years.

use crate::calendar::{Calendar, ModelDate};
use crate::errors::{PmpError, Result};
use crate::field::Field;
use crate::netcdf_io::{read_field, read_map, NetCDFWriter};
use crate::output::{MetricsOutput, WriteMode};
use crate::regions::{load_regions_specs, region_subset, RegionSpec};
use crate::statistics::{correlation, nan_std};
use crate::template::StringConstructor;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Days per pentad
pub const PENTAD: usize = 5;

/// Pentads in a 365 day year; shorter records are interpolated to this.
pub const PENTADS_PER_YEAR: usize = 365 / PENTAD;

pub const MONSOON_REGIONS: [&str; 6] = ["AIR", "AUS", "Sahel", "GoG", "NAmo", "SAmo"];

const SOUTHERN_REGIONS: [&str; 2] = ["AUS", "SAmo"];

/// Domains averaged over land and ocean alike
const ALL_SURFACE_REGIONS: [&str; 2] = ["GoG", "NAmo"];

pub const JSON_STRUCTURE: [&str; 4] = ["model", "realization", "monsoon_region", "metric"];

/// Successive `n`-sized index ranges covering `0..len`; the last may be short.
pub fn divide_chunks(len: usize, n: usize) -> Vec<Range<usize>> {
    if n == 0 {
        return Vec::new();
    }
    (0..len).step_by(n).map(|i| i..(i + n).min(len)).collect()
}

/// Leap-day aware chunking of a single year of daily dates.
///
/// The year must start on Jan 1 or Jul 1. 365 and 360 day years are cut
/// into plain chunks; in a 366 day year the chunk holding Feb 29 absorbs
/// one extra day. A 361 day year in a `360_day` calendar (next year's first
/// day included) is truncated to 360.
///
/// # Errors
///
/// Any other start date or year length.
pub fn divide_chunks_advanced(
    dates: &[ModelDate],
    n: usize,
    calendar: Calendar,
) -> Result<Vec<Range<usize>>> {
    let first = dates
        .first()
        .ok_or_else(|| PmpError::Calendar("empty daily series".into()))?;
    debug!(month = first.month, day = first.day, "first day of year");
    if !matches!(first.month, 1 | 7) || first.day != 1 {
        return Err(PmpError::Calendar(format!(
            "first day of year time series is {}/{}",
            first.month, first.day
        )));
    }
    if n == 0 {
        return Err(PmpError::Generic("chunk size must be positive".into()));
    }

    let nday = dates.len();
    match nday {
        365 | 360 => Ok(divide_chunks(nday, n)),
        366 => {
            let mut chunks = Vec::new();
            let mut start = 0;
            while start < nday {
                let end = (start + n).min(nday);
                let leap = dates[start..end].iter().any(|d| d.month == 2 && d.day > 28);
                if leap {
                    debug!(chunk = chunks.len(), "leap day detected");
                    let stop = (end + 1).min(nday);
                    chunks.push(start..stop);
                    chunks.extend(divide_chunks(nday - stop, n).into_iter().map(|r| r.start + stop..r.end + stop));
                    return Ok(chunks);
                }
                chunks.push(start..end);
                start = end;
            }
            Ok(chunks)
        }
        361 if calendar == Calendar::Day360 => {
            debug!("361 days in a 360_day calendar, truncating to 360");
            Ok(divide_chunks(360, n))
        }
        _ => Err(PmpError::Calendar(format!("number of days in year is {nday}"))),
    }
}

/// Mean of each chunk, skipping NaN.
pub fn chunk_means(series: &[f64], chunks: &[Range<usize>]) -> Vec<f64> {
    chunks
        .iter()
        .map(|r| {
            let (s, c) = series[r.clone()]
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if c == 0 {
                f64::NAN
            } else {
                s / c as f64
            }
        })
        .collect()
}

/// Linearly resample `data` onto `ref_length` evenly spaced points spanning
/// the same index range.
pub fn interp1d(data: &[f64], ref_length: usize) -> Result<Vec<f64>> {
    match (data.len(), ref_length) {
        (0, _) => Err(PmpError::Generic("cannot interpolate an empty series".into())),
        (_, 0) => Ok(Vec::new()),
        (1, _) => Ok(vec![data[0]; ref_length]),
        (len, 1) => {
            debug!(before = len, after = 1, "1d interpolation");
            Ok(vec![data[0]])
        }
        (len, _) => {
            debug!(before = len, after = ref_length, "1d interpolation");
            let last = (len - 1) as f64;
            Ok((0..ref_length)
                .map(|k| {
                    let x = last * k as f64 / (ref_length - 1) as f64;
                    let i = (x.floor() as usize).min(len - 2);
                    let frac = x - i as f64;
                    data[i] + (data[i + 1] - data[i]) * frac
                })
                .collect())
        }
    }
}

/// Onset and decay of one composite annual cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OnsetDecay {
    /// Cumulative composite scaled to run from 0 to 1
    pub frac_accum: Vec<f64>,
    pub onset_index: usize,
    pub decay_index: usize,
    /// Mean fractional accumulation per pentad between onset and decay
    pub slope: f64,
    /// Pentads from onset to decay, both included
    pub duration: usize,
}

/// Onset/decay metrics of a cumulative pentad series.
///
/// # Errors
///
/// The series is empty, holds missing values or does not increase.
pub fn sperber_metrics(cumsum: &[f64]) -> Result<OnsetDecay> {
    let (Some(&first), Some(&last)) = (cumsum.first(), cumsum.last()) else {
        return Err(PmpError::Statistics("empty accumulation".into()));
    };
    if cumsum.iter().any(|v| !v.is_finite()) {
        return Err(PmpError::Statistics("accumulation has missing pentads".into()));
    }
    let range = last - first;
    if range <= 0.0 {
        return Err(PmpError::Statistics("accumulation does not increase".into()));
    }
    let frac_accum: Vec<f64> = cumsum.iter().map(|v| (v - first) / range).collect();
    let reaching = |level: f64, from: usize| {
        frac_accum[from..]
            .iter()
            .position(|&f| f >= level)
            .map_or(frac_accum.len() - 1, |i| i + from)
    };
    let onset_index = reaching(0.2, 0);
    let decay_index = reaching(0.8, onset_index);
    let slope = (frac_accum[decay_index] - frac_accum[onset_index]) / (decay_index - onset_index) as f64;
    Ok(OnsetDecay {
        frac_accum,
        onset_index,
        decay_index,
        slope,
        duration: decay_index - onset_index + 1,
    })
}

/// Running sum
pub fn cumsum(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Area-weighted domain mean of every time step.
///
/// With a land fraction (percent, or 0-1 which is rescaled) pure ocean
/// cells are dropped and the rest are scaled by their land share.
pub fn domain_mean_series(field: &Field, land_fraction: Option<&Array2<f64>>) -> Result<Vec<f64>> {
    let shape = field.grid.shape();
    let weights = field.grid.area_weights();
    let share = match land_fraction {
        Some(lf) if lf.dim() != shape => {
            return Err(PmpError::ShapeMismatch {
                context: format!("land fraction for '{}'", field.name),
                left: lf.shape().to_vec(),
                right: vec![shape.0, shape.1],
            });
        }
        Some(lf) => {
            let lf = lf.mapv(|v| if v.is_finite() { v } else { 0.0 });
            let to_percent = if lf.fold(0.0_f64, |m, &v| m.max(v)) <= 1.0 { 100.0 } else { 1.0 };
            lf.mapv(|v| v * to_percent / 100.0)
        }
        None => Array2::ones(shape),
    };

    Ok(field
        .data
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|map| {
            let (mut sum, mut wsum) = (0.0, 0.0);
            for ((v, w), f) in map.iter().zip(weights.iter()).zip(share.iter()) {
                if v.is_finite() && *f > 0.0 {
                    sum += w * v * f;
                    wsum += w;
                }
            }
            if wsum > 0.0 {
                sum / wsum
            } else {
                f64::NAN
            }
        })
        .collect())
}

/// First and last years with all twelve months present, clipped to the
/// requested range.
pub fn complete_years(dates: &[ModelDate], start: Option<i32>, end: Option<i32>) -> Option<(i32, i32)> {
    let (first, last) = (dates.first()?, dates.last()?);
    let mut first_year = if first.month > 1 { first.year + 1 } else { first.year };
    let mut last_year = if last.month < 12 { last.year - 1 } else { last.year };
    if let Some(s) = start {
        first_year = first_year.max(s);
    }
    if let Some(e) = end {
        last_year = last_year.min(e);
    }
    (first_year <= last_year).then_some((first_year, last_year))
}

/// Time indices of the monsoon year ending in `year`: January-December,
/// or July of the previous year to June for the Southern Hemisphere.
fn monsoon_year(dates: &[ModelDate], year: i32, southern: bool) -> Vec<usize> {
    dates
        .iter()
        .enumerate()
        .filter(|(_, d)| {
            if southern {
                (d.year == year - 1 && d.month >= 7) || (d.year == year && d.month <= 6)
            } else {
                d.year == year
            }
        })
        .map(|(i, _)| i)
        .collect()
}

/// Pentad means of one year of daily values, interpolated to
/// [`PENTADS_PER_YEAR`] when the calendar gives fewer.
pub fn pentad_series(daily: &[f64], dates: &[ModelDate], calendar: Calendar) -> Result<Vec<f64>> {
    let chunks: Vec<Range<usize>> = divide_chunks_advanced(dates, PENTAD, calendar)?
        .into_iter()
        .filter(|r| r.len() >= PENTAD)
        .collect();
    let pentads = chunk_means(daily, &chunks);
    if pentads.len() < PENTADS_PER_YEAR {
        interp1d(&pentads, PENTADS_PER_YEAR)
    } else {
        Ok(pentads)
    }
}

/// Composite annual cycle of one domain.
#[derive(Debug, Clone)]
pub struct RegionComposite {
    pub region: String,
    /// Pentad series of every monsoon year
    pub years: Vec<(i32, Vec<f64>)>,
    pub pentads: Vec<f64>,
    pub cumsum: Vec<f64>,
    pub metrics: OnsetDecay,
}

/// Domain-mean pentad composite of daily precipitation over `years`.
pub fn region_composite(
    field: &Field,
    land_fraction: Option<&Field>,
    region: &str,
    spec: &RegionSpec,
    years: (i32, i32),
) -> Result<RegionComposite> {
    let sub = region_subset(field, spec)?;
    let lf = match land_fraction {
        Some(lf) if !ALL_SURFACE_REGIONS.contains(&region) => Some(region_subset(lf, spec)?.first_map()),
        _ => None,
    };
    let series = domain_mean_series(&sub, lf.as_ref())?;
    let dates = field.dates()?;
    let calendar = field.calendar();
    let southern = SOUTHERN_REGIONS.contains(&region);

    // the first July-June year would start before the record
    let first = if southern { years.0 + 1 } else { years.0 };
    let mut by_year = Vec::new();
    for year in first..=years.1 {
        let idx = monsoon_year(dates, year, southern);
        let year_dates: Vec<ModelDate> = idx.iter().map(|&i| dates[i]).collect();
        let daily: Vec<f64> = idx.iter().map(|&i| series[i]).collect();
        let pentads = pentad_series(&daily, &year_dates, calendar)?;
        debug!(region, year, pentads = pentads.len(), "pentad series");
        by_year.push((year, pentads));
    }
    if by_year.is_empty() {
        return Err(PmpError::Calendar(format!(
            "no complete monsoon year for {region} in {}-{}",
            years.0, years.1
        )));
    }

    let n = by_year.len() as f64;
    let pentads: Vec<f64> = (0..PENTADS_PER_YEAR)
        .map(|p| by_year.iter().map(|(_, ts)| ts[p]).sum::<f64>() / n)
        .collect();
    let cumsum = cumsum(&pentads);
    let metrics = sperber_metrics(&cumsum)?;
    Ok(RegionComposite {
        region: region.to_string(),
        years: by_year,
        pentads,
        cumsum,
        metrics,
    })
}

/// Pattern correlation and normalized RMS error of a fractional
/// accumulation against the reference.
pub fn accumulation_skill(model: &[f64], reference: &[f64]) -> (f64, f64) {
    let cor = correlation(model, reference);
    let rms = (model
        .iter()
        .zip(reference)
        .map(|(m, r)| (m - r).powi(2))
        .sum::<f64>()
        / reference.len() as f64)
        .sqrt();
    (cor, rms / nan_std(reference, 0))
}

/// Settings of a fractional accumulation run, read from a JSON parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SperberConfig {
    pub mip: String,
    pub exp: String,
    pub frequency: String,
    pub realm: String,
    pub reference_data_name: String,
    pub reference_data_path: PathBuf,
    pub reference_data_lf_path: Option<PathBuf>,
    /// Daily model data with `%(model)`, `%(exp)`, `%(realization)` and `%(variable)`
    pub modpath: String,
    /// Model land fraction with `%(model)`
    pub modpath_lf: Option<String>,
    pub modnames: Vec<String>,
    /// A member name, or `*`/`all` for every file matching `modpath`
    pub realization: String,
    pub list_monsoon_regions: Vec<String>,
    #[serde(rename = "varModel")]
    pub var_model: String,
    #[serde(rename = "varOBS")]
    pub var_obs: String,
    pub msyear: Option<i32>,
    pub meyear: Option<i32>,
    pub osyear: Option<i32>,
    pub oeyear: Option<i32>,
    /// Factor applied to model values, e.g. 86400 for kg m-2 s-1 to mm/d
    pub mod_units_factor: Option<f64>,
    pub obs_units_factor: Option<f64>,
    pub units: String,
    #[serde(rename = "includeOBS")]
    pub include_obs: bool,
    /// Output directory, may contain `%(output_type)`
    pub results_dir: String,
    pub nc_out: bool,
    pub update_json: bool,
}

impl Default for SperberConfig {
    fn default() -> Self {
        Self {
            mip: "cmip6".into(),
            exp: "historical".into(),
            frequency: "da".into(),
            realm: "atm".into(),
            reference_data_name: "obs".into(),
            reference_data_path: PathBuf::new(),
            reference_data_lf_path: None,
            modpath: String::new(),
            modpath_lf: None,
            modnames: Vec::new(),
            realization: "r1i1p1f1".into(),
            list_monsoon_regions: MONSOON_REGIONS.iter().map(|r| r.to_string()).collect(),
            var_model: "pr".into(),
            var_obs: "pr".into(),
            msyear: None,
            meyear: None,
            osyear: None,
            oeyear: None,
            mod_units_factor: None,
            obs_units_factor: None,
            units: "mm/d".into(),
            include_obs: true,
            results_dir: ".".into(),
            nc_out: true,
            update_json: false,
        }
    }
}

impl SperberConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn output_dir(&self, output_type: &str) -> PathBuf {
        PathBuf::from(StringConstructor::new(self.results_dir.clone()).construct(&[("output_type", output_type)]))
    }

    pub fn json_name(&self) -> String {
        let year = |y: Option<i32>| y.map_or_else(|| "all".to_string(), |y| y.to_string());
        format!(
            "monsoon_sperber_stat_{}_{}_{}_{}_{}-{}",
            self.mip,
            self.exp,
            self.frequency,
            self.realm,
            year(self.msyear),
            year(self.meyear)
        )
    }

    fn model_path(&self, model: &str, realization: &str) -> PathBuf {
        PathBuf::from(StringConstructor::new(self.modpath.clone()).construct(&[
            ("model", model),
            ("exp", self.exp.as_str()),
            ("mip", self.mip.as_str()),
            ("realization", realization),
            ("variable", self.var_model.as_str()),
        ]))
    }

    /// `(realization, path)` of every existing input file of `model`.
    pub fn model_runs(&self, model: &str) -> Result<Vec<(String, PathBuf)>> {
        if !matches!(self.realization.to_lowercase().as_str(), "*" | "all") {
            let path = self.model_path(model, &self.realization);
            return Ok(if path.is_file() {
                vec![(self.realization.clone(), path)]
            } else {
                Vec::new()
            });
        }
        let pattern = self.model_path(model, "%(realization)");
        let (Some(dir), Some(name)) = (pattern.parent(), pattern.file_name()) else {
            return Ok(Vec::new());
        };
        let template = StringConstructor::new(name.to_string_lossy().into_owned());
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        let mut runs: Vec<(String, PathBuf)> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file = entry.file_name().to_string_lossy().into_owned();
                let keys = template.reverse(&file).ok()?;
                Some((keys.get("realization")?.clone(), entry.path()))
            })
            .collect();
        runs.sort();
        Ok(runs)
    }

    fn model_land_fraction(&self, model: &str) -> Option<PathBuf> {
        let template = StringConstructor::new(self.modpath_lf.clone()?);
        [model.to_string(), model.to_uppercase()]
            .iter()
            .map(|m| PathBuf::from(template.construct(&[("model", m.as_str())])))
            .find(|p| p.is_file())
    }
}

fn load_land_fraction(path: Option<&Path>) -> Option<Field> {
    let path = path?;
    match read_map(path, "sftlf").and_then(|(grid, map)| Field::from_map("sftlf", "%", grid, map)) {
        Ok(field) => Some(field),
        Err(e) => {
            warn!(path = %path.display(), "land fraction unavailable, using all grid points: {e}");
            None
        }
    }
}

fn load_daily(path: &Path, var: &str, factor: Option<f64>, units: &str) -> Result<Field> {
    let mut field = read_field(path, var)?;
    if let Some(f) = factor {
        field.data.mapv_inplace(|v| v * f);
        field.units = units.to_string();
    }
    Ok(field)
}

/// Composites of every configured region for one dataset.
fn dataset_composites(
    config: &SperberConfig,
    field: &Field,
    land_fraction: Option<&Field>,
    years: (Option<i32>, Option<i32>),
) -> Result<((i32, i32), Vec<RegionComposite>)> {
    if let Some(lf) = land_fraction {
        if lf.grid.shape() != field.grid.shape() {
            let (a, b) = (lf.grid.shape(), field.grid.shape());
            return Err(PmpError::ShapeMismatch {
                context: "land fraction vs precipitation grid".into(),
                left: vec![a.0, a.1],
                right: vec![b.0, b.1],
            });
        }
    }
    let span = complete_years(field.dates()?, years.0, years.1)
        .ok_or_else(|| PmpError::Calendar(format!("'{}' has no complete calendar year", field.name)))?;
    let specs = load_regions_specs();
    let composites = config
        .list_monsoon_regions
        .iter()
        .map(|region| {
            let spec = specs
                .get(region)
                .ok_or_else(|| PmpError::Generic(format!("region '{region}' is not defined")))?;
            region_composite(field, land_fraction, region, spec, span)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((span, composites))
}

fn write_diagnostics(config: &SperberConfig, name: &str, units: &str, composites: &[RegionComposite]) -> Result<()> {
    let path = config.output_dir("diagnostic_results").join(format!("{name}.nc"));
    let mut owned: Vec<(String, &[f64])> = Vec::new();
    for c in composites {
        for (year, ts) in &c.years {
            owned.push((format!("{}_{year}", c.region), ts.as_slice()));
        }
        owned.push((format!("{}_comp", c.region), c.pentads.as_slice()));
        owned.push((format!("{}_comp_cumsum", c.region), c.cumsum.as_slice()));
        owned.push((format!("{}_comp_cumsum_fraction", c.region), c.metrics.frac_accum.as_slice()));
    }
    let series: Vec<(&str, &[f64])> = owned.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    NetCDFWriter::new(&path).write_series("pentad", units, &series)
}

fn metrics_json(composite: &RegionComposite, reference: Option<&RegionComposite>) -> Value {
    let m = &composite.metrics;
    let mut out = json!({
        "onset_index": m.onset_index,
        "decay_index": m.decay_index,
        "slope": m.slope,
        "duration": m.duration,
    });
    if let Some(r) = reference {
        let (cor, rmsn) = accumulation_skill(&m.frac_accum, &r.metrics.frac_accum);
        out["cor"] = json!(cor);
        out["rmsn"] = json!(rmsn);
    }
    out
}

/// Onset/decay metrics of the reference and every model run; writes the
/// JSON results and, with `nc_out`, the pentad series of each dataset.
pub fn run(config: &SperberConfig) -> Result<Value> {
    let mut reference: Vec<RegionComposite> = Vec::new();
    let mut ref_block = Map::new();
    if config.include_obs {
        info!(reference = %config.reference_data_name, "reference pentad composites");
        let obs = load_daily(
            &config.reference_data_path,
            &config.var_obs,
            config.obs_units_factor,
            &config.units,
        )?;
        let lf = load_land_fraction(config.reference_data_lf_path.as_deref());
        let (span, composites) = dataset_composites(config, &obs, lf.as_ref(), (config.osyear, config.oeyear))?;
        if config.nc_out {
            let name = format!("{}_obs_{}_monsoon_sperber_{}-{}", config.mip, config.reference_data_name, span.0, span.1);
            write_diagnostics(config, &name, &obs.units, &composites)?;
        }
        let regions: Map<String, Value> = composites
            .iter()
            .map(|c| (c.region.clone(), metrics_json(c, None)))
            .collect();
        ref_block.insert(config.reference_data_name.clone(), Value::Object(regions));
        reference = composites;
    }

    let mut results = Map::new();
    for model in &config.modnames {
        let runs = config.model_runs(model)?;
        if runs.is_empty() {
            warn!(model = %model, "no daily precipitation found, skipping");
            continue;
        }
        let lf = load_land_fraction(config.model_land_fraction(model).as_deref());
        let mut model_block = Map::new();
        for (run, path) in runs {
            info!(model = %model, run = %run, path = %path.display(), "pentad composites");
            let computed = load_daily(&path, &config.var_model, config.mod_units_factor, &config.units)
                .and_then(|field| {
                    let (span, composites) =
                        dataset_composites(config, &field, lf.as_ref(), (config.msyear, config.meyear))?;
                    if config.nc_out {
                        let name = format!(
                            "{}_{model}_{}_{run}_monsoon_sperber_{}-{}",
                            config.mip, config.exp, span.0, span.1
                        );
                        write_diagnostics(config, &name, &field.units, &composites)?;
                    }
                    Ok(composites)
                });
            match computed {
                Ok(composites) => {
                    let regions: Map<String, Value> = composites
                        .iter()
                        .map(|c| {
                            let obs = reference.iter().find(|r| r.region == c.region);
                            (c.region.clone(), metrics_json(c, obs))
                        })
                        .collect();
                    model_block.insert(run, Value::Object(regions));
                }
                Err(e) => warn!(model = %model, run = %run, "failed: {e}"),
            }
        }
        results.insert(model.clone(), Value::Object(model_block));
    }

    let metrics = json!({
        "REF": ref_block,
        "RESULTS": results,
        "REFERENCE": "Sperber, K. and H. Annamalai, 2014: The use of fractional accumulated \
                      precipitation for the evaluation of the annual cycle of monsoons. \
                      Clim Dyn, 43:3219-3244, doi:10.1007/s00382-014-2099-3",
    });
    let mode = if config.update_json {
        WriteMode::Append
    } else {
        WriteMode::Overwrite
    };
    MetricsOutput::new(&config.output_dir("metrics_results"), &config.json_name())
        .with_structure(&JSON_STRUCTURE)
        .with_mode(mode)
        .write(&metrics)?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::daily_range;
    use approx::assert_relative_eq;

    #[test]
    fn plain_chunks() {
        let chunks = divide_chunks(12, 5);
        assert_eq!(chunks, vec![0..5, 5..10, 10..12]);
    }

    #[test]
    fn noleap_year_gives_73_pentads() {
        let dates = daily_range(Calendar::NoLeap, ModelDate::new(2001, 1, 1), 365).unwrap();
        let chunks = divide_chunks_advanced(&dates, 5, Calendar::NoLeap).unwrap();
        assert_eq!(chunks.len(), 73);
    }

    #[test]
    fn leap_day_joins_its_pentad() {
        let dates = daily_range(Calendar::Standard, ModelDate::new(2000, 1, 1), 366).unwrap();
        let chunks = divide_chunks_advanced(&dates, 5, Calendar::Standard).unwrap();
        assert_eq!(chunks.len(), 73);
        // Feb 29 is day index 59, inside the twelfth pentad (55..60)
        assert_eq!(chunks[11], 55..61);
        assert_eq!(chunks[72], 361..366);
    }

    #[test]
    fn bad_start_or_length_is_rejected() {
        let dates = daily_range(Calendar::NoLeap, ModelDate::new(2001, 1, 2), 365).unwrap();
        assert!(divide_chunks_advanced(&dates, 5, Calendar::NoLeap).is_err());
        let dates = daily_range(Calendar::NoLeap, ModelDate::new(2001, 1, 1), 300).unwrap();
        assert!(divide_chunks_advanced(&dates, 5, Calendar::NoLeap).is_err());
    }

    #[test]
    fn day360_extra_day_is_truncated() {
        let dates = daily_range(Calendar::Day360, ModelDate::new(2001, 1, 1), 361).unwrap();
        let chunks = divide_chunks_advanced(&dates, 5, Calendar::Day360).unwrap();
        assert_eq!(chunks.len(), 72);
        assert_eq!(chunks.last(), Some(&(355..360)));
    }

    /// Daily rain peaking on January 1 over a small grid.
    fn daily_field(years: usize, lat: Vec<f64>, lon: Vec<f64>) -> Field {
        use crate::field::{Grid, TimeAxis};
        use ndarray::{Array1, Array3};
        let n = 365 * years;
        let dates = daily_range(Calendar::NoLeap, ModelDate::new(2001, 1, 1), n).unwrap();
        let (nlat, nlon) = (lat.len(), lon.len());
        let data = Array3::from_shape_fn((n, nlat, nlon), |(t, i, j)| {
            let phase = (t % 365) as f64 / 365.0 * std::f64::consts::TAU;
            1.0 + 6.0 * phase.cos().max(0.0) + 0.1 * (i + j) as f64
        });
        let grid = Grid::new(Array1::from(lat), Array1::from(lon));
        Field::new("pr", "mm/d", grid, Some(TimeAxis::new(dates, Calendar::NoLeap)), data).unwrap()
    }

    fn boxed(lat: (f64, f64), lon: (f64, f64)) -> RegionSpec {
        RegionSpec {
            value: None,
            domain: Some(crate::regions::Domain {
                latitude: Some(lat),
                longitude: Some(lon),
            }),
        }
    }

    #[test]
    fn linear_accumulation_metrics() {
        let acc = cumsum(&[1.0; PENTADS_PER_YEAR]);
        let m = sperber_metrics(&acc).unwrap();
        assert_relative_eq!(m.frac_accum[0], 0.0);
        assert_relative_eq!(m.frac_accum[72], 1.0);
        assert_eq!(m.onset_index, 15);
        assert_eq!(m.decay_index, 58);
        assert_eq!(m.duration, 44);
        assert_relative_eq!(m.slope, 1.0 / 72.0, epsilon = 1e-12);
    }

    #[test]
    fn flat_or_missing_accumulation_rejected() {
        assert!(sperber_metrics(&[]).is_err());
        assert!(sperber_metrics(&[2.0, 2.0, 2.0]).is_err());
        assert!(sperber_metrics(&[0.0, f64::NAN, 2.0]).is_err());
    }

    #[test]
    fn land_share_weights_domain_mean() {
        use crate::field::Grid;
        use ndarray::{array, Array1, Array3};
        let grid = Grid::new(Array1::from(vec![0.0]), Array1::from(vec![0.0, 10.0]));
        let data = Array3::from_shape_vec((1, 1, 2), vec![2.0, 4.0]).unwrap();
        let field = Field::new("pr", "mm/d", grid, None, data).unwrap();

        assert_relative_eq!(domain_mean_series(&field, None).unwrap()[0], 3.0);
        let percent = array![[0.0, 50.0]];
        assert_relative_eq!(domain_mean_series(&field, Some(&percent)).unwrap()[0], 2.0);
        let fraction = array![[0.0, 0.5]];
        assert_relative_eq!(domain_mean_series(&field, Some(&fraction)).unwrap()[0], 2.0);
        assert!(domain_mean_series(&field, Some(&array![[1.0]])).is_err());
    }

    #[test]
    fn complete_years_skip_partial_ends() {
        let dates = daily_range(Calendar::NoLeap, ModelDate::new(2000, 3, 1), 365 * 3).unwrap();
        assert_eq!(complete_years(&dates, None, None), Some((2001, 2002)));
        assert_eq!(complete_years(&dates, Some(2002), None), Some((2002, 2002)));
        assert_eq!(complete_years(&dates, Some(2003), None), None);
        assert_eq!(complete_years(&[], None, None), None);
    }

    #[test]
    fn southern_domain_uses_july_to_june_years() {
        let field = daily_field(3, vec![-17.5, -12.5], vec![125.0, 135.0]);
        let spec = boxed((-20.0, -10.0), (120.0, 150.0));

        let south = region_composite(&field, None, "AUS", &spec, (2001, 2003)).unwrap();
        let years: Vec<i32> = south.years.iter().map(|(y, _)| *y).collect();
        assert_eq!(years, vec![2002, 2003]);
        assert_eq!(south.pentads.len(), PENTADS_PER_YEAR);
        // rain peaks at the turn of the year, mid-way through July-June
        assert!(south.metrics.onset_index < 36 && south.metrics.decay_index > 36);

        let north = region_composite(&field, None, "Sahel", &spec, (2001, 2003)).unwrap();
        assert_eq!(north.years.len(), 3);
        assert!(north.metrics.onset_index < south.metrics.onset_index);
    }

    #[test]
    fn identical_accumulations_have_perfect_skill() {
        let m = sperber_metrics(&cumsum(&[1.0, 3.0, 5.0, 2.0, 1.0])).unwrap();
        let (cor, rmsn) = accumulation_skill(&m.frac_accum, &m.frac_accum);
        assert_relative_eq!(cor, 1.0, epsilon = 1e-12);
        assert_relative_eq!(rmsn, 0.0);
    }

    #[test]
    fn all_realizations_found_by_template() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["pr_ModelA_r1.nc", "pr_ModelA_r2.nc", "pr_ModelB_r1.nc", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let config = SperberConfig {
            modpath: dir.path().join("pr_%(model)_%(realization).nc").display().to_string(),
            realization: "*".into(),
            ..SperberConfig::default()
        };
        let runs: Vec<String> = config.model_runs("ModelA").unwrap().into_iter().map(|(r, _)| r).collect();
        assert_eq!(runs, vec!["r1", "r2"]);

        let single = SperberConfig {
            realization: "r2".into(),
            ..config.clone()
        };
        assert_eq!(single.model_runs("ModelA").unwrap().len(), 1);
        assert!(single.model_runs("ModelB").unwrap().is_empty());
    }

    #[test]
    fn interpolation_keeps_end_points() {
        let out = interp1d(&[0.0, 10.0, 20.0], 5).unwrap();
        assert_eq!(out.len(), 5);
        assert_relative_eq!(out[1], 5.0);
        assert_relative_eq!(out[4], 20.0);
    }
}
