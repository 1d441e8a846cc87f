//! Global monsoon precipitation domain and index after Wang et al. (2011,
//! doi:10.1007/s00382-010-0877-0).

use crate::calendar::NOLEAP_MONTH_DAYS;
use crate::errors::{PmpError, Result};
use crate::field::Field;
use crate::netcdf_io::{read_field, NetCDFWriter};
use crate::output::{MetricsOutput, DISCLAIMER};
use crate::regions::{load_regions_specs, region_subset};
use crate::statistics::{cor_xy, rms_xy, std_xy};
use crate::template::StringConstructor;
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MONSOON_DOMAINS: [&str; 8] = ["AllMW", "AllM", "NAMM", "SAMM", "NAFM", "SAFM", "ASM", "AUSM"];

/// 2.5 mm/day in kg m-2 s-1
pub const DEFAULT_THRESHOLD: f64 = 2.5 / 86400.0;

fn compute_season(clim: &Field, months: &[usize]) -> Array2<f64> {
    let (nlat, nlon) = clim.grid.shape();
    let mut out = Array2::<f64>::zeros((nlat, nlon));
    let mut days = 0.0;
    for &m in months {
        let length = f64::from(NOLEAP_MONTH_DAYS[m]);
        out.scaled_add(length, &clim.data.index_axis(Axis(0), m));
        days += length;
    }
    out / days
}

/// Annual range (local summer minus winter, MJJAS - NDJFM, sign flipped
/// south of the equator) and monsoon precipitation index of a 12-month
/// climatology. The index is NaN where the annual mean is zero.
pub fn mpd(clim: &Field) -> Result<(Field, Field)> {
    if clim.n_time() != 12 {
        return Err(PmpError::Statistics(format!(
            "mpd needs a 12 month climatology, '{}' has {} steps",
            clim.name,
            clim.n_time()
        )));
    }
    let mjjas = compute_season(clim, &[4, 5, 6, 7, 8]);
    let ndjfm = compute_season(clim, &[10, 11, 0, 1, 2]);
    let ann = compute_season(clim, &(0..12).collect::<Vec<_>>());

    let mut annrange = mjjas - ndjfm;
    for (mut row, &lat) in annrange.axis_iter_mut(Axis(0)).zip(clim.grid.lat.iter()) {
        if lat < 0.0 {
            row.mapv_inplace(|v| -v);
        }
    }
    let mpi = Zip::from(&annrange)
        .and(&ann)
        .map_collect(|&r, &a| if a != 0.0 { r / a } else { f64::NAN });

    Ok((
        Field::from_map("annrange", clim.units.clone(), clim.grid.clone(), annrange)?,
        Field::from_map("mpi", "", clim.grid.clone(), mpi)?,
    ))
}

/// Contingency counts of monsoon-domain detection and their maps (1/0).
#[derive(Debug, Clone)]
pub struct SkillScores {
    pub hit: f64,
    pub missed: f64,
    pub false_alarm: f64,
    /// hit / (hit + missed + false alarm), 1e20 when there are no events
    pub threat_score: f64,
    pub hitmap: Array2<f64>,
    pub missmap: Array2<f64>,
    pub falarmmap: Array2<f64>,
}

pub fn mpi_skill_scores(
    annrange_mod: &Array2<f64>,
    annrange_obs: &Array2<f64>,
    threshold: f64,
) -> Result<SkillScores> {
    if annrange_mod.shape() != annrange_obs.shape() {
        return Err(PmpError::ShapeMismatch {
            context: "mpi skill scores".into(),
            left: annrange_mod.shape().to_vec(),
            right: annrange_obs.shape().to_vec(),
        });
    }
    let indicator = |b: bool| if b { 1.0 } else { 0.0 };
    let mut hitmap = Array2::zeros(annrange_mod.raw_dim());
    let mut missmap = Array2::zeros(annrange_mod.raw_dim());
    let mut falarmmap = Array2::zeros(annrange_mod.raw_dim());
    Zip::from(&mut hitmap)
        .and(&mut missmap)
        .and(&mut falarmmap)
        .and(annrange_mod)
        .and(annrange_obs)
        .for_each(|h, m, f, &md, &ob| {
            let mt = md > threshold;
            let ot = ob > threshold;
            *h = indicator(mt && ot);
            *m = indicator(ot && !mt);
            *f = indicator(mt && !ot);
        });

    let hit = hitmap.sum();
    let missed = missmap.sum();
    let false_alarm = falarmmap.sum();
    let events = hit + missed + false_alarm;
    let threat_score = if events > 0.0 { hit / events } else { 1.0e20 };

    Ok(SkillScores {
        hit,
        missed,
        false_alarm,
        threat_score,
        hitmap,
        missmap,
        falarmmap,
    })
}

/// Inputs of a monsoon index run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WangConfig {
    /// Model climatology path template with `%(model)` and `%(variable)`
    pub test_data_path: String,
    pub reference_data_path: PathBuf,
    pub modnames: Vec<String>,
    pub results_dir: PathBuf,
    pub outnamejson: String,
    pub experiment: String,
    #[serde(rename = "MIP")]
    pub mip: String,
    pub obsvar: String,
    pub modvar: String,
    pub threshold: f64,
}

impl Default for WangConfig {
    fn default() -> Self {
        Self {
            test_data_path: String::new(),
            reference_data_path: PathBuf::new(),
            modnames: Vec::new(),
            results_dir: PathBuf::from("."),
            outnamejson: "monsoon_wang.json".into(),
            experiment: "historical".into(),
            mip: "CMIP5".into(),
            obsvar: "pr".into(),
            modvar: "pr".into(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl WangConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    fn model_path(&self, model: &str) -> PathBuf {
        let template = StringConstructor::new(self.test_data_path.clone());
        PathBuf::from(template.construct(&[
            ("model", model),
            ("variable", self.modvar.as_str()),
            ("experiment", self.experiment.as_str()),
            ("mip", self.mip.as_str()),
        ]))
    }
}

fn fmt3(v: f64) -> String {
    format!("{v:.3}")
}

/// Compute `cor`, `rmsn` and `threat_score` for every model and monsoon
/// domain; writes the JSON results and per-domain NetCDF maps.
pub fn run(config: &WangConfig) -> Result<Value> {
    let obs = read_field(&config.reference_data_path, &config.obsvar)?;
    let (annrange_obs, mpi_obs) = mpd(&obs)?;

    let nc_dir = config
        .results_dir
        .join(format!("{}_{}_wang-monsoon", config.experiment, config.mip));
    std::fs::create_dir_all(&nc_dir)?;

    let models: Vec<&String> = config
        .modnames
        .iter()
        .filter(|m| {
            let found = config.model_path(m).is_file();
            if !found {
                warn!(model = %m, "model climatology not found, skipping");
            }
            found
        })
        .collect();
    if models.is_empty() {
        return Err(PmpError::Generic("No model file found!".into()));
    }

    let specs = load_regions_specs();
    let mut results = Map::new();
    for model in models {
        let path = config.model_path(model);
        info!(model = %model, path = %path.display(), "monsoon precipitation index");
        let clim = read_field(&path, &config.modvar)?;
        let (annrange_mod, mpi_mod) = mpd(&clim)?;
        if annrange_mod.grid.shape() != annrange_obs.grid.shape() {
            return Err(PmpError::ShapeMismatch {
                context: format!("model '{model}' vs reference grid"),
                left: vec![annrange_mod.grid.shape().0, annrange_mod.grid.shape().1],
                right: vec![annrange_obs.grid.shape().0, annrange_obs.grid.shape().1],
            });
        }

        let mut domains = Map::new();
        for dom in MONSOON_DOMAINS {
            let spec = specs
                .get(dom)
                .ok_or_else(|| PmpError::Generic(format!("region '{dom}' is not defined")))?;

            let mpi_obs_reg = region_subset(&mpi_obs, spec)?;
            let mpi_mod_reg = region_subset(&mpi_mod, spec)?;
            let weights = mpi_obs_reg.grid.area_weights();
            let obs_sd = std_xy(mpi_obs_reg.map(0), weights.view())?;
            let cor = cor_xy(mpi_mod_reg.map(0), mpi_obs_reg.map(0), weights.view())?;
            let rms = rms_xy(mpi_mod_reg.map(0), mpi_obs_reg.map(0), weights.view())?;
            let rmsn = rms / obs_sd;

            let range_mod = region_subset(&annrange_mod, spec)?;
            let range_obs = region_subset(&annrange_obs, spec)?;
            let scores = mpi_skill_scores(&range_mod.first_map(), &range_obs.first_map(), config.threshold)?;

            domains.insert(
                dom.to_string(),
                json!({
                    "cor": fmt3(cor),
                    "rmsn": fmt3(rmsn),
                    "threat_score": fmt3(scores.threat_score),
                }),
            );

            let nc_path = nc_dir.join(format!("{model}_{dom}_wang-monsoon.nc"));
            NetCDFWriter::new(&nc_path).write_maps(
                &range_mod.grid,
                &[
                    ("annrange", range_mod.map(0)),
                    ("hitmap", scores.hitmap.view()),
                    ("missmap", scores.missmap.view()),
                    ("falarmmap", scores.falarmmap.view()),
                ],
            )?;
        }
        results.insert(model.clone(), Value::Object(domains));
    }

    let metrics = json!({
        "DISCLAIMER": DISCLAIMER,
        "REFERENCE": "The statistics in this file are based on Wang, B., Kim, HJ., Kikuchi, K. \
                      et al. Clim Dyn (2011) 37: 941. doi:10.1007/s00382-010-0877-0",
        "RESULTS": results,
    });
    MetricsOutput::new(&config.results_dir, &config.outnamejson)
        .with_structure(&["model", "domain", "statistic"])
        .write(&metrics)?;
    Ok(metrics)
}
