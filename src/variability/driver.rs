//! Variability mode metrics: observed mode, model EOFs and common basis
//! function (CBF) projections, written to one JSON file per mode.

use super::analysis::{
    adjust_timeseries, eof_analysis_get_variance_mode, gain_pcs_fraction, gain_pseudo_pcs,
    linear_regression_on_globe, variance_mode_from_solver,
};
use super::eof::EofSolver;
use super::stats::{calc_stats_save_dict, calc_std, ModeMethod, ModePattern, ObsPattern};
use crate::errors::{PmpError, Result};
use crate::field::Field;
use crate::netcdf_io::{read_field, NetCDFWriter};
use crate::output::{update_dict, MetricsOutput};
use crate::regions::{find_region, region_subset, RegionSpec};
use crate::statistics::correlation;
use crate::template::StringConstructor;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const JSON_STRUCTURE: [&str; 7] = [
    "model",
    "realization",
    "reference",
    "mode",
    "season",
    "method",
    "statistic",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariabilityConfig {
    pub variability_mode: String,
    pub seasons: Vec<String>,
    pub eofn_obs: usize,
    pub eofn_mod: usize,
    /// Number of model EOFs searched for the best match
    pub eofn_mod_max: usize,
    pub reference_data_path: PathBuf,
    #[serde(rename = "varOBS")]
    pub var_obs: String,
    /// Model path template with `%(model)`, `%(realization)`, `%(variable)`
    pub modpath: String,
    pub modnames: Vec<String>,
    pub realization: String,
    #[serde(rename = "varModel")]
    pub var_model: String,
    pub osyear: Option<i32>,
    pub oeyear: Option<i32>,
    pub msyear: Option<i32>,
    pub meyear: Option<i32>,
    #[serde(rename = "RemoveDomainMean")]
    pub remove_domain_mean: bool,
    #[serde(rename = "EofScaling")]
    pub eof_scaling: bool,
    #[serde(rename = "CBF")]
    pub cbf: bool,
    #[serde(rename = "ConvEOF")]
    pub conv_eof: bool,
    pub results_dir: PathBuf,
    pub mip: String,
    pub exp: String,
    pub nc_out: bool,
    pub regions_specs: Option<BTreeMap<String, RegionSpec>>,
}

impl Default for VariabilityConfig {
    fn default() -> Self {
        Self {
            variability_mode: "NAM".into(),
            seasons: vec!["DJF".into()],
            eofn_obs: 1,
            eofn_mod: 1,
            eofn_mod_max: 3,
            reference_data_path: PathBuf::new(),
            var_obs: "psl".into(),
            modpath: String::new(),
            modnames: Vec::new(),
            realization: "r1i1p1".into(),
            var_model: "psl".into(),
            osyear: None,
            oeyear: None,
            msyear: None,
            meyear: None,
            remove_domain_mean: true,
            eof_scaling: false,
            cbf: true,
            conv_eof: true,
            results_dir: PathBuf::from("."),
            mip: "cmip6".into(),
            exp: "historical".into(),
            nc_out: false,
            regions_specs: None,
        }
    }
}

impl VariabilityConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    fn model_path(&self, model: &str) -> PathBuf {
        let template = StringConstructor::new(self.modpath.clone());
        PathBuf::from(template.construct(&[
            ("model", model),
            ("realization", self.realization.as_str()),
            ("variable", self.var_model.as_str()),
            ("mip", self.mip.as_str()),
            ("exp", self.exp.as_str()),
        ]))
    }

    fn suffix(&self) -> &'static str {
        if self.eof_scaling {
            "_EOFscaled"
        } else {
            ""
        }
    }
}

fn period(field: &Field, start: Option<i32>, end: Option<i32>) -> Result<String> {
    let dates = field.dates()?;
    let first = start.or_else(|| dates.first().map(|d| d.year)).unwrap_or_default();
    let last = end.or_else(|| dates.last().map(|d| d.year)).unwrap_or_default();
    Ok(format!("{first}-{last}"))
}

/// Observed mode of one season, kept for scoring the models.
struct ObsMode {
    pattern: ModePattern,
    solver: EofSolver,
    reverse_sign: bool,
}

fn write_diagnostics(
    config: &VariabilityConfig,
    name: &str,
    eof_lr: &Field,
    slope: &Array2<f64>,
    intercept: &Array2<f64>,
) -> Result<()> {
    if !config.nc_out {
        return Ok(());
    }
    let path = config
        .results_dir
        .join("diagnostic_results")
        .join(format!("{name}{}.nc", config.suffix()));
    NetCDFWriter::new(&path).write_maps(
        &eof_lr.grid,
        &[
            ("eof", eof_lr.map(0)),
            ("slope", slope.view()),
            ("intercept", intercept.view()),
        ],
    )
}

fn analyse_obs(
    config: &VariabilityConfig,
    obs: &Field,
    season: &str,
    domain: &RegionSpec,
) -> Result<(ObsMode, Map<String, Value>)> {
    let mode = config.variability_mode.as_str();
    let adjusted = adjust_timeseries(obs, mode, season, domain, config.remove_domain_mean)?;
    let subdomain = region_subset(&adjusted, domain)?;
    let (vm, solver) = eof_analysis_get_variance_mode(mode, &subdomain, config.eofn_obs, config.eof_scaling)?;
    let stdv_pc = calc_std(&vm.pc);
    let (eof_lr, slope, intercept) = linear_regression_on_globe(&vm.pc, &adjusted, stdv_pc, config.eof_scaling)?;

    write_diagnostics(
        config,
        &format!("{mode}_{}_EOF{}_{season}_obs_{}", config.var_obs, config.eofn_obs, period(obs, config.osyear, config.oeyear)?),
        &eof_lr,
        &slope,
        &intercept,
    )?;

    let mut pattern = ModePattern {
        eof: vm.eof,
        eof_lr,
        pc: vm.pc,
        stdv_pc,
        frac: vm.frac,
    };
    let dict = calc_stats_save_dict(&mut pattern, domain, None, ModeMethod::Eof)?;
    Ok((
        ObsMode {
            pattern,
            solver,
            reverse_sign: vm.reverse_sign,
        },
        dict,
    ))
}

/// CBF statistics and the CBF PC of one model season.
fn analyse_cbf(
    config: &VariabilityConfig,
    adjusted: &Field,
    obs: &ObsMode,
    domain: &RegionSpec,
) -> Result<(Map<String, Value>, Vec<f64>)> {
    let subdomain = region_subset(adjusted, domain)?;
    let cbf_pc = gain_pseudo_pcs(&obs.solver, &subdomain, config.eofn_obs, obs.reverse_sign, config.eof_scaling)?;
    let stdv = calc_std(&cbf_pc);
    let (eof_lr, _, _) = linear_regression_on_globe(&cbf_pc, adjusted, stdv, config.eof_scaling)?;
    let eof_sub = region_subset(&eof_lr, domain)?;
    let standardized: Vec<f64> = cbf_pc.iter().map(|v| v / stdv).collect();
    let frac = gain_pcs_fraction(&subdomain, &eof_sub.first_map(), &standardized)?;

    let mut pattern = ModePattern {
        eof: eof_sub,
        eof_lr,
        pc: cbf_pc,
        stdv_pc: stdv,
        frac,
    };
    let obs_ref = ObsPattern {
        eof: &obs.pattern.eof,
        eof_lr: &obs.pattern.eof_lr,
        stdv_pc: obs.pattern.stdv_pc,
    };
    let dict = calc_stats_save_dict(&mut pattern, domain, Some(obs_ref), ModeMethod::Cbf)?;
    Ok((dict, pattern.pc))
}

fn best_index(values: &[f64], larger_is_better: bool) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| {
            if larger_is_better {
                a.1.total_cmp(b.1)
            } else {
                b.1.total_cmp(a.1)
            }
        })
        .map(|(i, _)| i + 1)
}

fn analyse_model_season(
    config: &VariabilityConfig,
    field: &Field,
    season: &str,
    obs: &ObsMode,
    domain: &RegionSpec,
    model: &str,
) -> Result<Map<String, Value>> {
    let mode = config.variability_mode.as_str();
    let adjusted = adjust_timeseries(field, mode, season, domain, config.remove_domain_mean)?;
    let mut out = Map::new();
    out.insert("period".into(), json!(period(field, config.msyear, config.meyear)?));

    let mut cbf_pc = None;
    if config.cbf {
        let (dict, pc) = analyse_cbf(config, &adjusted, obs, domain)?;
        out.insert(ModeMethod::Cbf.as_str().into(), Value::Object(dict));
        cbf_pc = Some(pc);
    }

    if config.conv_eof {
        let subdomain = region_subset(&adjusted, domain)?;
        let solver = EofSolver::new(&subdomain)?;
        let n_max = config.eofn_mod_max.max(config.eofn_mod).min(solver.n_modes());
        let (mut rms, mut cor, mut tcor) = (Vec::new(), Vec::new(), Vec::new());
        for n in 1..=n_max {
            let vm = variance_mode_from_solver(mode, &subdomain, &solver, n, config.eof_scaling)?;
            let stdv_pc = calc_std(&vm.pc);
            let (eof_lr, slope, intercept) =
                linear_regression_on_globe(&vm.pc, &adjusted, stdv_pc, config.eof_scaling)?;
            let mut pattern = ModePattern {
                eof: vm.eof,
                eof_lr,
                pc: vm.pc,
                stdv_pc,
                frac: vm.frac,
            };
            let obs_ref = ObsPattern {
                eof: &obs.pattern.eof,
                eof_lr: &obs.pattern.eof_lr,
                stdv_pc: obs.pattern.stdv_pc,
            };
            let mut dict = calc_stats_save_dict(&mut pattern, domain, Some(obs_ref), ModeMethod::Eof)?;
            if let Some(cbf) = &cbf_pc {
                let tc = correlation(cbf, &pattern.pc);
                dict.insert("tcor_cbf_vs_eof_pc".into(), json!(tc));
                tcor.push(tc);
            }
            rms.push(dict.get("rms").and_then(Value::as_f64).unwrap_or(f64::NAN));
            cor.push(dict.get("cor").and_then(Value::as_f64).unwrap_or(f64::NAN));

            write_diagnostics(
                config,
                &format!("{mode}_{}_EOF{n}_{season}_{}_{model}_{}_{}", config.var_model, config.mip, config.exp, config.realization),
                &pattern.eof_lr,
                &slope,
                &intercept,
            )?;
            out.insert(format!("eof{n}"), Value::Object(dict));
        }
        if let Some(i) = best_index(&rms, false) {
            out.insert("best_matching_model_eofs__rms".into(), json!(i));
        }
        if let Some(i) = best_index(&cor, true) {
            out.insert("best_matching_model_eofs__cor".into(), json!(i));
        }
        if let Some(i) = best_index(&tcor, true) {
            out.insert("best_matching_model_eofs__tcor_cbf_vs_eof_pc".into(), json!(i));
        }
    }
    Ok(out)
}

/// Run the mode analysis for the observation and every model found.
pub fn run(config: &VariabilityConfig) -> Result<Value> {
    let mode = config.variability_mode.as_str();
    let domain = find_region(mode, config.regions_specs.as_ref())?;
    let obs_field = read_field(&config.reference_data_path, &config.var_obs)?
        .select_years(config.osyear, config.oeyear)?;

    let mut result = json!({
        "REF": {"obs": {"defaultReference": {
            "source": config.reference_data_path.display().to_string(),
            "reference_eofs": config.eofn_obs,
            "period": period(&obs_field, config.osyear, config.oeyear)?,
        }}},
        "RESULTS": {},
    });

    let mut obs_modes = BTreeMap::new();
    for season in &config.seasons {
        info!(mode, season = %season, "observed mode");
        let (obs_mode, dict) = analyse_obs(config, &obs_field, season, &domain)?;
        update_dict(
            &mut result,
            &json!({"REF": {"obs": {"defaultReference": {mode: {season.as_str(): dict}}}}}),
        );
        obs_modes.insert(season.clone(), obs_mode);
    }

    for model in &config.modnames {
        let path = config.model_path(model);
        if !path.is_file() {
            warn!(model = %model, path = %path.display(), "model file not found, skipping");
            continue;
        }
        let field = read_field(&path, &config.var_model)?.select_years(config.msyear, config.meyear)?;
        let mut per_mode = Map::new();
        per_mode.insert("target_model_eofs".into(), json!(config.eofn_mod));
        for season in &config.seasons {
            let obs_mode = obs_modes
                .get(season)
                .ok_or_else(|| PmpError::Generic(format!("no observed mode for {season}")))?;
            match analyse_model_season(config, &field, season, obs_mode, &domain, model) {
                Ok(dict) => {
                    per_mode.insert(season.clone(), Value::Object(dict));
                }
                Err(e) => warn!(model = %model, season = %season, "failed: {e}"),
            }
        }
        update_dict(
            &mut result,
            &json!({"RESULTS": {model.as_str(): {config.realization.as_str(): {"defaultReference": {mode: per_mode}}}}}),
        );
    }

    let name = format!(
        "var_mode_{mode}_EOF{}_stat_{}_{}_mo_atm_{}",
        config.eofn_mod,
        config.mip,
        config.exp,
        period(&obs_field, config.msyear, config.meyear)?
    );
    MetricsOutput::new(&config.results_dir.join("metrics_results"), &name)
        .with_structure(&JSON_STRUCTURE)
        .write(&result)?;
    Ok(result)
}
