//! CMEC driver interface: turns a CMEC settings file plus the `CMEC_*`
//! environment into a PMP parameter file.

use crate::errors::{PmpError, Result};
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configs that cannot run without an observation directory
pub const OBS_REQUIRED: &[&str] = &["mean_climate", "variability_modes", "monsoon_wang", "mjo"];

/// The four CMEC environment variables. Unset, empty and the literal
/// `"None"` all mean absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmecEnvironment {
    pub wk_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub obs_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
}

impl CmecEnvironment {
    pub fn from_env() -> Self {
        Self {
            wk_dir: read_var("CMEC_WK_DIR"),
            model_dir: read_var("CMEC_MODEL_DATA"),
            obs_dir: read_var("CMEC_OBS_DATA"),
            config_dir: read_var("CMEC_CONFIG_DIR"),
        }
    }
}

fn read_var(name: &str) -> Option<PathBuf> {
    normalize(env::var(name).ok())
}

fn normalize(value: Option<String>) -> Option<PathBuf> {
    value
        .filter(|v| !v.is_empty() && v != "None")
        .map(PathBuf::from)
}

/// Build the parameter map for `PMP/<pmp_config>` from a CMEC settings JSON.
///
/// # Errors
///
/// Fails when the settings section is missing, when the observation
/// directory is absent for a config that needs it, or when a path must be
/// joined under a directory that is not set.
pub fn generate_parameters(
    config_json: &str,
    pmp_config: &str,
    env: &CmecEnvironment,
) -> Result<Map<String, Value>> {
    if env.obs_dir.is_none() {
        warn!("$CMEC_OBS_DATA is not set");
        if OBS_REQUIRED.contains(&pmp_config) {
            return Err(PmpError::Generic(format!(
                "PMP/{pmp_config} requires obs directory"
            )));
        }
    }

    let root: Value = serde_json::from_str(config_json)?;
    let section = format!("PMP/{pmp_config}");
    let mut settings = match root.get(&section) {
        Some(Value::Object(map)) => map.clone(),
        _ => {
            return Err(PmpError::Generic(format!(
                "settings section '{section}' not found"
            )))
        }
    };

    let model = || dir_value(env.model_dir.as_deref());
    let obs = || dir_value(env.obs_dir.as_deref());
    let wk = || dir_value(env.wk_dir.as_deref());

    match pmp_config {
        "mean_climate" => {
            settings.insert("test_data_path".into(), model());
            settings.insert("reference_data_path".into(), obs());
            settings.insert("metrics_output_path".into(), wk());
        }
        "monsoon_wang" => {
            join_under(&mut settings, "test_data_path", env.model_dir.as_deref(), true)?;
            join_under(&mut settings, "reference_data_path", env.obs_dir.as_deref(), true)?;
        }
        "variability_modes" | "mjo" | "monsoon_sperber" => {
            join_under(&mut settings, "modpath", env.model_dir.as_deref(), true)?;
            join_under(&mut settings, "reference_data_path", env.obs_dir.as_deref(), true)?;
            join_under(&mut settings, "modpath_lf", env.model_dir.as_deref(), false)?;
            join_under(&mut settings, "reference_data_lf_path", env.obs_dir.as_deref(), false)?;
        }
        _ => {}
    }

    if pmp_config == "diurnal_cycle" {
        settings.insert("modpath".into(), model());
    } else {
        settings.insert("results_dir".into(), wk());
    }
    if settings.contains_key("custom_observations") {
        join_under(&mut settings, "custom_observations", env.obs_dir.as_deref(), true)?;
    }

    settings.insert("cmec".into(), Value::Bool(true));

    for value in settings.values_mut() {
        if let Value::String(s) = value {
            if let Some(converted) = convert_string(s) {
                *value = converted;
            }
        }
    }

    info!(config = pmp_config, entries = settings.len(), "generated CMEC parameters");
    Ok(settings)
}

/// Generate and write the parameter file.
pub fn write_parameter_file(
    config_path: &Path,
    out_path: &Path,
    pmp_config: &str,
    env: &CmecEnvironment,
) -> Result<()> {
    let text = fs::read_to_string(config_path)?;
    let settings = generate_parameters(&text, pmp_config, env)?;
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, serde_json::to_string_pretty(&Value::Object(settings))?)?;
    Ok(())
}

fn dir_value(dir: Option<&Path>) -> Value {
    dir.map_or(Value::Null, |d| Value::String(d.display().to_string()))
}

fn join_under(
    settings: &mut Map<String, Value>,
    key: &str,
    dir: Option<&Path>,
    required: bool,
) -> Result<()> {
    let Some(Value::String(rel)) = settings.get(key) else {
        if required {
            return Err(PmpError::Generic(format!("CMEC settings are missing '{key}'")));
        }
        return Ok(());
    };
    let dir = dir.ok_or_else(|| {
        PmpError::Generic(format!("'{key}' needs a CMEC data directory that is not set"))
    })?;
    let joined = dir.join(rel).display().to_string();
    settings.insert(key.to_string(), Value::String(joined));
    Ok(())
}

/// Strings that spell booleans, lists, tuples or objects become JSON values.
fn convert_string(s: &str) -> Option<Value> {
    match s {
        "true" | "True" => return Some(Value::Bool(true)),
        "false" | "False" => return Some(Value::Bool(false)),
        _ => {}
    }
    let trimmed = s.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        let as_list = format!("[{}]", &trimmed[1..trimmed.len() - 1]);
        return serde_json::from_str(&as_list.replace('\'', "\"")).ok();
    }
    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        return serde_json::from_str(&trimmed.replace('\'', "\"")).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_all() -> CmecEnvironment {
        CmecEnvironment {
            wk_dir: Some("/wk".into()),
            model_dir: Some("/model".into()),
            obs_dir: Some("/obs".into()),
            config_dir: None,
        }
    }

    #[test]
    fn literal_none_is_absent() {
        assert_eq!(normalize(Some("None".into())), None);
        assert_eq!(normalize(Some(String::new())), None);
        assert_eq!(normalize(Some("/data".into())), Some(PathBuf::from("/data")));
    }

    #[test]
    fn mean_climate_paths_and_booleans() {
        let cfg = r#"{"PMP/mean_climate": {"vars": ["pr"], "save_test_clims": "True", "regrid": "(1, 2)"}}"#;
        let s = generate_parameters(cfg, "mean_climate", &env_all()).unwrap();
        assert_eq!(s["test_data_path"], "/model");
        assert_eq!(s["reference_data_path"], "/obs");
        assert_eq!(s["metrics_output_path"], "/wk");
        assert_eq!(s["results_dir"], "/wk");
        assert_eq!(s["save_test_clims"], Value::Bool(true));
        assert_eq!(s["regrid"], serde_json::json!([1, 2]));
        assert_eq!(s["cmec"], Value::Bool(true));
    }

    #[test]
    fn variability_joins_paths() {
        let cfg = r#"{"PMP/variability_modes": {"modpath": "psl.nc", "reference_data_path": "obs/psl.nc", "modpath_lf": "sftlf.nc"}}"#;
        let s = generate_parameters(cfg, "variability_modes", &env_all()).unwrap();
        assert_eq!(s["modpath"], "/model/psl.nc");
        assert_eq!(s["reference_data_path"], "/obs/obs/psl.nc");
        assert_eq!(s["modpath_lf"], "/model/sftlf.nc");
        assert!(!s.contains_key("reference_data_lf_path"));
    }

    #[test]
    fn diurnal_cycle_sets_modpath_only() {
        let cfg = r#"{"PMP/diurnal_cycle": {"num_workers": 4}}"#;
        let s = generate_parameters(cfg, "diurnal_cycle", &env_all()).unwrap();
        assert_eq!(s["modpath"], "/model");
        assert!(!s.contains_key("results_dir"));
    }

    #[test]
    fn missing_obs_dir_is_fatal_for_some_configs() {
        let mut env = env_all();
        env.obs_dir = None;
        let cfg = r#"{"PMP/mjo": {}, "PMP/diurnal_cycle": {}}"#;
        assert!(generate_parameters(cfg, "mjo", &env).is_err());
        assert!(generate_parameters(cfg, "diurnal_cycle", &env).is_ok());
    }

    #[test]
    fn missing_section_is_an_error() {
        assert!(generate_parameters("{}", "monsoon_wang", &env_all()).is_err());
    }
}
