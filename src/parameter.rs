//! Dynamic parameter object for metrics runs.
//!
//! Parameter files are JSON objects. Values are kept untyped so that each
//! option can be validated the same way regardless of where it came from
//! (file, CLI override, or the CMEC generator).

use crate::errors::{ParameterError, PmpError, Result};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use tracing::{error, warn};

pub const VARS_2D_ATMOS: &[&str] = &[
    "clt", "hfss", "pr", "prw", "psl", "rlut", "rlutcs", "rsdt", "rsut", "rsutcs", "tas", "tauu",
    "tauv", "ts", "uas", "vas",
];
pub const VARS_3D_ATMOS: &[&str] = &["hur", "hus", "huss", "ta", "ua", "va", "zg"];
pub const VARS_2D_OCEAN: &[&str] = &["sos", "tos", "zos"];
pub const VARS_NON_STD: &[&str] = &["rlwcrf", "rswcrf"];

const REF_VALUES: &[&str] = &["default", "all", "alternate", "ref3"];
const TARGET_GRIDS: &[&str] = &["2.5x2.5"];
const REGRID_TOOLS: &[&str] = &["regrid2", "esmf"];
const REGRID_METHODS: &[&str] = &["linear", "conservative"];

/// Every known variable name accepted by `vars`.
pub fn known_variables() -> Vec<&'static str> {
    VARS_2D_ATMOS
        .iter()
        .chain(VARS_3D_ATMOS)
        .chain(VARS_2D_OCEAN)
        .chain(VARS_NON_STD)
        .copied()
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PmpParameter {
    values: Map<String, Value>,
}

impl Default for PmpParameter {
    fn default() -> Self {
        Self::new()
    }
}

impl PmpParameter {
    pub fn new() -> Self {
        let defaults = json!({
            "case_id": "",
            "period": "",
            "realization": "",
            "reference_data_set": [],
            "test_data_set": [],
            "vars": [],
            "ref": [],
            "target_grid": "",
            "regrid_tool": "",
            "regrid_method": "",
            "regrid_tool_ocn": "",
            "regrid_method_ocn": "",
            "regions_specs": {},
            "regions": {},
            "regions_values": {},
            "custom_keys": {},
            "filename_template": "",
            "surface_type_land_fraction_filename_template": "",
            "generate_surface_type_land_fraction": null,
            "test_data_path": "",
            "reference_data_path": "",
            "custom_observations_path": "",
            "save_test_clims": null,
            "test_clims_interpolated_output": "",
            "metrics_output_path": "",
            "filename_output_template": "",
            "model_versions": []
        });
        let values = match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { values }
    }

    /// Defaults overlaid with the keys of a JSON object.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let parsed: Value = serde_json::from_str(text)?;
        let Value::Object(map) = parsed else {
            return Err(PmpError::Generic(
                "parameter file must contain a JSON object".to_string(),
            ));
        };
        let mut parameter = Self::new();
        for (key, value) in map {
            parameter.values.insert(key, value);
        }
        Ok(parameter)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Set `name` only when it is missing or null.
    pub fn set_default(&mut self, name: &str, value: Value) -> &mut Self {
        if self.value(name).is_null() {
            self.values.insert(name.to_string(), value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }

    fn value(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    // ---- generic checks ----

    /// Fails unless `value` is a string. Blank strings are only reported.
    pub fn check_str(value: &Value, name: &str) -> std::result::Result<(), ParameterError> {
        match value {
            Value::String(s) => {
                if s.is_empty() {
                    warn!("{name} is blank.");
                }
                Ok(())
            }
            _ => Err(wrong_type(name, "a string")),
        }
    }

    /// Fails unless `value` is a list. Members outside `allowed` are reported.
    pub fn check_str_seq_in_str_list(
        value: &Value,
        name: &str,
        allowed: &[&str],
    ) -> std::result::Result<(), ParameterError> {
        let Value::Array(items) = value else {
            return Err(wrong_type(name, "a list or tuple"));
        };
        for item in items {
            let valid = item.as_str().is_some_and(|s| allowed.contains(&s));
            if !valid {
                warn!("{} might not be a valid value in {name}.", display(item));
            }
        }
        Ok(())
    }

    /// Fails unless `value` is a string. Values outside `allowed` are reported.
    pub fn check_str_var_in_str_list(
        value: &Value,
        name: &str,
        allowed: &[&str],
    ) -> std::result::Result<(), ParameterError> {
        let Value::String(s) = value else {
            return Err(wrong_type(name, "a string"));
        };
        if !allowed.contains(&s.as_str()) {
            warn!("{s} might not be a valid value in {name}.");
        }
        Ok(())
    }

    fn check_list_not_empty(&self, name: &str, label: &str) -> std::result::Result<(), ParameterError> {
        match self.value(name) {
            Value::Array(items) => {
                if items.is_empty() {
                    error!("{label} is blank.");
                }
                Ok(())
            }
            _ => Err(wrong_type(name, "a list or tuple")),
        }
    }

    fn check_bool_set(&self, name: &str) -> std::result::Result<(), ParameterError> {
        match self.value(name) {
            Value::Null => Err(ParameterError::Unset {
                name: name.to_string(),
            }),
            Value::Bool(_) => Ok(()),
            _ => Err(wrong_type(name, "a boolean")),
        }
    }

    fn check_dict(&self, name: &str) -> std::result::Result<(), ParameterError> {
        match self.value(name) {
            Value::Object(_) => Ok(()),
            _ => Err(wrong_type(name, "a dictionary")),
        }
    }

    fn check_str_option(&self, name: &str) -> std::result::Result<(), ParameterError> {
        Self::check_str(self.value(name), name)
    }

    // ---- per-option checks ----

    pub fn check_case_id(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("case_id")
    }

    pub fn check_period(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("period")
    }

    pub fn check_realization(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("realization")
    }

    pub fn check_reference_data_set(&self) -> std::result::Result<(), ParameterError> {
        self.check_list_not_empty("reference_data_set", "data_a")
    }

    pub fn check_test_data_set(&self) -> std::result::Result<(), ParameterError> {
        self.check_list_not_empty("test_data_set", "test_data_set")
    }

    pub fn check_model_versions(&self) -> std::result::Result<(), ParameterError> {
        match self.value("model_versions") {
            Value::Array(_) => Ok(()),
            _ => Err(wrong_type("model_versions", "a list")),
        }
    }

    pub fn check_vars(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_seq_in_str_list(self.value("vars"), "vars", &known_variables())
    }

    pub fn check_ref(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_seq_in_str_list(self.value("ref"), "ref", REF_VALUES)
    }

    pub fn check_target_grid(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_var_in_str_list(self.value("target_grid"), "target_grid", TARGET_GRIDS)
    }

    pub fn check_regrid_tool(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_var_in_str_list(self.value("regrid_tool"), "regrid_tool", REGRID_TOOLS)
    }

    pub fn check_regrid_method(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_var_in_str_list(self.value("regrid_method"), "regrid_method", REGRID_METHODS)
    }

    pub fn check_regrid_tool_ocn(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_var_in_str_list(self.value("regrid_tool_ocn"), "regrid_tool_ocn", REGRID_TOOLS)
    }

    pub fn check_regrid_method_ocn(&self) -> std::result::Result<(), ParameterError> {
        Self::check_str_var_in_str_list(
            self.value("regrid_method_ocn"),
            "regrid_method_ocn",
            REGRID_METHODS,
        )
    }

    pub fn check_save_test_clims(&self) -> std::result::Result<(), ParameterError> {
        self.check_bool_set("save_test_clims")
    }

    pub fn check_generate_surface_type_land_fraction(
        &self,
    ) -> std::result::Result<(), ParameterError> {
        self.check_bool_set("generate_surface_type_land_fraction")
    }

    pub fn check_regions_specs(&self) -> std::result::Result<(), ParameterError> {
        self.check_dict("regions_specs")
    }

    pub fn check_regions(&self) -> std::result::Result<(), ParameterError> {
        self.check_dict("regions")
    }

    pub fn check_regions_values(&self) -> std::result::Result<(), ParameterError> {
        self.check_dict("regions_values")
    }

    pub fn check_custom_keys(&self) -> std::result::Result<(), ParameterError> {
        self.check_dict("custom_keys")
    }

    pub fn check_filename_template(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("filename_template")
    }

    pub fn check_surface_type_land_fraction_filename_template(
        &self,
    ) -> std::result::Result<(), ParameterError> {
        self.check_str_option("surface_type_land_fraction_filename_template")
    }

    pub fn check_test_data_path(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("test_data_path")
    }

    pub fn check_reference_data_path(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("reference_data_path")
    }

    pub fn check_custom_observations_path(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("custom_observations_path")
    }

    pub fn check_test_clims_interpolated_output(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("test_clims_interpolated_output")
    }

    pub fn check_metrics_output_path(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("metrics_output_path")
    }

    pub fn check_filename_output_template(&self) -> std::result::Result<(), ParameterError> {
        self.check_str_option("filename_output_template")
    }

    /// Run every option check, stopping at the first failure.
    pub fn check_values(&self) -> std::result::Result<(), ParameterError> {
        self.check_case_id()?;
        self.check_reference_data_set()?;
        self.check_test_data_set()?;
        self.check_period()?;
        self.check_realization()?;
        self.check_model_versions()?;
        self.check_vars()?;
        self.check_ref()?;
        self.check_target_grid()?;
        self.check_regrid_tool()?;
        self.check_regrid_method()?;
        self.check_regrid_tool_ocn()?;
        self.check_regrid_method_ocn()?;
        self.check_save_test_clims()?;
        self.check_regions_specs()?;
        self.check_regions()?;
        self.check_regions_values()?;
        self.check_custom_keys()?;
        self.check_filename_template()?;
        self.check_surface_type_land_fraction_filename_template()?;
        self.check_generate_surface_type_land_fraction()?;
        self.check_test_data_path()?;
        self.check_reference_data_path()?;
        self.check_metrics_output_path()?;
        self.check_test_clims_interpolated_output()?;
        self.check_filename_output_template()?;
        self.check_custom_observations_path()
    }

    // ---- typed accessors ----

    pub fn str_value(&self, name: &str) -> Result<String> {
        match self.value(name) {
            Value::String(s) => Ok(s.clone()),
            _ => Err(wrong_type(name, "a string").into()),
        }
    }

    /// String with a fallback when absent or null
    pub fn str_or(&self, name: &str, default: &str) -> Result<String> {
        match self.value(name) {
            Value::Null => Ok(default.to_string()),
            _ => self.str_value(name),
        }
    }

    pub fn str_list(&self, name: &str) -> Result<Vec<String>> {
        match self.value(name) {
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| wrong_type(name, "a list of strings").into())
                })
                .collect(),
            Value::String(s) => Ok(vec![s.clone()]),
            _ => Err(wrong_type(name, "a list or tuple").into()),
        }
    }

    /// A tri-state option; null is [`ParameterError::Unset`] here as in
    /// [`PmpParameter::check_values`].
    pub fn bool_flag(&self, name: &str) -> Result<bool> {
        match self.value(name) {
            Value::Null => Err(ParameterError::Unset {
                name: name.to_string(),
            }
            .into()),
            Value::Bool(b) => Ok(*b),
            _ => Err(wrong_type(name, "a boolean").into()),
        }
    }

    pub fn f64_value(&self, name: &str, default: f64) -> Result<f64> {
        match self.value(name) {
            Value::Null => Ok(default),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| wrong_type(name, "a number").into()),
            _ => Err(wrong_type(name, "a number").into()),
        }
    }

    pub fn i64_value(&self, name: &str, default: i64) -> Result<i64> {
        match self.value(name) {
            Value::Null => Ok(default),
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| wrong_type(name, "an integer").into()),
            _ => Err(wrong_type(name, "an integer").into()),
        }
    }
}

fn wrong_type(name: &str, expected: &str) -> ParameterError {
    ParameterError::WrongType {
        name: name.to_string(),
        expected: expected.to_string(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_type_checks() {
        let p = PmpParameter::new();
        assert!(p.check_case_id().is_ok());
        assert!(p.check_vars().is_ok());
        assert!(p.check_regions().is_ok());
        assert_eq!(
            p.check_save_test_clims(),
            Err(ParameterError::Unset {
                name: "save_test_clims".into()
            })
        );
    }

    #[test]
    fn overlay_keeps_unlisted_defaults() {
        let p = PmpParameter::from_json_str(r#"{"case_id": "v20240101", "vars": ["pr"]}"#).unwrap();
        assert_eq!(p.str_value("case_id").unwrap(), "v20240101");
        assert_eq!(p.str_list("vars").unwrap(), vec!["pr"]);
        assert_eq!(p.str_value("period").unwrap(), "");
    }

    #[test]
    fn dict_and_list_checks() {
        let mut p = PmpParameter::new();
        p.set("regions", json!(["global"]));
        assert!(matches!(
            p.check_regions(),
            Err(ParameterError::WrongType { .. })
        ));
        p.set("model_versions", json!("ACCESS"));
        assert!(p.check_model_versions().is_err());
        p.set("vars", json!(["pr", "not_a_var"]));
        assert!(p.check_vars().is_ok());
    }

    #[test]
    fn rejects_non_object_file() {
        assert!(PmpParameter::from_json_str("[1, 2]").is_err());
    }
}
