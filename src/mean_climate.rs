//! Mean climate metrics: model annual-cycle climatologies compared with
//! reference climatologies over named regions.

use crate::errors::{PmpError, Result};
use crate::field::Field;
use crate::netcdf_io::{read_field, read_field_at_level, read_map, NetCDFWriter};
use crate::output::{mean_climate_header, update_dict, MetricsOutput};
use crate::parameter::PmpParameter;
use crate::regions::{apply_region, find_region, region_mask, region_subset, RegionSpec};
use crate::statistics::{
    annual_mean, bias_xy, climatology_time_weights, cor_xy, mean_xy, meanabs_xy, metric_definitions,
    rms_0, rms_xy, rms_xyt, rmsc_xy, seasonal_mean, std_xy, std_xyt, zonal_mean,
};
use crate::template::StringConstructor;
use ndarray::{Array2, ArrayView2, Axis};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_REGIONS: [&str; 4] = ["global", "NHEX", "SHEX", "TROPICS"];

pub const JSON_STRUCTURE: [&str; 6] = ["model", "reference", "rip", "region", "statistic", "season"];

const DEFAULT_OUTPUT_TEMPLATE: &str =
    "%(variable)_%(target_grid_name)_%(regrid_tool)_%(regrid_method)_metrics";

/// Values the mean climate command line supplies for options a
/// parameter file leaves out.
pub const COMMAND_LINE_DEFAULTS: [(&str, bool); 2] = [
    ("save_test_clims", false),
    ("generate_surface_type_land_fraction", false),
];

const SEASONS: [&str; 4] = ["djf", "mam", "jja", "son"];

/// Format like Python's `"{:.5e}"`, e.g. `1.23457e+02`.
pub fn format_sci(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let text = format!("{value:.5e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

fn deviation_from_zonal_mean(d: ArrayView2<'_, f64>) -> Array2<f64> {
    let zm = zonal_mean(d);
    let mut out = d.to_owned();
    for (mut row, m) in out.axis_iter_mut(Axis(0)).zip(zm.iter()) {
        row.mapv_inplace(|v| v - m);
    }
    out
}

/// Spatial statistics of one pair of maps.
struct MapStats {
    bias: f64,
    rms: f64,
    rmsc: f64,
    cor: f64,
    mae: f64,
    std_obs: f64,
    std: f64,
    mean_obs: f64,
    mean: f64,
}

impl MapStats {
    fn compute(dm: ArrayView2<'_, f64>, d_o: ArrayView2<'_, f64>, w: ArrayView2<'_, f64>) -> Result<Self> {
        Ok(Self {
            bias: bias_xy(dm, d_o, w)?,
            rms: rms_xy(dm, d_o, w)?,
            rmsc: rmsc_xy(dm, d_o, w, false)?,
            cor: cor_xy(dm, d_o, w)?,
            mae: meanabs_xy(dm, d_o, w)?,
            std_obs: std_xy(d_o, w)?,
            std: std_xy(dm, w)?,
            mean_obs: mean_xy(d_o, w)?,
            mean: mean_xy(dm, w)?,
        })
    }

    fn entries(&self) -> [(&'static str, f64); 9] {
        [
            ("bias_xy", self.bias),
            ("rms_xy", self.rms),
            ("rmsc_xy", self.rmsc),
            ("cor_xy", self.cor),
            ("mae_xy", self.mae),
            ("std-obs_xy", self.std_obs),
            ("std_xy", self.std),
            ("mean-obs_xy", self.mean_obs),
            ("mean_xy", self.mean),
        ]
    }
}

fn insert(metrics: &mut Map<String, Value>, stat: &str, key: &str, value: Value) {
    if let Some(Value::Object(entry)) = metrics.get_mut(stat) {
        entry.insert(key.to_string(), value);
    }
}

/// Metrics of a model climatology `dm` against a reference `d_o`, both
/// 12-step `(time, lat, lon)` fields on the same grid.
///
/// Statistics are keyed by name (sorted); each holds `ann`, the four
/// seasons and `CalendarMonths` where applicable, as `"{:.5e}"` strings.
pub fn compute_metrics(var: &str, dm: &Field, d_o: &Field) -> Result<Map<String, Value>> {
    if dm.data.shape() != d_o.data.shape() {
        return Err(PmpError::ShapeMismatch {
            context: format!("model vs reference climatology of '{var}'"),
            left: dm.data.shape().to_vec(),
            right: d_o.data.shape().to_vec(),
        });
    }
    if dm.n_time() != 12 {
        return Err(PmpError::Statistics(format!(
            "'{var}' climatology must have 12 months, got {}",
            dm.n_time()
        )));
    }
    debug!(var, "computing mean climate metrics");

    let w = dm.grid.area_weights();
    let tw = climatology_time_weights(dm);

    let rms_xyt_v = rms_xyt(&dm.data, &d_o.data, w.view(), &tw)?;
    let std_obs_xyt = std_xyt(&d_o.data, w.view(), &tw)?;
    let std_xyt_v = std_xyt(&dm.data, w.view(), &tw)?;

    let dm_am = annual_mean(&dm.data, &tw)?;
    let do_am = annual_mean(&d_o.data, &tw)?;
    let annual = MapStats::compute(dm_am.view(), do_am.view(), w.view())?;

    let rms_y = rms_0(
        zonal_mean(dm_am.view()).view(),
        zonal_mean(do_am.view()).view(),
        dm.grid.lat_weights().view(),
    )?;
    let dm_devzm = deviation_from_zonal_mean(dm_am.view());
    let do_devzm = deviation_from_zonal_mean(do_am.view());
    let rms_devzm = rms_xy(dm_devzm.view(), do_devzm.view(), w.view())?;
    let std_obs_devzm = std_xy(do_devzm.view(), w.view())?;
    let std_devzm = std_xy(dm_devzm.view(), w.view())?;

    let mut names = vec![
        "std-obs_xy",
        "std_xy",
        "std-obs_xyt",
        "std_xyt",
        "std-obs_xy_devzm",
        "mean_xy",
        "mean-obs_xy",
        "std_xy_devzm",
        "rms_xyt",
        "rms_xy",
        "rmsc_xy",
        "cor_xy",
        "bias_xy",
        "mae_xy",
        "rms_y",
        "rms_devzm",
    ];
    names.sort_unstable();
    let mut metrics = Map::new();
    for name in names {
        metrics.insert(name.to_string(), Value::Object(Map::new()));
    }

    for (stat, value) in annual.entries() {
        insert(&mut metrics, stat, "ann", json!(format_sci(value)));
    }
    for (stat, value) in [
        ("std-obs_xyt", std_obs_xyt),
        ("std_xyt", std_xyt_v),
        ("std-obs_xy_devzm", std_obs_devzm),
        ("std_xy_devzm", std_devzm),
        ("rms_xyt", rms_xyt_v),
        ("rms_y", rms_y),
        ("rms_devzm", rms_devzm),
    ] {
        insert(&mut metrics, stat, "ann", json!(format_sci(value)));
    }

    for season in SEASONS {
        let dm_sea = seasonal_mean(&dm.data, season)?;
        let do_sea = seasonal_mean(&d_o.data, season)?;
        let stats = MapStats::compute(dm_sea.view(), do_sea.view(), w.view())?;
        for (stat, value) in stats.entries() {
            insert(&mut metrics, stat, season, json!(format_sci(value)));
        }
    }

    let mut monthly: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for month in 0..12 {
        let stats = MapStats::compute(dm.map(month), d_o.map(month), w.view())?;
        for (stat, value) in stats.entries() {
            monthly.entry(stat).or_default().push(format_sci(value));
        }
    }
    for (stat, values) in monthly {
        insert(&mut metrics, stat, "CalendarMonths", json!(values));
    }
    Ok(metrics)
}

/// Descriptions of the statistics reported by [`compute_metrics`].
pub fn metrics_definitions() -> Map<String, Value> {
    let rename = |name: &str| match name {
        "meanabs_xy" => "mae_xy".to_string(),
        other => other.to_string(),
    };
    metric_definitions()
        .into_iter()
        .filter(|(name, _)| !name.ends_with("_xyt") || *name == "rms_xyt" || *name == "std_xyt")
        .filter(|(name, _)| *name != "rms_0")
        .map(|(name, def)| (rename(name), serde_json::to_value(def).unwrap_or(Value::Null)))
        .collect()
}

/// `ta_850` is variable `ta` at 850 hPa.
pub fn split_level(var: &str) -> Result<(String, Option<f64>)> {
    match var.split_once(['_', '-']) {
        Some((name, level)) => {
            let level = level
                .parse::<f64>()
                .map_err(|_| PmpError::Generic(format!("cannot read a level from '{var}'")))?;
            Ok((name.to_string(), Some(level)))
        }
        None => Ok((var.to_string(), None)),
    }
}

/// Observation catalogue: `{var: {ref: dataset, dataset: {"template": path, ...}}}`.
struct ObsCatalogue(Value);

impl ObsCatalogue {
    fn load(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(PmpError::Generic(
                "custom_observations_path must point to an observation catalogue".into(),
            ));
        }
        Ok(Self(serde_json::from_str(&std::fs::read_to_string(path)?)?))
    }

    fn references(&self, var: &str, requested: &[String]) -> Vec<String> {
        if requested.iter().any(|r| r == "all") {
            return self.0[var]
                .as_object()
                .map(|m| {
                    m.keys()
                        .filter(|k| *k == "default" || k.contains("alternate"))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
        }
        requested.to_vec()
    }

    /// Dataset name and its catalogue entry
    fn dataset(&self, var: &str, reference: &str) -> Result<(String, Value)> {
        let name = self.0[var][reference].as_str().ok_or_else(|| {
            PmpError::Generic(format!("no reference '{reference}' for '{var}' in the catalogue"))
        })?;
        let entry = self.0[var][name].clone();
        if entry["template"].as_str().is_none() {
            return Err(PmpError::Generic(format!("catalogue entry '{name}' has no template")));
        }
        Ok((name.to_string(), entry))
    }
}

fn load_climatology(path: &Path, var: &str, level: Option<f64>) -> Result<Field> {
    match level {
        // levels are stored in Pa
        Some(hpa) => read_field_at_level(path, var, hpa * 100.0),
        None => read_field(path, var),
    }
}

fn select_region(field: &Field, spec: &RegionSpec, sftlf: Option<&Array2<f64>>) -> Result<Field> {
    let masked = if spec.value.is_some() {
        let mask = region_mask(&field.grid, spec, sftlf.map(|s| s.view()))?;
        apply_region(field, &mask)?
    } else {
        field.clone()
    };
    if spec.domain.is_some() {
        region_subset(&masked, spec)
    } else {
        Ok(masked)
    }
}

fn realizations(parameter: &PmpParameter) -> Result<Vec<String>> {
    let runs: Vec<String> = match parameter.get("realization") {
        Some(Value::Array(_)) => parameter.str_list("realization")?,
        _ => vec![parameter.str_or("realization", "")?],
    };
    let runs: Vec<String> = runs.into_iter().filter(|r| !r.trim().is_empty()).collect();
    Ok(if runs.is_empty() {
        vec!["r1i1p1".to_string()]
    } else {
        runs
    })
}

fn regions_for(parameter: &PmpParameter, var: &str) -> Vec<String> {
    parameter
        .get("regions")
        .and_then(|r| r.get(var))
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_else(|| DEFAULT_REGIONS.iter().map(|s| s.to_string()).collect())
}

/// Fill the unset tri-state options with [`COMMAND_LINE_DEFAULTS`].
/// Options given explicitly, including wrongly typed ones, are kept.
pub fn with_command_line_defaults(parameter: &PmpParameter) -> PmpParameter {
    let mut resolved = parameter.clone();
    for (name, value) in COMMAND_LINE_DEFAULTS {
        resolved.set_default(name, Value::Bool(value));
    }
    resolved
}

/// Run the mean climate metrics for every variable of `parameter`,
/// returning the paths of the JSON files written.
pub fn run(parameter: &PmpParameter) -> Result<Vec<PathBuf>> {
    let parameter = &with_command_line_defaults(parameter);
    parameter.check_values()?;

    let case_id = parameter.str_or("case_id", "")?;
    let target_grid = parameter.str_or("target_grid", "2.5x2.5")?;
    let regrid_tool = parameter.str_or("regrid_tool", "regrid2")?;
    let regrid_method = parameter.str_or("regrid_method", "linear")?;
    let test_dir = PathBuf::from(parameter.str_or("test_data_path", "")?);
    let ref_dir = PathBuf::from(parameter.str_or("reference_data_path", "")?);
    let filename_template = StringConstructor::new(parameter.str_value("filename_template")?);
    let sftlf_template = parameter.str_or("surface_type_land_fraction_filename_template", "")?;
    let save_clims = parameter.bool_flag("save_test_clims")?;
    let clims_dir = PathBuf::from(parameter.str_or("test_clims_interpolated_output", "")?);
    let output_template = match parameter.str_or("filename_output_template", "")? {
        t if t.is_empty() => DEFAULT_OUTPUT_TEMPLATE.to_string(),
        t => t,
    };
    let output_dir = PathBuf::from(
        StringConstructor::new(parameter.str_value("metrics_output_path")?).construct(&[("case_id", &case_id)]),
    );
    let custom_specs: Option<BTreeMap<String, RegionSpec>> = match parameter.get("regions_specs") {
        Some(Value::Object(m)) if !m.is_empty() => Some(serde_json::from_value(Value::Object(m.clone()))?),
        _ => None,
    };
    let catalogue = ObsCatalogue::load(Path::new(&parameter.str_or("custom_observations_path", "")?))?;
    let models = parameter.str_list("test_data_set")?;
    let runs = realizations(parameter)?;
    let requested_refs = parameter.str_list("reference_data_set")?;

    let mut written = Vec::new();
    for var in parameter.str_list("vars")? {
        let (varname, level) = split_level(&var)?;
        let regions = regions_for(parameter, &varname);
        let specs: Vec<(String, RegionSpec)> = regions
            .iter()
            .map(|r| Ok((r.clone(), find_region(r, custom_specs.as_ref())?)))
            .collect::<Result<_>>()?;
        info!(variable = %var, regions = regions.len(), "mean climate metrics");

        let mut references = Map::new();
        let mut result = json!({});
        let mut masking = Map::new();
        for (name, spec) in &specs {
            masking.insert(name.clone(), serde_json::to_value(spec)?);
        }

        for reference in catalogue.references(&varname, &requested_refs) {
            let (dataset, entry) = catalogue.dataset(&varname, &reference)?;
            let template = entry["template"].as_str().unwrap_or_default();
            let d_o = load_climatology(&ref_dir.join(template), &varname, level)?;
            references.insert(reference.clone(), entry.clone());

            for model in &models {
                update_dict(&mut result, &json!({"RESULTS": {model.as_str(): {reference.as_str(): {"source": dataset}}}}));
                let sftlf = if sftlf_template.is_empty() {
                    None
                } else {
                    let path = test_dir.join(StringConstructor::new(sftlf_template.clone()).construct(&[("model", model.as_str())]));
                    match read_map(&path, "sftlf") {
                        Ok((_, map)) => Some(map),
                        Err(e) => {
                            warn!(model = %model, "no land fraction: {e}");
                            None
                        }
                    }
                };

                for run in &runs {
                    let file = filename_template.construct(&[
                        ("variable", varname.as_str()),
                        ("model", model.as_str()),
                        ("model_version", model.as_str()),
                        ("realization", run.as_str()),
                        ("period", parameter.str_or("period", "")?.as_str()),
                        ("case_id", case_id.as_str()),
                    ]);
                    let path = test_dir.join(&file);
                    if !path.is_file() {
                        warn!(model = %model, run = %run, path = %path.display(), "test climatology not found");
                        continue;
                    }
                    let dm = match load_climatology(&path, &varname, level) {
                        Ok(f) => f,
                        Err(e) => {
                            warn!(model = %model, run = %run, "failed to load: {e}");
                            continue;
                        }
                    };
                    update_dict(
                        &mut result,
                        &json!({"RESULTS": {model.as_str(): {
                            "units": dm.units,
                            reference.as_str(): {run.as_str(): {"InputClimatologyFileName": file}},
                        }}}),
                    );

                    for (region, spec) in &specs {
                        let computed = select_region(&dm, spec, sftlf.as_ref()).and_then(|test| {
                            let refr = select_region(&d_o, spec, sftlf.as_ref())?;
                            if save_clims && Some(&reference) == requested_refs.first() {
                                let out = clims_dir.join(format!(
                                    "{var}_{model}_{run}_interpolated_{regrid_tool}_{region}_AC_{case_id}.nc"
                                ));
                                NetCDFWriter::new(&out).write_field(&test, &varname)?;
                            }
                            compute_metrics(&varname, &test, &refr)
                        });
                        match computed {
                            Ok(metrics) => update_dict(
                                &mut result,
                                &json!({"RESULTS": {model.as_str(): {reference.as_str(): {run.as_str(): {region.as_str(): metrics}}}}}),
                            ),
                            Err(e) => warn!(model = %model, run = %run, region = %region, "metrics failed: {e}"),
                        }
                    }
                }
            }
        }

        let mut payload = mean_climate_header(&varname, level, references);
        update_dict(&mut payload, &json!({"RegionalMasking": masking}));
        update_dict(&mut payload, &result);
        let name = StringConstructor::new(output_template.clone()).construct(&[
            ("variable", var.as_str()),
            ("target_grid_name", target_grid.as_str()),
            ("regrid_tool", regrid_tool.as_str()),
            ("regrid_method", regrid_method.as_str()),
            ("case_id", case_id.as_str()),
        ]);
        written.push(
            MetricsOutput::new(&output_dir, &name)
                .with_structure(&JSON_STRUCTURE)
                .write(&payload)?,
        );
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use ndarray::{Array1, Array3};

    fn clim(offset: f64) -> Field {
        let grid = Grid::new(
            Array1::from(vec![-45.0, 0.0, 45.0]),
            Array1::from(vec![0.0, 90.0, 180.0, 270.0]),
        );
        let data = Array3::from_shape_fn((12, 3, 4), |(t, i, j)| 280.0 + t as f64 + 5.0 * i as f64 + j as f64 + offset);
        Field::new("tas", "K", grid, None, data).unwrap()
    }

    #[test]
    fn python_style_exponent() {
        assert_eq!(format_sci(123.456789), "1.23457e+02");
        assert_eq!(format_sci(0.000012345), "1.23450e-05");
        assert_eq!(format_sci(0.0), "0.00000e+00");
        assert_eq!(format_sci(f64::NAN), "nan");
    }

    #[test]
    fn keys_sorted_with_seasons_and_months() {
        let metrics = compute_metrics("tas", &clim(1.0), &clim(0.0)).unwrap();
        let keys: Vec<&String> = metrics.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 16);
        assert_eq!(metrics["bias_xy"]["ann"], "1.00000e+00");
        let rmsc: f64 = metrics["rmsc_xy"]["djf"].as_str().unwrap().parse().unwrap();
        assert!(rmsc.abs() < 1e-9);
        assert_eq!(metrics["cor_xy"]["CalendarMonths"].as_array().unwrap().len(), 12);
        assert!(metrics["rms_y"].get("djf").is_none());
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let small = clim(0.0).subset(&[0, 1], &[0, 1, 2, 3]).unwrap();
        assert!(matches!(
            compute_metrics("tas", &clim(0.0), &small),
            Err(PmpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn level_from_name() {
        assert_eq!(split_level("ta_850").unwrap(), ("ta".to_string(), Some(850.0)));
        assert_eq!(split_level("zg-500").unwrap(), ("zg".to_string(), Some(500.0)));
        assert_eq!(split_level("pr").unwrap(), ("pr".to_string(), None));
    }

    #[test]
    fn command_line_defaults_fill_unset_flags() {
        let resolved = with_command_line_defaults(&PmpParameter::new());
        assert!(!resolved.bool_flag("save_test_clims").unwrap());
        assert!(resolved.check_save_test_clims().is_ok());
        assert!(resolved.check_generate_surface_type_land_fraction().is_ok());

        let mut explicit = PmpParameter::new();
        explicit.set("save_test_clims", json!(true)).set("generate_surface_type_land_fraction", json!("yes"));
        let resolved = with_command_line_defaults(&explicit);
        assert!(resolved.bool_flag("save_test_clims").unwrap());
        assert!(resolved.check_generate_surface_type_land_fraction().is_err());
    }

    #[test]
    fn definitions_include_mae() {
        let defs = metrics_definitions();
        assert!(defs.contains_key("mae_xy"));
        assert!(defs.contains_key("rms_xyt"));
        assert!(!defs.contains_key("bias_xyt"));
    }
}
