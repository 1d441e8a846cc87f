use ndarray::{Array1, Array3};
use netcdf::create;
use pcmdi_metrics::drought::{self, SpiConfig};
use pcmdi_metrics::koppen::{classify_grid, KoppenClass};
use pcmdi_metrics::monsoon::sperber::{self, SperberConfig};
use pcmdi_metrics::monsoon::wang::{self, WangConfig};
use pcmdi_metrics::netcdf_io::{read_field, NetCDFWriter};
use pcmdi_metrics::{mean_climate, PmpParameter};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::tempdir;

/// Write `var(time, lat, lon)` with a monthly time axis starting in January 2000.
fn write_monthly(path: &Path, var: &str, units: &str, lat: &[f64], lon: &[f64], data: &Array3<f64>) {
    let mut file = create(path).expect("Failed to create NetCDF file");
    let nt = data.shape()[0];
    file.add_dimension("time", nt).expect("Failed to add dimension time");
    file.add_dimension("lat", lat.len()).expect("Failed to add dimension lat");
    file.add_dimension("lon", lon.len()).expect("Failed to add dimension lon");
    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "months since 2000-01-01").unwrap();
        time.put_attribute("calendar", "noleap").unwrap();
        let values = Array1::from_iter((0..nt).map(|i| i as f64));
        time.put(values.view(), ..).unwrap();
    }
    {
        let mut v = file.add_variable::<f64>("lat", &["lat"]).unwrap();
        v.put(Array1::from(lat.to_vec()).view(), ..).unwrap();
    }
    {
        let mut v = file.add_variable::<f64>("lon", &["lon"]).unwrap();
        v.put(Array1::from(lon.to_vec()).view(), ..).unwrap();
    }
    let mut v = file.add_variable::<f64>(var, &["time", "lat", "lon"]).unwrap();
    v.put_attribute("units", units).unwrap();
    v.put_attribute("_FillValue", 1.0e20).unwrap();
    let filled = data.mapv(|x| if x.is_finite() { x } else { 1.0e20 });
    v.put(filled.view(), ..).expect("Failed to write data");
}

/// Write `var(time, lat, lon)` with a daily noleap time axis starting on 2001-01-01.
fn write_daily(path: &Path, var: &str, lat: &[f64], lon: &[f64], data: &Array3<f64>) {
    let mut file = create(path).expect("Failed to create NetCDF file");
    let nt = data.shape()[0];
    file.add_dimension("time", nt).unwrap();
    file.add_dimension("lat", lat.len()).unwrap();
    file.add_dimension("lon", lon.len()).unwrap();
    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "days since 2001-01-01").unwrap();
        time.put_attribute("calendar", "noleap").unwrap();
        time.put(Array1::from_iter((0..nt).map(|i| i as f64)).view(), ..).unwrap();
    }
    {
        let mut v = file.add_variable::<f64>("lat", &["lat"]).unwrap();
        v.put(Array1::from(lat.to_vec()).view(), ..).unwrap();
    }
    {
        let mut v = file.add_variable::<f64>("lon", &["lon"]).unwrap();
        v.put(Array1::from(lon.to_vec()).view(), ..).unwrap();
    }
    let mut v = file.add_variable::<f64>(var, &["time", "lat", "lon"]).unwrap();
    v.put_attribute("units", "mm/d").unwrap();
    v.put(data.view(), ..).expect("Failed to write data");
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_netcdf_round_trip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let input = dir.path().join("input.nc");
    let mut data = Array3::from_shape_fn((24, 2, 3), |(t, i, j)| (t * 6 + i * 3 + j) as f64);
    data[[5, 1, 2]] = f64::NAN;
    write_monthly(&input, "tas", "K", &[-30.0, 30.0], &[0.0, 120.0, 240.0], &data);

    let field = read_field(&input, "tas").unwrap();
    assert_eq!(field.data.shape(), &[24, 2, 3]);
    assert_eq!(field.units, "K");
    assert!(field.data[[5, 1, 2]].is_nan());
    let dates = field.dates().unwrap();
    assert_eq!((dates[13].year, dates[13].month), (2001, 2));

    let output = dir.path().join("nested").join("output.nc");
    NetCDFWriter::new(&output).write_field(&field, "tas").unwrap();
    let again = read_field(&output, "tas").unwrap();
    assert_eq!(again.dates().unwrap(), field.dates().unwrap());
    assert!(again.data[[5, 1, 2]].is_nan());
    assert_eq!(again.data[[23, 0, 1]], field.data[[23, 0, 1]]);

    assert!(read_field(&input, "pr").is_err());
}

#[test]
fn test_spi_driver_writes_each_scale() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("pr.nc");
    let data = Array3::from_shape_fn((240, 2, 2), |(t, i, j)| {
        40.0 + 30.0 * ((t as f64 * 0.41 + i as f64).sin() + 0.6 * (t as f64 * 1.7 + j as f64).cos()).abs()
    });
    write_monthly(&input, "pr", "mm", &[-10.0, 10.0], &[10.0, 20.0], &data);

    let config = SpiConfig {
        prd_path: input,
        scales: vec![3, 6],
        calib_start_year: Some(2000),
        calib_end_year: Some(2014),
        results_dir: dir.path().join("spi"),
        model: "obs".into(),
        ..SpiConfig::default()
    };
    let written = drought::run(&config).unwrap();
    assert_eq!(written.len(), 2);

    let spi3 = read_field(&written[0], "SPI3").unwrap();
    assert_eq!(spi3.n_time(), 240);
    assert!(spi3.data[[1, 0, 0]].is_nan());
    assert!(spi3.data.iter().filter(|v| v.is_finite()).all(|v| (-3.09..=3.09).contains(v)));
}

#[test]
fn test_koppen_from_files() {
    let dir = tempdir().unwrap();
    let tas_path = dir.path().join("tas.nc");
    let pr_path = dir.path().join("pr.nc");
    // one hot wet point, one polar point
    let tas = Array3::from_shape_fn((12, 1, 2), |(_, _, j)| if j == 0 { 300.0 } else { 250.0 });
    let pr = Array3::from_shape_fn((12, 1, 2), |(_, _, j)| if j == 0 { 250.0 } else { 5.0 });
    write_monthly(&tas_path, "tas", "K", &[0.0], &[0.0, 180.0], &tas);
    write_monthly(&pr_path, "pr", "mm", &[0.0], &[0.0, 180.0], &pr);

    let map = classify_grid(&read_field(&tas_path, "tas").unwrap(), &read_field(&pr_path, "pr").unwrap()).unwrap();
    assert_eq!(map.codes[[0, 0]], KoppenClass::Af.code());
    assert_eq!(map.codes[[0, 1]], KoppenClass::EF.code());
    assert_eq!(map.classes.len(), 2);
}

/// Observations plus one model 1.5 K warmer, and the parameter keys
/// pointing at them.
fn mean_climate_case(dir: &Path) -> Value {
    let lat = [-45.0, -15.0, 15.0, 45.0];
    let lon = [0.0, 90.0, 180.0, 270.0];
    let obs = Array3::from_shape_fn((12, 4, 4), |(t, i, j)| 270.0 + 2.0 * t as f64 + 5.0 * i as f64 + j as f64);
    let model = obs.mapv(|v| v + 1.5);
    write_monthly(&dir.join("obs_tas.nc"), "tas", "K", &lat, &lon, &obs);
    write_monthly(&dir.join("tas_ModelA_r1i1p1.nc"), "tas", "K", &lat, &lon, &model);

    let catalogue = dir.join("obs_info.json");
    std::fs::write(
        &catalogue,
        json!({"tas": {"default": "ERA5", "ERA5": {"template": "obs_tas.nc", "period": "2000-2000"}}}).to_string(),
    )
    .unwrap();

    json!({
        "case_id": "test",
        "vars": ["tas"],
        "reference_data_set": ["default"],
        "test_data_set": ["ModelA", "MissingModel"],
        "realization": "r1i1p1",
        "filename_template": "%(variable)_%(model)_%(realization).nc",
        "test_data_path": dir.display().to_string(),
        "reference_data_path": dir.display().to_string(),
        "custom_observations_path": catalogue.display().to_string(),
        "metrics_output_path": dir.join("%(case_id)").display().to_string(),
        "regions": {"tas": ["global", "TROPICS"]},
        "test_clims_interpolated_output": dir.join("clims").display().to_string(),
    })
}

#[test]
fn test_mean_climate_run() {
    let dir = tempdir().unwrap();
    let mut parameter = PmpParameter::from_json_str(&mean_climate_case(dir.path()).to_string()).unwrap();
    parameter
        .set("save_test_clims", json!(false))
        .set("generate_surface_type_land_fraction", json!(false));

    let written = mean_climate::run(&parameter).unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].starts_with(dir.path().join("test")));

    let results = read_json(&written[0]);
    assert_eq!(results["json_structure"][0], "model");
    let global = &results["RESULTS"]["ModelA"]["default"]["r1i1p1"]["global"];
    let bias: f64 = global["bias_xy"]["ann"].as_str().unwrap().parse().unwrap();
    assert!((bias - 1.5).abs() < 1e-6);
    let cor: f64 = global["cor_xy"]["djf"].as_str().unwrap().parse().unwrap();
    assert!((cor - 1.0).abs() < 1e-6);
    assert!(results["RESULTS"]["ModelA"]["default"]["r1i1p1"]["TROPICS"].is_object());
    assert!(results["RESULTS"]["MissingModel"]["default"].get("r1i1p1").is_none());
}

#[test]
fn test_mean_climate_file_without_boolean_options() {
    let dir = tempdir().unwrap();
    let param_file = dir.path().join("param.json");
    std::fs::write(&param_file, mean_climate_case(dir.path()).to_string()).unwrap();

    let parameter = PmpParameter::from_file(&param_file).unwrap();
    assert!(parameter.check_save_test_clims().is_err());

    // unset flags run with the command line defaults: no climatologies saved
    let written = mean_climate::run(&parameter).unwrap();
    assert_eq!(written.len(), 1);
    let results = read_json(&written[0]);
    assert!(results["RESULTS"]["ModelA"]["default"]["r1i1p1"]["global"].is_object());
    assert!(!dir.path().join("clims").exists());

    let mut wrong = parameter.clone();
    wrong.set("save_test_clims", json!("false"));
    assert!(mean_climate::run(&wrong).is_err());
}

#[test]
fn test_mean_climate_rejects_invalid_parameters() {
    let mut parameter = PmpParameter::new();
    parameter.set("case_id", json!(["not", "a", "string"]));
    assert!(mean_climate::run(&parameter).is_err());
}

#[test]
fn test_monsoon_wang_run() {
    let dir = tempdir().unwrap();
    let lat: Vec<f64> = (0..18).map(|i| -85.0 + 10.0 * i as f64).collect();
    let lon: Vec<f64> = (0..36).map(|j| 5.0 + 10.0 * j as f64).collect();
    let clim = |amp: f64| {
        Array3::from_shape_fn((12, 18, 36), |(t, i, j)| {
            let phase = (t as f64 / 12.0 * std::f64::consts::TAU).cos();
            let hemisphere = if lat[i] > 0.0 { -1.0 } else { 1.0 };
            3.0 + amp * hemisphere * phase * (1.0 + 0.1 * (j % 5) as f64)
        })
    };
    write_monthly(&dir.path().join("obs_pr.nc"), "pr", "mm/day", &lat, &lon, &clim(2.5));
    write_monthly(&dir.path().join("ModelA_pr.nc"), "pr", "mm/day", &lat, &lon, &clim(2.0));

    let config = WangConfig {
        test_data_path: dir.path().join("%(model)_%(variable).nc").display().to_string(),
        reference_data_path: dir.path().join("obs_pr.nc"),
        modnames: vec!["ModelA".into(), "Absent".into()],
        results_dir: dir.path().join("wang"),
        ..WangConfig::default()
    };
    let metrics = wang::run(&config).unwrap();
    let cor: f64 = metrics["RESULTS"]["ModelA"]["AllMW"]["cor"].as_str().unwrap().parse().unwrap();
    assert!(cor > 0.9);
    assert!(metrics["RESULTS"].get("Absent").is_none());
    assert!(dir.path().join("wang").join("monsoon_wang.json").is_file());
}

#[test]
fn test_monsoon_sperber_run() {
    let dir = tempdir().unwrap();
    let lat = [-15.0, 15.0];
    let lon = [75.0, 135.0];
    // northern rain peaks in mid July, southern on January 1
    let rain = |scale: f64| {
        Array3::from_shape_fn((365 * 3, 2, 2), |(t, i, j)| {
            let peak = if lat[i] > 0.0 { 196.0 } else { 0.0 };
            let phase = ((t % 365) as f64 - peak) / 365.0 * std::f64::consts::TAU;
            1.0 + scale * phase.cos().max(0.0) + 0.2 * j as f64
        })
    };
    write_daily(&dir.path().join("obs_pr.nc"), "pr", &lat, &lon, &rain(8.0));
    write_daily(&dir.path().join("pr_ModelA_r1.nc"), "pr", &lat, &lon, &rain(6.0));
    let sftlf = Array3::from_elem((1, 2, 2), 100.0);
    write_monthly(&dir.path().join("sftlf_obs.nc"), "sftlf", "%", &lat, &lon, &sftlf);

    let config = SperberConfig {
        reference_data_name: "GPCP".into(),
        reference_data_path: dir.path().join("obs_pr.nc"),
        reference_data_lf_path: Some(dir.path().join("sftlf_obs.nc")),
        modpath: dir.path().join("pr_%(model)_%(realization).nc").display().to_string(),
        modnames: vec!["ModelA".into(), "Absent".into()],
        realization: "r1".into(),
        list_monsoon_regions: vec!["AIR".into(), "AUS".into()],
        results_dir: dir.path().join("%(output_type)").display().to_string(),
        ..SperberConfig::default()
    };
    let metrics = sperber::run(&config).unwrap();

    let air = &metrics["REF"]["GPCP"]["AIR"];
    let onset = air["onset_index"].as_u64().unwrap();
    let decay = air["decay_index"].as_u64().unwrap();
    assert!(onset < 39 && decay > 39, "AIR onset {onset} decay {decay}");
    assert_eq!(air["duration"].as_u64().unwrap(), decay - onset + 1);

    let model = &metrics["RESULTS"]["ModelA"]["r1"];
    for region in ["AIR", "AUS"] {
        assert!(model[region]["cor"].as_f64().unwrap() > 0.99);
        assert!(model[region]["rmsn"].as_f64().unwrap() < 0.2);
    }
    assert!(metrics["RESULTS"].get("Absent").is_none());

    let json_file = dir
        .path()
        .join("metrics_results")
        .join("monsoon_sperber_stat_cmip6_historical_da_atm_all-all.json");
    assert_eq!(read_json(&json_file)["json_structure"][2], "monsoon_region");
    assert!(dir
        .path()
        .join("diagnostic_results")
        .join("cmip6_ModelA_historical_r1_monsoon_sperber_2001-2003.nc")
        .is_file());
}
