//! Unit tests for the public pcmdi_metrics API
//!
//! Each test exercises one building block in isolation: errors, thread pool
//! settings, parameter checks, templates, regions, seasons and statistics.

use approx::assert_relative_eq;
use ndarray::{Array1, Array2, Array3};
use pcmdi_metrics::calendar::{monthly_range, Calendar, ModelDate};
use pcmdi_metrics::parallel::{get_parallel_info, ParallelConfig};
use pcmdi_metrics::regions::{find_region, region_mask};
use pcmdi_metrics::seasons::{generate_calendar_months, season_month_numbers, MonthOutput};
use pcmdi_metrics::statistics::{cor_xy, reduce_time, rms_xy, StatOperation};
use pcmdi_metrics::template::StringConstructor;
use pcmdi_metrics::{Field, Grid, ParameterError, PmpError, PmpParameter, TimeAxis};
use serde_json::json;

fn small_grid() -> Grid {
    Grid::new(
        Array1::from(vec![-60.0, -20.0, 20.0, 60.0]),
        Array1::from(vec![0.0, 90.0, 180.0, 270.0]),
    )
}

#[test]
fn test_error_types() {
    let var_error = PmpError::VariableNotFound {
        var: "tas".to_string(),
    };
    assert_eq!(var_error.to_string(), "Variable 'tas' not found in file");

    let dim_error = PmpError::DimensionNotFound {
        var: "pr".to_string(),
        dim: "latitude".to_string(),
    };
    assert_eq!(dim_error.to_string(), "Dimension 'latitude' not found in variable 'pr'");

    let param: PmpError = ParameterError::Unset {
        name: "save_test_clims".to_string(),
    }
    .into();
    assert!(matches!(param, PmpError::Parameter(ParameterError::Unset { .. })));

    let generic: PmpError = "something went wrong".into();
    assert_eq!(generic.to_string(), "something went wrong");
}

#[test]
fn test_parallel_config() {
    assert_eq!(ParallelConfig::with_threads(4).num_threads, Some(4));
    assert_eq!(ParallelConfig::new(None).num_threads, None);
    assert!(ParallelConfig::all_cores().current_threads() >= 1);
    assert!(matches!(
        ParallelConfig::with_threads(0).setup_global_pool(),
        Err(PmpError::ThreadPool(_))
    ));
    assert!(ParallelConfig::new(None).setup_global_pool().is_ok());

    let info = get_parallel_info();
    assert!(info.available_cores >= 1);
    assert!(info.current_threads >= 1);
}

#[test]
fn test_stat_operation() {
    assert_eq!(StatOperation::Mean.as_str(), "mean");
    assert_relative_eq!(StatOperation::Sum.apply(&[1.0, f64::NAN, 2.0]), 3.0);
    assert_relative_eq!(StatOperation::Max.apply(&[1.0, 5.0, 2.0]), 5.0);
    assert!(StatOperation::Mean.apply(&[f64::NAN]).is_nan());
}

#[test]
fn test_parameter_defaults_pass_type_checks() {
    let mut parameter = PmpParameter::new();
    parameter.set("save_test_clims", json!(false));
    parameter.set("generate_surface_type_land_fraction", json!(false));
    assert!(parameter.check_values().is_ok());
}

#[test]
fn test_parameter_wrong_types() {
    let mut parameter = PmpParameter::new();
    parameter.set("case_id", json!(3));
    assert!(matches!(
        parameter.check_case_id(),
        Err(ParameterError::WrongType { ref name, .. }) if name == "case_id"
    ));

    let mut parameter = PmpParameter::new();
    parameter.set("vars", json!("tas"));
    assert!(parameter.check_vars().is_err());

    let mut parameter = PmpParameter::new();
    parameter.set("regions", json!(["global"]));
    assert!(parameter.check_regions().is_err());

    // unknown names are reported, not rejected
    let mut parameter = PmpParameter::new();
    parameter.set("vars", json!(["tas", "not_a_variable"]));
    assert!(parameter.check_vars().is_ok());
    parameter.set("regrid_tool", json!("bilinear"));
    assert!(parameter.check_regrid_tool().is_ok());
}

#[test]
fn test_parameter_unset_booleans() {
    let parameter = PmpParameter::new();
    assert_eq!(
        parameter.check_save_test_clims(),
        Err(ParameterError::Unset {
            name: "save_test_clims".to_string()
        })
    );
    assert!(parameter.check_values().is_err());
    assert!(matches!(
        parameter.bool_flag("save_test_clims"),
        Err(PmpError::Parameter(ParameterError::Unset { .. }))
    ));

    let mut parameter = parameter;
    parameter
        .set("save_test_clims", json!(true))
        .set_default("save_test_clims", json!(false))
        .set_default("generate_surface_type_land_fraction", json!(false));
    assert!(parameter.bool_flag("save_test_clims").unwrap());
    assert!(!parameter.bool_flag("generate_surface_type_land_fraction").unwrap());
}

#[test]
fn test_parameter_file_overlay() {
    let parameter = PmpParameter::from_json_str(r#"{"case_id": "v1", "vars": ["pr"], "extra": 1}"#).unwrap();
    assert_eq!(parameter.str_value("case_id").unwrap(), "v1");
    assert_eq!(parameter.str_list("vars").unwrap(), vec!["pr"]);
    assert_eq!(parameter.get("extra"), Some(&json!(1)));
    // keys missing from the file keep their defaults
    assert_eq!(parameter.get("test_data_set"), Some(&json!([])));

    assert!(PmpParameter::from_json_str("[1, 2]").is_err());
}

#[test]
fn test_template_construct_and_reverse() {
    let template = StringConstructor::new("%(variable)_%(model)_%(realization).nc");
    assert_eq!(template.keys(), vec!["variable", "model", "realization"]);

    let name = template.construct(&[("variable", "pr"), ("model", "ACCESS"), ("realization", "r1i1p1")]);
    assert_eq!(name, "pr_ACCESS_r1i1p1.nc");

    let values = template.reverse(&name).unwrap();
    assert_eq!(values["model"], "ACCESS");
    assert_eq!(values["realization"], "r1i1p1");

    let mut with_default = StringConstructor::new("%(model)/%(period)");
    with_default.set("period", "1981-2005");
    assert_eq!(with_default.construct(&[("model", "CESM2")]), "CESM2/1981-2005");
}

#[test]
fn test_region_lookup_and_mask() {
    let tropics = find_region("TROPICS", None).unwrap();
    let mask = region_mask(&small_grid(), &tropics, None).unwrap();
    assert_eq!(mask.row(0).iter().filter(|&&m| m).count(), 0);
    assert_eq!(mask.row(1).iter().filter(|&&m| m).count(), 4);

    assert!(find_region("nowhere", None).is_err());

    // land regions need a land fraction
    let land = find_region("land", None).unwrap();
    assert!(region_mask(&small_grid(), &land, None).is_err());
    let sftlf = Array2::from_shape_fn((4, 4), |(_, j)| if j < 2 { 100.0 } else { 0.0 });
    let mask = region_mask(&small_grid(), &land, Some(sftlf.view())).unwrap();
    assert!(mask[[0, 0]] && !mask[[0, 3]]);
}

#[test]
fn test_season_months() {
    assert_eq!(season_month_numbers("DJF").unwrap(), vec![12, 1, 2]);
    assert_eq!(season_month_numbers("ndjfm").unwrap(), vec![11, 12, 1, 2, 3]);
    assert_eq!(
        generate_calendar_months("JJA", MonthOutput::Abbreviations).unwrap(),
        vec!["Jun", "Jul", "Aug"]
    );
    assert!(matches!(season_month_numbers("JFA"), Err(PmpError::InvalidSeason(_))));
    assert!(season_month_numbers("JFMAMJJASONDJ").is_err());
}

#[test]
fn test_calendars() {
    let date = ModelDate::new(2001, 3, 1);
    for calendar in [Calendar::Standard, Calendar::NoLeap, Calendar::AllLeap, Calendar::Day360] {
        let ordinal = calendar.ordinal(date).unwrap();
        assert_eq!(calendar.from_ordinal(ordinal).unwrap(), date);
    }
    assert_eq!(Calendar::Day360.days_in_month(2001, 2), 30);
    assert_eq!(Calendar::AllLeap.days_in_month(2001, 2), 29);
    assert!("julian_like".parse::<Calendar>().is_err());
}

#[test]
fn test_field_shape_checked() {
    let grid = small_grid();
    let time = TimeAxis::new(monthly_range(2000, 12), Calendar::NoLeap);
    assert!(Field::new("tas", "K", grid.clone(), Some(time.clone()), Array3::zeros((12, 4, 4))).is_ok());
    assert!(matches!(
        Field::new("tas", "K", grid, Some(time), Array3::zeros((11, 4, 4))),
        Err(PmpError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_map_statistics() {
    let w = small_grid().area_weights();
    let obs = Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f64);
    let model = obs.mapv(|v| v + 2.0);

    assert_relative_eq!(rms_xy(model.view(), obs.view(), w.view()).unwrap(), 2.0, epsilon = 1e-12);
    assert_relative_eq!(cor_xy(model.view(), obs.view(), w.view()).unwrap(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_case_id_must_be_a_string() {
    for value in [json!(1), json!(2.5), json!(true), json!(null), json!(["a"]), json!({"a": 1})] {
        let mut parameter = PmpParameter::new();
        parameter.set("case_id", value.clone());
        assert!(
            matches!(parameter.check_case_id(), Err(ParameterError::WrongType { .. })),
            "{value} accepted as case_id"
        );
    }
}

#[test]
fn test_time_reduction() {
    let mut data = Array3::from_shape_fn((3, 2, 2), |(t, i, j)| (t + i + j) as f64);
    data[[1, 0, 0]] = f64::NAN;
    let mean = reduce_time(&data, StatOperation::Mean).unwrap();
    assert_relative_eq!(mean[[0, 0]], 1.0);
    assert_relative_eq!(mean[[1, 1]], 3.0);
    let max = reduce_time(&data, StatOperation::Max).unwrap();
    assert_relative_eq!(max[[0, 1]], 3.0);
}
