//! NetCDF reading and writing of gridded fields.
//!
//! Reading resolves the time/latitude/longitude dimensions by name, turns
//! `_FillValue`/`missing_value` into NaN and decodes the time axis with the
//! file's `units` and `calendar`. Writing produces CF-style files with
//! coordinate variables, copied attributes and a `history` stamp.

use crate::calendar::{decode_time, Calendar, ModelDate};
use crate::errors::{PmpError, Result};
use crate::field::{Field, Grid, TimeAxis};
use chrono::Utc;
use ndarray::{Array1, Array3, ArrayD, IxDyn};
use netcdf::{create, AttributeValue, File, Variable};
use std::{fs, path::Path};
use tracing::{debug, warn};

/// Fill value used for NaN on output
pub const FILL_VALUE: f64 = 1.0e20;

const TIME_KEYS: &[&str] = &["time", "t", "TIME"];
const LAT_KEYS: &[&str] = &["lat", "latitude", "y", "nav_lat", "LAT"];
const LON_KEYS: &[&str] = &["lon", "longitude", "x", "nav_lon", "LON"];
const LEVEL_KEYS: &[&str] = &["plev", "lev", "level", "pressure", "depth"];

fn find_key(names: &[String], keys: &[&str]) -> Option<usize> {
    names.iter().position(|n| keys.contains(&n.as_str()))
}

/// Numeric attribute as f64
fn attribute_f64(var: &Variable<'_>, name: &str) -> Option<f64> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|&x| f64::from(x)),
        _ => None,
    }
}

fn attribute_str(var: &Variable<'_>, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn read_coordinate(file: &File, name: &str, len: usize) -> Result<Array1<f64>> {
    match file.variable(name) {
        Some(var) => Ok(Array1::from(var.get_values::<f64, _>(..)?)),
        None => {
            warn!(dimension = name, "no coordinate variable, using indices");
            Ok(Array1::from_iter((0..len).map(|i| i as f64)))
        }
    }
}

fn read_time_axis(file: &File, name: &str) -> Result<Option<TimeAxis>> {
    let Some(var) = file.variable(name) else {
        return Ok(None);
    };
    let values = var.get_values::<f64, _>(..)?;
    let Some(units) = attribute_str(&var, "units") else {
        warn!(variable = name, "time variable has no units");
        return Ok(None);
    };
    let calendar = match attribute_str(&var, "calendar") {
        Some(c) => c.parse::<Calendar>()?,
        None => Calendar::Standard,
    };
    let dates = decode_time(&values, &units, calendar)?;
    Ok(Some(TimeAxis::new(dates, calendar)))
}

/// Read `var_name` from a NetCDF file as a `(time, lat, lon)` field.
///
/// # Errors
///
/// Fails when the variable or its latitude/longitude dimensions are missing,
/// or when it has a vertical dimension (use [`read_field_at_level`]).
pub fn read_field(path: &Path, var_name: &str) -> Result<Field> {
    read_field_impl(path, var_name, None)
}

/// Like [`read_field`] but selects the vertical level closest to `level`.
pub fn read_field_at_level(path: &Path, var_name: &str, level: f64) -> Result<Field> {
    read_field_impl(path, var_name, Some(level))
}

fn read_field_impl(path: &Path, var_name: &str, level: Option<f64>) -> Result<Field> {
    let file = netcdf::open(path)?;
    let var = file
        .variable(var_name)
        .ok_or_else(|| PmpError::VariableNotFound {
            var: var_name.to_string(),
        })?;

    let names: Vec<String> = var
        .dimensions()
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let missing_dim = |dim: &str| PmpError::DimensionNotFound {
        var: var_name.to_string(),
        dim: dim.to_string(),
    };
    let lat_axis = find_key(&names, LAT_KEYS).ok_or_else(|| missing_dim("latitude"))?;
    let lon_axis = find_key(&names, LON_KEYS).ok_or_else(|| missing_dim("longitude"))?;
    let time_axis = find_key(&names, TIME_KEYS);
    let level_axis = find_key(&names, LEVEL_KEYS);

    let mut data = ArrayD::from_shape_vec(IxDyn(&shape), var.get_values::<f64, _>(..)?)?;

    if let Some(axis) = level_axis {
        let target = level.ok_or_else(|| {
            PmpError::Generic(format!(
                "variable '{var_name}' has a vertical dimension; a level must be selected"
            ))
        })?;
        let levels = read_coordinate(&file, &names[axis], shape[axis])?;
        let index = levels
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
            .map(|(i, _)| i)
            .ok_or_else(|| missing_dim("level"))?;
        debug!(level = levels[index], index, "selected vertical level");
        data = data.index_axis_move(ndarray::Axis(axis), index);
    }

    let mut axes = Vec::with_capacity(3);
    let mut remaining: Vec<usize> = [time_axis, Some(lat_axis), Some(lon_axis)]
        .into_iter()
        .flatten()
        .collect();
    // Axes shift down by one once the level axis is removed.
    if let Some(level_axis) = level_axis {
        for a in &mut remaining {
            if *a > level_axis {
                *a -= 1;
            }
        }
    }
    axes.extend(remaining);
    if axes.len() != data.ndim() {
        return Err(PmpError::Generic(format!(
            "variable '{var_name}' has unsupported dimensions {names:?}"
        )));
    }
    let mut data = data.permuted_axes(IxDyn(&axes));
    if time_axis.is_none() {
        data = data.insert_axis(ndarray::Axis(0));
    }
    let data: Array3<f64> = data.as_standard_layout().to_owned().into_dimensionality()?;

    let fill = attribute_f64(&var, "_FillValue").or_else(|| attribute_f64(&var, "missing_value"));
    let data = data.mapv(|v| match fill {
        Some(f) if (v - f).abs() <= f.abs() * 1e-6 => f64::NAN,
        _ if v.abs() >= 1e19 => f64::NAN,
        _ => v,
    });

    let lat = read_coordinate(&file, &names[lat_axis], shape[lat_axis])?;
    let lon = read_coordinate(&file, &names[lon_axis], shape[lon_axis])?;
    let time = match time_axis {
        Some(axis) => read_time_axis(&file, &names[axis])?,
        None => None,
    };
    let units = attribute_str(&var, "units").unwrap_or_default();

    debug!(
        variable = var_name,
        shape = ?data.shape(),
        path = %path.display(),
        "read field"
    );
    Field::new(var_name, units, Grid::new(lat, lon), time, data)
}

/// Read a 2-D map (e.g. land fraction), taking the first time step if any.
pub fn read_map(path: &Path, var_name: &str) -> Result<(Grid, ndarray::Array2<f64>)> {
    let field = read_field(path, var_name)?;
    Ok((field.grid.clone(), field.first_map()))
}

/// Writer for fields and maps, optionally copying attributes of a source variable.
pub struct NetCDFWriter<'a> {
    source: Option<(&'a File, &'a str)>,
    output_path: &'a Path,
}

impl<'a> NetCDFWriter<'a> {
    pub fn new(output_path: &'a Path) -> Self {
        Self {
            source: None,
            output_path,
        }
    }

    /// Copy attributes of `var_name` in `file` onto written variables.
    pub fn with_source(mut self, file: &'a File, var_name: &'a str) -> Self {
        self.source = Some((file, var_name));
        self
    }

    /// Write `field` as `var_name(time, lat, lon)`, or `(lat, lon)` when it
    /// has no time axis and a single step.
    pub fn write_field(&self, field: &Field, var_name: &str) -> Result<()> {
        if self.output_path.exists() {
            fs::remove_file(self.output_path)?;
        }
        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = create(self.output_path)?;
        let (nlat, nlon) = field.grid.shape();
        let with_time = field.time.is_some() || field.n_time() > 1;

        file.add_dimension("lat", nlat)?;
        file.add_dimension("lon", nlon)?;
        if with_time {
            file.add_dimension("time", field.n_time())?;
        }

        {
            let mut lat = file.add_variable::<f64>("lat", &["lat"])?;
            lat.put_attribute("units", "degrees_north")?;
            lat.put_attribute("axis", "Y")?;
            lat.put(field.grid.lat.view(), ..)?;
        }
        {
            let mut lon = file.add_variable::<f64>("lon", &["lon"])?;
            lon.put_attribute("units", "degrees_east")?;
            lon.put_attribute("axis", "X")?;
            lon.put(field.grid.lon.view(), ..)?;
        }
        if with_time {
            let calendar = field.calendar();
            let values = match &field.time {
                Some(t) => encode_days(&t.dates, calendar)?,
                None => Array1::from_iter((0..field.n_time()).map(|i| i as f64)),
            };
            let mut time = file.add_variable::<f64>("time", &["time"])?;
            time.put_attribute("units", "days since 0001-01-01 00:00:00")?;
            time.put_attribute("calendar", calendar.as_str())?;
            time.put_attribute("axis", "T")?;
            time.put(values.view(), ..)?;
        }

        let filled = field.data.mapv(|v| if v.is_finite() { v } else { FILL_VALUE });
        let dims: &[&str] = if with_time {
            &["time", "lat", "lon"]
        } else {
            &["lat", "lon"]
        };
        let mut var = file.add_variable::<f64>(var_name, dims)?;
        var.put_attribute("_FillValue", FILL_VALUE)?;
        if with_time {
            var.put(filled.view(), ..)?;
        } else {
            var.put(filled.index_axis(ndarray::Axis(0), 0), ..)?;
        }
        if !field.units.is_empty() {
            var.put_attribute("units", field.units.as_str())?;
        }

        if let Some((source, source_name)) = self.source {
            let orig = source
                .variable(source_name)
                .ok_or_else(|| PmpError::VariableNotFound {
                    var: source_name.to_string(),
                })?;
            for attr in orig
                .attributes()
                .filter(|a| a.name() != "_FillValue" && a.name() != "missing_value")
            {
                match attr.value()? {
                    AttributeValue::Str(val) => {
                        var.put_attribute(attr.name(), val)?;
                    }
                    AttributeValue::Strs(vals) => {
                        var.put_attribute(attr.name(), vals)?;
                    }
                    AttributeValue::Float(val) => {
                        var.put_attribute(attr.name(), val)?;
                    }
                    AttributeValue::Floats(vals) => {
                        var.put_attribute(attr.name(), vals)?;
                    }
                    AttributeValue::Double(val) => {
                        var.put_attribute(attr.name(), val)?;
                    }
                    AttributeValue::Doubles(vals) => {
                        var.put_attribute(attr.name(), vals)?;
                    }
                    AttributeValue::Int(val) => {
                        var.put_attribute(attr.name(), val)?;
                    }
                    AttributeValue::Ints(vals) => {
                        var.put_attribute(attr.name(), vals)?;
                    }
                    AttributeValue::Short(val) => {
                        var.put_attribute(attr.name(), val)?;
                    }
                    AttributeValue::Shorts(vals) => {
                        var.put_attribute(attr.name(), vals)?;
                    }
                    _ => {
                        warn!(attribute = attr.name(), "skipped unsupported attribute type");
                    }
                }
            }
        }

        file.add_attribute(
            "history",
            format!("Created by pcmdi_metrics on {}", Utc::now().to_rfc3339()),
        )?;

        debug!(variable = var_name, path = %self.output_path.display(), "wrote field");
        Ok(())
    }
}

impl NetCDFWriter<'_> {
    /// Write several `(lat, lon)` maps sharing one grid into a single file.
    pub fn write_maps(&self, grid: &Grid, maps: &[(&str, ndarray::ArrayView2<'_, f64>)]) -> Result<()> {
        if self.output_path.exists() {
            fs::remove_file(self.output_path)?;
        }
        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = create(self.output_path)?;
        let (nlat, nlon) = grid.shape();
        file.add_dimension("lat", nlat)?;
        file.add_dimension("lon", nlon)?;
        {
            let mut lat = file.add_variable::<f64>("lat", &["lat"])?;
            lat.put_attribute("units", "degrees_north")?;
            lat.put(grid.lat.view(), ..)?;
        }
        {
            let mut lon = file.add_variable::<f64>("lon", &["lon"])?;
            lon.put_attribute("units", "degrees_east")?;
            lon.put(grid.lon.view(), ..)?;
        }
        for (name, map) in maps {
            if map.dim() != (nlat, nlon) {
                return Err(PmpError::ShapeMismatch {
                    context: format!("map {name}"),
                    left: map.shape().to_vec(),
                    right: vec![nlat, nlon],
                });
            }
            let filled = map.mapv(|v| if v.is_finite() { v } else { FILL_VALUE });
            let mut var = file.add_variable::<f64>(name, &["lat", "lon"])?;
            var.put_attribute("_FillValue", FILL_VALUE)?;
            var.put(filled.view(), ..)?;
        }
        file.add_attribute(
            "history",
            format!("Created by pcmdi_metrics on {}", Utc::now().to_rfc3339()),
        )?;
        debug!(maps = maps.len(), path = %self.output_path.display(), "wrote maps");
        Ok(())
    }
}

impl NetCDFWriter<'_> {
    /// Write equal-length 1-D series along a single dimension `dim`.
    pub fn write_series(&self, dim: &str, units: &str, series: &[(&str, &[f64])]) -> Result<()> {
        let len = series.first().map_or(0, |(_, s)| s.len());
        if let Some((name, s)) = series.iter().find(|(_, s)| s.len() != len) {
            return Err(PmpError::ShapeMismatch {
                context: format!("series {name}"),
                left: vec![s.len()],
                right: vec![len],
            });
        }
        if self.output_path.exists() {
            fs::remove_file(self.output_path)?;
        }
        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = create(self.output_path)?;
        file.add_dimension(dim, len)?;
        for (name, values) in series {
            let filled = Array1::from_iter(values.iter().map(|&v| if v.is_finite() { v } else { FILL_VALUE }));
            let mut var = file.add_variable::<f64>(name, &[dim])?;
            var.put_attribute("units", units)?;
            var.put_attribute("_FillValue", FILL_VALUE)?;
            var.put(filled.view(), ..)?;
        }
        file.add_attribute(
            "history",
            format!("Created by pcmdi_metrics on {}", Utc::now().to_rfc3339()),
        )?;
        debug!(series = series.len(), path = %self.output_path.display(), "wrote series");
        Ok(())
    }
}

fn encode_days(dates: &[ModelDate], calendar: Calendar) -> Result<Array1<f64>> {
    dates
        .iter()
        .map(|&d| calendar.ordinal(d).map(|o| o as f64))
        .collect::<Result<Vec<_>>>()
        .map(Array1::from)
}
