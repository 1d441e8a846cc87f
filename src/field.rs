//! Gridded fields: rectilinear grid, time axis and `(time, lat, lon)` data.

use crate::calendar::{Calendar, ModelDate};
use crate::errors::{PmpError, Result};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};

/// Rectilinear latitude/longitude grid in degrees
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub lat: Array1<f64>,
    pub lon: Array1<f64>,
}

impl Grid {
    pub fn new(lat: Array1<f64>, lon: Array1<f64>) -> Self {
        Self { lat, lon }
    }

    /// Regular global grid with cell centres, e.g. `uniform(2.5, 2.5)`.
    pub fn uniform(dlat: f64, dlon: f64) -> Self {
        let nlat = (180.0 / dlat).round() as usize;
        let nlon = (360.0 / dlon).round() as usize;
        let lat = Array1::from_iter((0..nlat).map(|i| -90.0 + dlat * (i as f64 + 0.5)));
        let lon = Array1::from_iter((0..nlon).map(|i| dlon * (i as f64 + 0.5)));
        Self { lat, lon }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    /// Latitude cell bounds from coordinate midpoints, clipped to ±90.
    pub fn lat_bounds(&self) -> Vec<(f64, f64)> {
        midpoint_bounds(&self.lat, 180.0)
            .into_iter()
            .map(|(a, b)| (a.clamp(-90.0, 90.0), b.clamp(-90.0, 90.0)))
            .collect()
    }

    pub fn lon_bounds(&self) -> Vec<(f64, f64)> {
        midpoint_bounds(&self.lon, 360.0)
    }

    /// Relative latitude weights `|sin φ_top − sin φ_bot|`
    pub fn lat_weights(&self) -> Array1<f64> {
        Array1::from_iter(
            self.lat_bounds()
                .into_iter()
                .map(|(a, b)| (b.to_radians().sin() - a.to_radians().sin()).abs()),
        )
    }

    /// `√cos φ` per latitude, the usual EOF weighting. Latitudes a rounding
    /// error beyond ±90 are treated as the pole.
    pub fn sqrt_coslat_weights(&self) -> Array1<f64> {
        self.lat.mapv(|l| l.clamp(-90.0, 90.0).to_radians().cos().abs().sqrt())
    }

    /// Cell areas on the unit sphere, `(sin φ_top − sin φ_bot)·Δλ`.
    pub fn area_weights(&self) -> Array2<f64> {
        let wlat = self.lat_weights();
        let wlon: Vec<f64> = self
            .lon_bounds()
            .into_iter()
            .map(|(a, b)| (b - a).abs().to_radians())
            .collect();
        Array2::from_shape_fn(self.shape(), |(i, j)| wlat[i] * wlon[j])
    }

    /// Index range of latitudes inside `[lo, hi]` (order-free)
    pub fn lat_indices(&self, lo: f64, hi: f64) -> Vec<usize> {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.lat
            .iter()
            .enumerate()
            .filter(|(_, &v)| v >= lo && v <= hi)
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of longitudes inside `[lo, hi]`, honouring wrap-around and
    /// either -180..180 or 0..360 conventions.
    pub fn lon_indices(&self, lo: f64, hi: f64) -> Vec<usize> {
        self.lon
            .iter()
            .enumerate()
            .filter(|(_, &v)| lon_in_range(v, lo, hi))
            .map(|(i, _)| i)
            .collect()
    }
}

/// `true` when `lon` falls inside `[lo, hi]` modulo 360.
pub fn lon_in_range(lon: f64, lo: f64, hi: f64) -> bool {
    if (hi - lo).abs() >= 360.0 {
        return true;
    }
    let width = (hi - lo).rem_euclid(360.0);
    let offset = (lon - lo).rem_euclid(360.0);
    offset <= width + 1e-9
}

fn midpoint_bounds(coord: &Array1<f64>, span: f64) -> Vec<(f64, f64)> {
    let n = coord.len();
    match n {
        0 => Vec::new(),
        1 => vec![(coord[0] - span / 2.0, coord[0] + span / 2.0)],
        _ => (0..n)
            .map(|i| {
                let lower = if i == 0 {
                    coord[0] - (coord[1] - coord[0]) / 2.0
                } else {
                    (coord[i - 1] + coord[i]) / 2.0
                };
                let upper = if i == n - 1 {
                    coord[n - 1] + (coord[n - 1] - coord[n - 2]) / 2.0
                } else {
                    (coord[i] + coord[i + 1]) / 2.0
                };
                (lower, upper)
            })
            .collect(),
    }
}

/// Decoded time coordinate
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis {
    pub dates: Vec<ModelDate>,
    pub calendar: Calendar,
}

impl TimeAxis {
    pub fn new(dates: Vec<ModelDate>, calendar: Calendar) -> Self {
        Self { dates, calendar }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn months(&self) -> Vec<u32> {
        self.dates.iter().map(|d| d.month).collect()
    }

    pub fn years(&self) -> Vec<i32> {
        self.dates.iter().map(|d| d.year).collect()
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            dates: indices.iter().map(|&i| self.dates[i]).collect(),
            calendar: self.calendar,
        }
    }
}

/// A variable on a grid, `data` is `(time, lat, lon)` with NaN for missing.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub units: String,
    pub grid: Grid,
    pub time: Option<TimeAxis>,
    pub data: Array3<f64>,
}

impl Field {
    /// # Errors
    ///
    /// Returns [`PmpError::ShapeMismatch`] if `data` does not match the grid
    /// or the time axis length.
    pub fn new(
        name: impl Into<String>,
        units: impl Into<String>,
        grid: Grid,
        time: Option<TimeAxis>,
        data: Array3<f64>,
    ) -> Result<Self> {
        let name = name.into();
        let (nlat, nlon) = grid.shape();
        let nt = time.as_ref().map_or(data.len_of(Axis(0)), TimeAxis::len);
        let expected = vec![nt, nlat, nlon];
        if data.shape() != expected.as_slice() {
            return Err(PmpError::ShapeMismatch {
                context: format!("field '{name}'"),
                left: data.shape().to_vec(),
                right: expected,
            });
        }
        Ok(Self {
            name,
            units: units.into(),
            grid,
            time,
            data,
        })
    }

    /// Single time step field from a 2-D map
    pub fn from_map(
        name: impl Into<String>,
        units: impl Into<String>,
        grid: Grid,
        map: Array2<f64>,
    ) -> Result<Self> {
        let data = map.insert_axis(Axis(0));
        Self::new(name, units, grid, None, data)
    }

    pub fn n_time(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn map(&self, t: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), t)
    }

    /// Same metadata, new data. The time axis is dropped if lengths differ.
    pub fn with_data(&self, data: Array3<f64>) -> Result<Self> {
        let time = self
            .time
            .clone()
            .filter(|t| t.len() == data.len_of(Axis(0)));
        Self::new(self.name.clone(), self.units.clone(), self.grid.clone(), time, data)
    }

    pub fn select_time(&self, indices: &[usize]) -> Result<Self> {
        let data = self.data.select(Axis(0), indices);
        let time = self.time.as_ref().map(|t| t.select(indices));
        Self::new(self.name.clone(), self.units.clone(), self.grid.clone(), time, data)
    }

    pub fn dates(&self) -> Result<&[ModelDate]> {
        self.time
            .as_ref()
            .map(|t| t.dates.as_slice())
            .ok_or_else(|| PmpError::Calendar(format!("field '{}' has no time axis", self.name)))
    }

    pub fn calendar(&self) -> Calendar {
        self.time.as_ref().map(|t| t.calendar).unwrap_or_default()
    }

    /// Time indices whose month is in `months`
    pub fn month_indices(&self, months: &[u32]) -> Result<Vec<usize>> {
        Ok(self
            .dates()?
            .iter()
            .enumerate()
            .filter(|(_, d)| months.contains(&d.month))
            .map(|(i, _)| i)
            .collect())
    }

    /// Keep time steps whose year lies in `[start, end]`; open bounds keep all.
    pub fn select_years(&self, start: Option<i32>, end: Option<i32>) -> Result<Self> {
        if start.is_none() && end.is_none() {
            return Ok(self.clone());
        }
        let indices: Vec<usize> = self
            .dates()?
            .iter()
            .enumerate()
            .filter(|(_, d)| start.map_or(true, |s| d.year >= s) && end.map_or(true, |e| d.year <= e))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(PmpError::Calendar(format!(
                "no time steps of '{}' within {start:?}-{end:?}",
                self.name
            )));
        }
        self.select_time(&indices)
    }

    /// Crop to latitude/longitude index lists
    pub fn subset(&self, lat_idx: &[usize], lon_idx: &[usize]) -> Result<Self> {
        let data = self
            .data
            .select(Axis(1), lat_idx)
            .select(Axis(2), lon_idx);
        let grid = Grid::new(
            self.grid.lat.select(Axis(0), lat_idx),
            self.grid.lon.select(Axis(0), lon_idx),
        );
        Self::new(self.name.clone(), self.units.clone(), grid, self.time.clone(), data)
    }

    /// The first time step as an owned map
    pub fn first_map(&self) -> Array2<f64> {
        self.data.slice(s![0, .., ..]).to_owned()
    }
}
