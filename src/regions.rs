//! Named analysis regions and masking.

use crate::errors::{PmpError, Result};
use crate::field::{Field, Grid};
use ndarray::{Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Land fraction (percent) at or above which a cell counts as land.
pub const LAND_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<(f64, f64)>,
}

/// A region: optional lat/lon box plus an optional surface type
/// (`value` 100 for land, 0 for ocean).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
}

impl RegionSpec {
    fn boxed(lat: (f64, f64), lon: Option<(f64, f64)>) -> Self {
        Self {
            value: None,
            domain: Some(Domain {
                latitude: Some(lat),
                longitude: lon,
            }),
        }
    }

    fn surface(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    fn latitude(&self) -> Option<(f64, f64)> {
        self.domain.as_ref().and_then(|d| d.latitude)
    }

    fn longitude(&self) -> Option<(f64, f64)> {
        self.domain.as_ref().and_then(|d| d.longitude)
    }
}

/// The default region table.
pub fn load_regions_specs() -> BTreeMap<String, RegionSpec> {
    let lat = |a, b| RegionSpec::boxed((a, b), None);
    let latlon = |a, b, c, d| RegionSpec::boxed((a, b), Some((c, d)));
    let conus = latlon(24.7, 49.4, -124.78, -66.92);

    let table = [
        // mean climate
        ("global", RegionSpec::default()),
        ("NHEX", lat(30.0, 90.0)),
        ("SHEX", lat(-90.0, -30.0)),
        ("TROPICS", lat(-30.0, 30.0)),
        ("90S50S", lat(-90.0, -50.0)),
        ("50S20S", lat(-50.0, -20.0)),
        ("20S20N", lat(-20.0, 20.0)),
        ("20N50N", lat(20.0, 50.0)),
        ("50N90N", lat(50.0, 90.0)),
        ("CONUS", conus.clone()),
        ("land", RegionSpec::default().surface(100.0)),
        ("land_NHEX", lat(30.0, 90.0).surface(100.0)),
        ("land_SHEX", lat(-90.0, -30.0).surface(100.0)),
        ("land_TROPICS", lat(-30.0, 30.0).surface(100.0)),
        ("land_CONUS", conus.surface(100.0)),
        ("ocean", RegionSpec::default().surface(0.0)),
        ("ocean_NHEX", lat(30.0, 90.0).surface(0.0)),
        ("ocean_SHEX", lat(-90.0, -30.0).surface(0.0)),
        ("ocean_TROPICS", lat(-30.0, 30.0).surface(0.0)),
        ("ocean_50S50N", lat(-50.0, 50.0).surface(0.0)),
        ("ocean_50S20S", lat(-50.0, -20.0).surface(0.0)),
        ("ocean_20S20N", lat(-20.0, 20.0).surface(0.0)),
        ("ocean_20N50N", lat(20.0, 50.0).surface(0.0)),
        // modes of variability
        ("NAM", latlon(20.0, 90.0, -180.0, 180.0)),
        ("NAO", latlon(20.0, 80.0, -90.0, 40.0)),
        ("SAM", latlon(-20.0, -90.0, 0.0, 360.0)),
        ("PSA1", latlon(-20.0, -90.0, 0.0, 360.0)),
        ("PSA2", latlon(-20.0, -90.0, 0.0, 360.0)),
        ("PNA", latlon(20.0, 85.0, 120.0, 240.0)),
        ("NPO", latlon(20.0, 85.0, 120.0, 240.0)),
        ("PDO", latlon(20.0, 70.0, 110.0, 260.0)),
        ("NPGO", latlon(20.0, 70.0, 110.0, 260.0)),
        ("AMO", latlon(0.0, 70.0, -80.0, 0.0)),
        // monsoon (Wang)
        ("AllMW", latlon(-40.0, 45.0, 0.0, 360.0)),
        ("AllM", latlon(-45.0, 45.0, 0.0, 360.0)),
        ("NAMM", latlon(0.0, 45.0, 210.0, 310.0)),
        ("SAMM", latlon(-45.0, 0.0, 240.0, 330.0)),
        ("NAFM", latlon(0.0, 45.0, -50.0, 60.0)),
        ("SAFM", latlon(-45.0, 0.0, 0.0, 90.0)),
        ("ASM", latlon(0.0, 45.0, 60.0, 180.0)),
        ("AUSM", latlon(-45.0, 0.0, 90.0, 160.0)),
        // monsoon (Sperber)
        ("AIR", latlon(7.0, 25.0, 65.0, 85.0)),
        ("AUS", latlon(-20.0, -10.0, 120.0, 150.0)),
        ("Sahel", latlon(13.0, 18.0, -10.0, 10.0)),
        ("GoG", latlon(0.0, 5.0, -10.0, 10.0)),
        ("NAmo", latlon(20.0, 37.0, -112.0, -103.0)),
        ("SAmo", latlon(-20.0, 2.5, -65.0, -40.0)),
    ];

    table
        .into_iter()
        .map(|(name, spec)| (name.to_string(), spec))
        .collect()
}

/// Look up a region, preferring user-supplied specs over the defaults.
pub fn find_region(name: &str, custom: Option<&BTreeMap<String, RegionSpec>>) -> Result<RegionSpec> {
    custom
        .and_then(|c| c.get(name).cloned())
        .or_else(|| load_regions_specs().remove(name))
        .ok_or_else(|| PmpError::Generic(format!("region '{name}' is not defined")))
}

/// Cells inside the region. `sftlf` (percent or fraction) is required for
/// land/ocean regions.
pub fn region_mask(
    grid: &Grid,
    spec: &RegionSpec,
    sftlf: Option<ArrayView2<'_, f64>>,
) -> Result<Array2<bool>> {
    let (nlat, nlon) = grid.shape();
    let lat_ok: Vec<bool> = match spec.latitude() {
        Some((a, b)) => {
            let (lo, hi) = (a.min(b), a.max(b));
            grid.lat.iter().map(|&v| v >= lo && v <= hi).collect()
        }
        None => vec![true; nlat],
    };
    let lon_ok: Vec<bool> = match spec.longitude() {
        Some((a, b)) => grid
            .lon
            .iter()
            .map(|&v| crate::field::lon_in_range(v, a, b))
            .collect(),
        None => vec![true; nlon],
    };

    let mut mask = Array2::from_shape_fn((nlat, nlon), |(i, j)| lat_ok[i] && lon_ok[j]);

    if let Some(value) = spec.value {
        let sftlf = sftlf.ok_or_else(|| {
            PmpError::Generic("land/sea region requested without a land fraction (sftlf)".into())
        })?;
        if sftlf.shape() != mask.shape() {
            return Err(PmpError::ShapeMismatch {
                context: "sftlf vs grid".into(),
                left: sftlf.shape().to_vec(),
                right: mask.shape().to_vec(),
            });
        }
        let scale = if sftlf.iter().copied().filter(|v| v.is_finite()).fold(0.0, f64::max) <= 1.0 {
            100.0
        } else {
            1.0
        };
        let want_land = value >= LAND_THRESHOLD;
        Zip::from(&mut mask).and(&sftlf).for_each(|m, &frac| {
            let is_land = frac * scale >= LAND_THRESHOLD;
            *m = *m && frac.is_finite() && is_land == want_land;
        });
    }

    Ok(mask)
}

/// Set every point outside `mask` to NaN.
pub fn apply_region(field: &Field, mask: &Array2<bool>) -> Result<Field> {
    if field.data.shape()[1..] != *mask.shape() {
        return Err(PmpError::ShapeMismatch {
            context: format!("region mask for '{}'", field.name),
            left: field.data.shape()[1..].to_vec(),
            right: mask.shape().to_vec(),
        });
    }
    let mut data = field.data.clone();
    for mut map in data.axis_iter_mut(Axis(0)) {
        Zip::from(&mut map).and(mask).for_each(|v, &keep| {
            if !keep {
                *v = f64::NAN;
            }
        });
    }
    field.with_data(data)
}

/// Crop the field to the bounding box of the region's domain.
pub fn region_subset(field: &Field, spec: &RegionSpec) -> Result<Field> {
    let lat_idx = match spec.latitude() {
        Some((a, b)) => field.grid.lat_indices(a, b),
        None => (0..field.grid.lat.len()).collect(),
    };
    let lon_idx = match spec.longitude() {
        Some((a, b)) => field.grid.lon_indices(a, b),
        None => (0..field.grid.lon.len()).collect(),
    };
    if lat_idx.is_empty() || lon_idx.is_empty() {
        return Err(PmpError::Generic(format!(
            "region domain {:?} does not overlap the grid of '{}'",
            spec.domain, field.name
        )));
    }
    field.subset(&lat_idx, &lon_idx)
}
