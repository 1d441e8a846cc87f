//! Köppen-Geiger climate classification from monthly climatologies of
//! near-surface temperature and precipitation.
//!
//! Each climate group (tropical, desert, temperate, continental, polar) is
//! tested independently; within a group the last matching sub-type wins and
//! the groups are combined with priority
//! tropical > desert > temperate > continental > polar.

use crate::errors::{PmpError, Result};
use crate::field::{Field, Grid};
use crate::statistics::map_grid_points_scalar;
use ndarray::{concatenate, Array2, Axis};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KoppenClass {
    Undefined,
    Af,
    Am,
    Aw,
    BWh,
    BWk,
    BSh,
    BSk,
    Cfa,
    Cfb,
    Cfc,
    Cwa,
    Cwb,
    Cwc,
    Csa,
    Csb,
    Csc,
    Dfa,
    Dfb,
    Dfc,
    Dfd,
    Dwa,
    Dwb,
    Dwc,
    Dwd,
    Dsa,
    Dsb,
    Dsc,
    Dsd,
    ET,
    EF,
}

impl KoppenClass {
    pub const ALL: [KoppenClass; 31] = [
        Self::Undefined,
        Self::Af,
        Self::Am,
        Self::Aw,
        Self::BWh,
        Self::BWk,
        Self::BSh,
        Self::BSk,
        Self::Cfa,
        Self::Cfb,
        Self::Cfc,
        Self::Cwa,
        Self::Cwb,
        Self::Cwc,
        Self::Csa,
        Self::Csb,
        Self::Csc,
        Self::Dfa,
        Self::Dfb,
        Self::Dfc,
        Self::Dfd,
        Self::Dwa,
        Self::Dwb,
        Self::Dwc,
        Self::Dwd,
        Self::Dsa,
        Self::Dsb,
        Self::Dsc,
        Self::Dsd,
        Self::ET,
        Self::EF,
    ];

    /// Numeric group code, `group.subtype`
    pub fn code(self) -> f64 {
        match self {
            Self::Undefined => 0.0,
            Self::Af => 1.1,
            Self::Am => 1.2,
            Self::Aw => 1.3,
            Self::BWh => 2.1,
            Self::BWk => 2.2,
            Self::BSh => 2.3,
            Self::BSk => 2.4,
            Self::Cfa => 3.1,
            Self::Cfb => 3.2,
            Self::Cfc => 3.3,
            Self::Cwa => 3.4,
            Self::Cwb => 3.5,
            Self::Cwc => 3.6,
            Self::Csa => 3.7,
            Self::Csb => 3.8,
            Self::Csc => 3.9,
            Self::Dfa => 4.11,
            Self::Dfb => 4.12,
            Self::Dfc => 4.13,
            Self::Dfd => 4.14,
            Self::Dwa => 4.15,
            Self::Dwb => 4.16,
            Self::Dwc => 4.17,
            Self::Dwd => 4.18,
            Self::Dsa => 4.19,
            Self::Dsb => 4.2,
            Self::Dsc => 4.21,
            Self::Dsd => 4.22,
            Self::ET => 5.1,
            Self::EF => 5.2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Af => "Af",
            Self::Am => "Am",
            Self::Aw => "Aw",
            Self::BWh => "BWh",
            Self::BWk => "BWk",
            Self::BSh => "BSh",
            Self::BSk => "BSk",
            Self::Cfa => "Cfa",
            Self::Cfb => "Cfb",
            Self::Cfc => "Cfc",
            Self::Cwa => "Cwa",
            Self::Cwb => "Cwb",
            Self::Cwc => "Cwc",
            Self::Csa => "Csa",
            Self::Csb => "Csb",
            Self::Csc => "Csc",
            Self::Dfa => "Dfa",
            Self::Dfb => "Dfb",
            Self::Dfc => "Dfc",
            Self::Dfd => "Dfd",
            Self::Dwa => "Dwa",
            Self::Dwb => "Dwb",
            Self::Dwc => "Dwc",
            Self::Dwd => "Dwd",
            Self::Dsa => "Dsa",
            Self::Dsb => "Dsb",
            Self::Dsc => "Dsc",
            Self::Dsd => "Dsd",
            Self::ET => "ET",
            Self::EF => "EF",
        }
    }

    /// Conventional map colour as `#rrggbb`
    pub fn color(self) -> &'static str {
        match self {
            Self::Undefined => "#fafafa",
            Self::Af => "#0000ff",
            Self::Am => "#0079ff",
            Self::Aw => "#45adfc",
            Self::BWh => "#ff0000",
            Self::BWk => "#ff9797",
            Self::BSh => "#f5a701",
            Self::BSk => "#ffdd64",
            Self::Cfa => "#c9ff4f",
            Self::Cfb => "#64ff4f",
            Self::Cfc => "#30cc01",
            Self::Cwa => "#97ff97",
            Self::Cwb => "#64c964",
            Self::Cwc => "#2e972e",
            Self::Csa => "#ffff00",
            Self::Csb => "#cbcb02",
            Self::Csc => "#979700",
            Self::Dfa => "#01ffff",
            Self::Dfb => "#34c9ff",
            Self::Dfc => "#027f7f",
            Self::Dfd => "#00445f",
            Self::Dwa => "#adb3ff",
            Self::Dwb => "#5a79dd",
            Self::Dwc => "#4a4fb5",
            Self::Dwd => "#2e0088",
            Self::Dsa => "#ff00ff",
            Self::Dsb => "#c900c9",
            Self::Dsc => "#972e97",
            Self::Dsd => "#976497",
            Self::ET => "#b3b3b3",
            Self::EF => "#686868",
        }
    }

    pub fn from_code(code: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| (c.code() - code).abs() < 1e-6)
    }
}

/// Convert a temperature in `units` (K, F or C spellings) to °C.
pub fn to_celsius(value: f64, units: &str) -> Result<f64> {
    match units.trim() {
        "K" | "k" | "degK" | "kelvin" | "Kelvin" => Ok(value - 273.15),
        "F" | "degF" | "deg_F" | "fahrenheit" | "Fahrenheit" => Ok((value - 32.0) * 5.0 / 9.0),
        "C" | "degC" | "deg_C" | "celsius" | "Celsius" | "degrees_C" => Ok(value),
        other => Err(PmpError::Generic(format!("unsupported temperature units '{other}'"))),
    }
}

/// Convert a precipitation depth in `units` (mm, cm or m) to mm.
pub fn to_millimetres(value: f64, units: &str) -> Result<f64> {
    match units.trim() {
        "mm" | "millimeter" | "millimetre" => Ok(value),
        "cm" | "centimeter" | "centimetre" => Ok(value * 10.0),
        "m" | "meter" | "metre" => Ok(value * 1000.0),
        other => Err(PmpError::Generic(format!("unsupported precipitation units '{other}'"))),
    }
}

const SPRING_SUMMER: [usize; 6] = [3, 4, 5, 6, 7, 8];
const SUMMER: [usize; 3] = [5, 6, 7];
const WINTER: [usize; 3] = [0, 1, 11];

/// Monthly summary of one grid point, temperatures in °C and
/// precipitation in mm.
struct Climate<'a> {
    tas: &'a [f64],
    pr: &'a [f64],
    min_t: f64,
    max_t: f64,
    mean_t: f64,
    total_p: f64,
    months_above_10: usize,
}

impl<'a> Climate<'a> {
    fn new(tas: &'a [f64], pr: &'a [f64]) -> Self {
        Self {
            tas,
            pr,
            min_t: tas.iter().copied().fold(f64::INFINITY, f64::min),
            max_t: tas.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_t: tas.iter().sum::<f64>() / 12.0,
            total_p: pr.iter().sum(),
            months_above_10: tas.iter().filter(|&&t| t > 10.0).count(),
        }
    }

    fn pr_extreme(&self, months: &[usize], wettest: bool) -> f64 {
        let values = months.iter().map(|&m| self.pr[m]);
        if wettest {
            values.fold(f64::NEG_INFINITY, f64::max)
        } else {
            values.fold(f64::INFINITY, f64::min)
        }
    }

    fn summer_monsoon(&self) -> bool {
        self.pr_extreme(&SUMMER, true) > 10.0 * self.pr_extreme(&WINTER, false)
    }

    fn dry_summer(&self, limit: f64) -> bool {
        let driest_summer = self.pr_extreme(&SUMMER, false);
        self.pr_extreme(&WINTER, true) > 3.0 * driest_summer && driest_summer < limit
    }
}

fn last_match(rules: &[(bool, KoppenClass)]) -> Option<KoppenClass> {
    rules.iter().rev().find(|(hit, _)| *hit).map(|(_, class)| *class)
}

fn tropical(c: &Climate) -> Option<KoppenClass> {
    if !c.tas.iter().all(|&t| t > 18.0) {
        return None;
    }
    let min_p = c.pr.iter().copied().fold(f64::INFINITY, f64::min);
    let rainforest = c.pr.iter().all(|&p| p > 60.0);
    let threshold = 100.0 - c.total_p / 25.0;
    last_match(&[
        (rainforest, KoppenClass::Af),
        (!rainforest && min_p > threshold, KoppenClass::Am),
        (!rainforest && min_p < threshold, KoppenClass::Aw),
    ])
}

fn desert(c: &Climate) -> Option<KoppenClass> {
    if c.tas.iter().all(|&t| t < 10.0) {
        return None;
    }
    let spring_summer: f64 = SPRING_SUMMER.iter().map(|&m| c.pr[m]).sum();
    // NaN when there is no precipitation at all; both reductions apply then
    let fraction = spring_summer / c.total_p;
    let share_above = |limit: f64| fraction > limit;
    let mut threshold = 20.0 * c.mean_t + 280.0;
    if !share_above(0.70) {
        threshold -= 140.0;
    }
    if !share_above(0.30) {
        threshold -= 140.0;
    }
    let arid = c.total_p < 0.5 * threshold;
    let semi_arid = c.total_p > 0.5 * threshold && c.total_p < threshold;
    let (hot, cool) = (c.mean_t > 18.0, c.mean_t < 18.0);
    last_match(&[
        (arid && hot, KoppenClass::BWh),
        (arid && cool, KoppenClass::BWk),
        (semi_arid && hot, KoppenClass::BSh),
        (semi_arid && cool, KoppenClass::BSk),
    ])
}

fn temperate(c: &Climate, is_desert: bool) -> Option<KoppenClass> {
    let cond = c.min_t > 0.0 && c.min_t < 18.0 && c.max_t > 10.0;
    if is_desert || !cond {
        return None;
    }
    let n10 = c.months_above_10;
    let hot = c.max_t > 22.0 && n10 >= 4;
    let warm = c.max_t < 22.0 && n10 >= 4;
    let cold = c.max_t < 22.0 && (1..4).contains(&n10);
    let monsoon = c.summer_monsoon();
    let dry_summer = c.dry_summer(40.0);
    last_match(&[
        (hot, KoppenClass::Cfa),
        (warm, KoppenClass::Cfb),
        (cold, KoppenClass::Cfc),
        (hot && monsoon, KoppenClass::Cwa),
        (warm && monsoon, KoppenClass::Cwb),
        (cold && monsoon, KoppenClass::Cwc),
        (hot && dry_summer, KoppenClass::Csa),
        (warm && dry_summer, KoppenClass::Csb),
        (cold && dry_summer, KoppenClass::Csc),
    ])
}

fn continental(c: &Climate, is_desert: bool) -> Option<KoppenClass> {
    let cond = c.min_t < 0.0 && c.max_t > 10.0;
    if is_desert || !cond {
        return None;
    }
    let n10 = c.months_above_10;
    let short_summer = (1..4).contains(&n10);
    let hot = c.max_t > 22.0 && n10 >= 4;
    let warm = c.max_t < 22.0 && n10 >= 4;
    let subarctic = short_summer;
    let extreme = c.min_t < -38.0 && short_summer;
    let cold = c.max_t < 22.0 && short_summer;
    let monsoon = c.summer_monsoon();
    let dry_summer = c.dry_summer(30.0);
    last_match(&[
        (hot, KoppenClass::Dfa),
        (warm, KoppenClass::Dfb),
        (subarctic, KoppenClass::Dfc),
        (extreme, KoppenClass::Dfd),
        (hot && monsoon, KoppenClass::Dwa),
        (warm && monsoon, KoppenClass::Dwb),
        (cold && monsoon, KoppenClass::Dwc),
        (extreme && monsoon, KoppenClass::Dwd),
        (hot && dry_summer, KoppenClass::Dsa),
        (warm && dry_summer, KoppenClass::Dsb),
        (cold && dry_summer, KoppenClass::Dsc),
        (extreme && dry_summer, KoppenClass::Dsd),
    ])
}

fn polar(c: &Climate) -> Option<KoppenClass> {
    if c.max_t >= 10.0 {
        return None;
    }
    last_match(&[
        (c.max_t > 0.0, KoppenClass::ET),
        (c.max_t < 0.0, KoppenClass::EF),
    ])
}

/// Classify one location from 12 monthly temperatures (°C) and
/// precipitation totals (mm), January first. Missing values give
/// [`KoppenClass::Undefined`].
pub fn classify(tas: &[f64], pr: &[f64]) -> KoppenClass {
    if tas.len() != 12 || pr.len() != 12 || tas.iter().chain(pr).any(|v| !v.is_finite()) {
        return KoppenClass::Undefined;
    }
    let c = Climate::new(tas, pr);
    let desert_class = desert(&c);
    tropical(&c)
        .or(desert_class)
        .or_else(|| temperate(&c, desert_class.is_some()))
        .or_else(|| continental(&c, desert_class.is_some()))
        .or_else(|| polar(&c))
        .unwrap_or(KoppenClass::Undefined)
}

/// Classification of a grid.
#[derive(Debug, Clone)]
pub struct KoppenMap {
    pub grid: Grid,
    /// Numeric class codes, see [`KoppenClass::code`]
    pub codes: Array2<f64>,
    /// Index into [`KoppenMap::classes`] at each point
    pub index: Array2<usize>,
    /// Classes present on the map, in canonical order
    pub classes: Vec<KoppenClass>,
}

impl KoppenMap {
    pub fn labels(&self) -> Vec<&'static str> {
        self.classes.iter().map(|c| c.label()).collect()
    }

    pub fn colors(&self) -> Vec<&'static str> {
        self.classes.iter().map(|c| c.color()).collect()
    }
}

fn normalized(field: &Field, convert: fn(f64, &str) -> Result<f64>) -> Result<Field> {
    if field.n_time() != 12 {
        return Err(PmpError::Statistics(format!(
            "'{}' must be a 12-month climatology, got {} steps",
            field.name,
            field.n_time()
        )));
    }
    let units = field.units.clone();
    convert(0.0, &units)?;
    let data = field.data.mapv(|v| convert(v, &units).unwrap_or(f64::NAN));
    field.with_data(data)
}

/// Classify every grid point of monthly temperature and precipitation
/// climatologies, converting units first.
pub fn classify_grid(tas: &Field, pr: &Field) -> Result<KoppenMap> {
    if tas.grid.shape() != pr.grid.shape() {
        let (a, b) = (tas.grid.shape(), pr.grid.shape());
        return Err(PmpError::ShapeMismatch {
            context: "koppen temperature vs precipitation grid".into(),
            left: vec![a.0, a.1],
            right: vec![b.0, b.1],
        });
    }
    let tas = normalized(tas, to_celsius)?;
    let pr = normalized(pr, to_millimetres)?;
    let stacked = concatenate(Axis(0), &[tas.data.view(), pr.data.view()])?;
    let codes = map_grid_points_scalar(&stacked, |series| {
        let (t, p) = series.split_at(12);
        classify(t, p).code()
    })?;

    let mut classes: Vec<KoppenClass> = codes
        .iter()
        .filter_map(|&c| KoppenClass::from_code(c))
        .collect();
    classes.sort();
    classes.dedup();
    debug!(classes = classes.len(), "koppen classes in use");

    let index = codes.mapv(|c| {
        KoppenClass::from_code(c)
            .and_then(|k| classes.iter().position(|&x| x == k))
            .unwrap_or(0)
    });
    Ok(KoppenMap {
        grid: tas.grid.clone(),
        codes,
        index,
        classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array3};

    #[test]
    fn tropical_rainforest() {
        assert_eq!(classify(&[26.0; 12], &[200.0; 12]), KoppenClass::Af);
    }

    #[test]
    fn tropical_savanna() {
        let mut pr = [150.0; 12];
        pr[6] = 5.0;
        pr[7] = 5.0;
        assert_eq!(classify(&[25.0; 12], &pr), KoppenClass::Aw);
    }

    #[test]
    fn hot_desert() {
        let tas = [15.0, 17.0, 20.0, 24.0, 28.0, 32.0, 34.0, 34.0, 30.0, 25.0, 20.0, 16.0];
        assert_eq!(classify(&tas, &[2.0; 12]), KoppenClass::BWh);
    }

    #[test]
    fn oceanic_climate() {
        let tas = [5.0, 5.0, 7.0, 9.0, 12.0, 15.0, 17.0, 17.0, 14.0, 11.0, 8.0, 6.0];
        assert_eq!(classify(&tas, &[70.0; 12]), KoppenClass::Cfb);
    }

    #[test]
    fn mediterranean_hot_summer() {
        let tas = [10.0, 11.0, 13.0, 15.0, 19.0, 23.0, 26.0, 26.0, 23.0, 19.0, 14.0, 11.0];
        let pr = [100.0, 90.0, 70.0, 50.0, 30.0, 10.0, 2.0, 5.0, 30.0, 80.0, 110.0, 120.0];
        assert_eq!(classify(&tas, &pr), KoppenClass::Csa);
    }

    #[test]
    fn subarctic() {
        let tas = [-25.0, -22.0, -15.0, -5.0, 5.0, 12.0, 15.0, 12.0, 6.0, -4.0, -15.0, -22.0];
        assert_eq!(classify(&tas, &[40.0; 12]), KoppenClass::Dfc);
    }

    #[test]
    fn polar_classes() {
        assert_eq!(classify(&[-30.0; 12], &[10.0; 12]), KoppenClass::EF);
        let mut tas = [-20.0; 12];
        tas[6] = 5.0;
        assert_eq!(classify(&tas, &[30.0; 12]), KoppenClass::ET);
    }

    #[test]
    fn rainless_cold_site_is_not_desert() {
        // mean -10 °C: the aridity threshold drops to -200 mm without rain
        let mut tas = [-12.0; 12];
        tas[6] = 12.0;
        let c = Climate::new(&tas, &[0.0; 12]);
        assert!(desert(&c).is_none());
        assert_eq!(classify(&tas, &[0.0; 12]), KoppenClass::Dfc);
    }

    #[test]
    fn rainless_hot_site_is_hot_desert() {
        let tas = [15.0, 17.0, 20.0, 24.0, 28.0, 32.0, 34.0, 34.0, 30.0, 25.0, 20.0, 16.0];
        assert_eq!(classify(&tas, &[0.0; 12]), KoppenClass::BWh);
    }

    #[test]
    fn missing_is_undefined() {
        let mut tas = [26.0; 12];
        tas[0] = f64::NAN;
        assert_eq!(classify(&tas, &[200.0; 12]), KoppenClass::Undefined);
    }

    #[test]
    fn unit_conversions() {
        assert_relative_eq!(to_celsius(273.15, "K").unwrap(), 0.0);
        assert_relative_eq!(to_celsius(212.0, "degF").unwrap(), 100.0);
        assert_relative_eq!(to_millimetres(2.5, "cm").unwrap(), 25.0);
        assert!(to_millimetres(1.0, "kg m-2 s-1").is_err());
    }

    #[test]
    fn grid_classes_are_compacted() {
        let grid = Grid::new(Array1::from(vec![0.0, 80.0]), Array1::from(vec![0.0]));
        let tas = Array3::from_shape_fn((12, 2, 1), |(_, i, _)| if i == 0 { 299.0 } else { 240.0 });
        let pr = Array3::from_shape_fn((12, 2, 1), |_| 200.0);
        let tas = Field::new("tas", "K", grid.clone(), None, tas).unwrap();
        let pr = Field::new("pr", "mm", grid, None, pr).unwrap();
        let map = classify_grid(&tas, &pr).unwrap();
        assert_eq!(map.classes, vec![KoppenClass::Af, KoppenClass::EF]);
        assert_eq!(map.index[[0, 0]], 0);
        assert_eq!(map.index[[1, 0]], 1);
        assert_eq!(map.labels(), vec!["Af", "EF"]);
        assert_eq!(map.colors()[1], "#686868");
    }
}
