//! Season handling for monthly data: custom season strings ("MJJ",
//! "NDJFM"), per-year seasonal means, annual cycle and departures.

use crate::calendar::ModelDate;
use crate::errors::{PmpError, Result};
use crate::field::{Field, TimeAxis};
use ndarray::{Array2, Array3, Axis, Zip};
use std::collections::BTreeMap;

const MONTH_LETTERS: &str = "JFMAMJJASOND";
const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthOutput {
    Abbreviations,
    Numbers,
}

/// How the months of one season-year are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AveragingMethod {
    /// Weighted by month length
    #[default]
    Weighted,
    Arithmetic,
}

/// Month numbers (1..=12) of a season string, wrapping over the year end.
///
/// # Errors
///
/// Fails if the string is longer than 12 letters or is not a run of
/// consecutive month initials.
pub fn season_month_numbers(season: &str) -> Result<Vec<u32>> {
    let season = season.to_ascii_uppercase();
    if season.len() > 12 {
        return Err(PmpError::InvalidSeason(
            "Custom season length cannot be longer than 12".to_string(),
        ));
    }
    if season.is_empty() {
        return Err(PmpError::InvalidSeason("empty season".to_string()));
    }
    let doubled = MONTH_LETTERS.repeat(2);
    (0..=doubled.len() - season.len())
        .find(|&i| doubled[i..i + season.len()] == season)
        .map(|start| {
            (0..season.len())
                .map(|j| ((start + j) % 12) as u32 + 1)
                .collect()
        })
        .ok_or_else(|| {
            PmpError::InvalidSeason(format!("Custom season {season} not found in months {doubled}"))
        })
}

pub fn generate_calendar_months(season: &str, output: MonthOutput) -> Result<Vec<String>> {
    let numbers = season_month_numbers(season)?;
    Ok(numbers
        .into_iter()
        .map(|m| match output {
            MonthOutput::Numbers => m.to_string(),
            MonthOutput::Abbreviations => MONTH_ABBREVIATIONS[(m - 1) as usize].to_string(),
        })
        .collect())
}

/// Months of a named season; `yearly`/`ann` is all twelve.
pub fn named_season_months(season: &str) -> Result<Vec<u32>> {
    match season.to_ascii_lowercase().as_str() {
        "yearly" | "ann" | "annual" => Ok((1..=12).collect()),
        _ => season_month_numbers(season),
    }
}

pub fn subset_timesteps_in_custom_season(field: &Field, season: &str) -> Result<Field> {
    let months = season_month_numbers(season)?;
    let indices = field.month_indices(&months)?;
    field.select_time(&indices)
}

fn weighted_mean_steps(
    data: &Array3<f64>,
    steps: &[usize],
    weights: &[f64],
) -> Array2<f64> {
    let (_, nlat, nlon) = data.dim();
    let mut sum = Array2::<f64>::zeros((nlat, nlon));
    let mut wsum = Array2::<f64>::zeros((nlat, nlon));
    for (&t, &w) in steps.iter().zip(weights) {
        Zip::from(&mut sum)
            .and(&mut wsum)
            .and(&data.index_axis(Axis(0), t))
            .for_each(|s, ws, &v| {
                if v.is_finite() {
                    *s += v * w;
                    *ws += w;
                }
            });
    }
    Zip::from(&mut sum).and(&wsum).for_each(|s, &ws| {
        *s = if ws > 0.0 { *s / ws } else { f64::NAN };
    });
    sum
}

/// Average of a custom season in each calendar year.
pub fn custom_season_average(field: &Field, season: &str, method: AveragingMethod) -> Result<Field> {
    let subset = subset_timesteps_in_custom_season(field, season)?;
    let dates = subset.dates()?.to_vec();
    let calendar = subset.calendar();

    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, d) in dates.iter().enumerate() {
        groups.entry(d.year).or_default().push(i);
    }

    let (nlat, nlon) = subset.grid.shape();
    let mut out = Array3::from_elem((groups.len(), nlat, nlon), f64::NAN);
    let mut out_dates = Vec::with_capacity(groups.len());
    for (k, (year, steps)) in groups.iter().enumerate() {
        let weights: Vec<f64> = steps
            .iter()
            .map(|&i| match method {
                AveragingMethod::Weighted => {
                    f64::from(calendar.days_in_month(dates[i].year, dates[i].month))
                }
                AveragingMethod::Arithmetic => 1.0,
            })
            .collect();
        out.index_axis_mut(Axis(0), k)
            .assign(&weighted_mean_steps(&subset.data, steps, &weights));
        out_dates.push(ModelDate::new(*year, 1, 1));
    }

    Field::new(
        subset.name.clone(),
        subset.units.clone(),
        subset.grid.clone(),
        Some(TimeAxis::new(out_dates, calendar)),
        out,
    )
}

/// Yearly custom-season means minus their climatology. Seasons that
/// include February weight years by their length.
pub fn custom_season_departure(field: &Field, season: &str, method: AveragingMethod) -> Result<Field> {
    let yearly = custom_season_average(field, season, method)?;
    let calendar = yearly.calendar();
    let steps: Vec<usize> = (0..yearly.n_time()).collect();
    let weights: Vec<f64> = if season.to_ascii_uppercase().contains('F') {
        yearly
            .dates()?
            .iter()
            .map(|d| f64::from(calendar.days_in_year(d.year)))
            .collect()
    } else {
        vec![1.0; steps.len()]
    };
    let clim = weighted_mean_steps(&yearly.data, &steps, &weights);
    let mut data = yearly.data.clone();
    for mut map in data.axis_iter_mut(Axis(0)) {
        map -= &clim;
    }
    yearly.with_data(data)
}

/// Monthly climatology (12 steps, January first) of a monthly series.
pub fn annual_cycle(field: &Field) -> Result<Field> {
    let dates = field.dates()?;
    let (nlat, nlon) = field.grid.shape();
    let first_year = dates.first().map_or(1, |d| d.year);
    let mut clim = Array3::from_elem((12, nlat, nlon), f64::NAN);
    for month in 1..=12u32 {
        let steps: Vec<usize> = dates
            .iter()
            .enumerate()
            .filter(|(_, d)| d.month == month)
            .map(|(i, _)| i)
            .collect();
        if steps.is_empty() {
            continue;
        }
        let weights = vec![1.0; steps.len()];
        clim.index_axis_mut(Axis(0), (month - 1) as usize)
            .assign(&weighted_mean_steps(&field.data, &steps, &weights));
    }
    let clim_dates = (1..=12).map(|m| ModelDate::new(first_year, m, 15)).collect();
    Field::new(
        field.name.clone(),
        field.units.clone(),
        field.grid.clone(),
        Some(TimeAxis::new(clim_dates, field.calendar())),
        clim,
    )
}

/// Remove the annual cycle from a monthly series.
pub fn departures(field: &Field) -> Result<Field> {
    let clim = annual_cycle(field)?;
    let months = field.time.as_ref().map(TimeAxis::months).unwrap_or_default();
    let mut data = field.data.clone();
    for (t, mut map) in data.axis_iter_mut(Axis(0)).enumerate() {
        let m = months[t] as usize - 1;
        map -= &clim.data.index_axis(Axis(0), m);
    }
    field.with_data(data)
}

/// One mean per season-year, keeping only seasons whose months are all
/// present. Seasons crossing the year end (e.g. DJF) are labelled with the
/// year of their last month.
pub fn seasonal_series(field: &Field, season: &str) -> Result<Field> {
    let months = named_season_months(season)?;
    let dates = field.dates()?;
    let calendar = field.calendar();
    let wraps = months.windows(2).any(|w| w[1] < w[0]);
    let first = months[0];

    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, d) in dates.iter().enumerate() {
        if !months.contains(&d.month) {
            continue;
        }
        let label = if wraps && d.month >= first { d.year + 1 } else { d.year };
        groups.entry(label).or_default().push(i);
    }
    groups.retain(|_, steps| steps.len() == months.len());

    let (nlat, nlon) = field.grid.shape();
    let mut out = Array3::from_elem((groups.len(), nlat, nlon), f64::NAN);
    let mid_month = months[months.len() / 2];
    let mut out_dates = Vec::with_capacity(groups.len());
    for (k, (label, steps)) in groups.iter().enumerate() {
        let weights: Vec<f64> = steps
            .iter()
            .map(|&i| f64::from(calendar.days_in_month(dates[i].year, dates[i].month)))
            .collect();
        out.index_axis_mut(Axis(0), k)
            .assign(&weighted_mean_steps(&field.data, steps, &weights));
        out_dates.push(ModelDate::new(*label, mid_month, 15));
    }

    Field::new(
        field.name.clone(),
        field.units.clone(),
        field.grid.clone(),
        Some(TimeAxis::new(out_dates, calendar)),
        out,
    )
}
