//! CF calendars and time-axis decoding.
//!
//! Model output uses several calendars (`noleap`, `360_day`, ...), so dates
//! are kept as plain `(year, month, day)` triples and converted to day
//! ordinals per calendar. The standard calendar delegates to `chrono`
//! (proleptic Gregorian).

use crate::errors::{PmpError, Result};
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// Month lengths of a 365-day year, January first.
pub const NOLEAP_MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// CF calendar kinds supported by the time decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Calendar {
    /// `standard`, `gregorian`, `proleptic_gregorian`
    #[default]
    Standard,
    /// `noleap`, `365_day`
    NoLeap,
    /// `all_leap`, `366_day`
    AllLeap,
    /// `360_day`
    Day360,
}

impl FromStr for Calendar {
    type Err = PmpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" | "julian" => Ok(Self::Standard),
            "noleap" | "365_day" => Ok(Self::NoLeap),
            "all_leap" | "366_day" => Ok(Self::AllLeap),
            "360_day" => Ok(Self::Day360),
            other => Err(PmpError::Calendar(format!("unsupported calendar '{other}'"))),
        }
    }
}

impl Calendar {
    /// CF name of the calendar
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::NoLeap => "noleap",
            Self::AllLeap => "all_leap",
            Self::Day360 => "360_day",
        }
    }

    pub fn is_leap_year(self, year: i32) -> bool {
        match self {
            Self::Standard => (year % 4 == 0 && year % 100 != 0) || year % 400 == 0,
            Self::NoLeap | Self::Day360 => false,
            Self::AllLeap => true,
        }
    }

    /// Number of days in `month` (1..=12) of `year`
    pub fn days_in_month(self, year: i32, month: u32) -> u32 {
        match self {
            Self::Day360 => 30,
            _ if month == 2 && self.is_leap_year(year) => 29,
            _ => NOLEAP_MONTH_DAYS[(month as usize).saturating_sub(1).min(11)],
        }
    }

    pub fn days_in_year(self, year: i32) -> u32 {
        match self {
            Self::Day360 => 360,
            _ if self.is_leap_year(year) => 366,
            _ => 365,
        }
    }

    /// Day ordinal of a date, 0001-01-01 being day 0.
    pub fn ordinal(self, date: ModelDate) -> Result<i64> {
        self.validate(date)?;
        let years = i64::from(date.year) - 1;
        let ordinal = match self {
            Self::Standard => {
                let nd = NaiveDate::from_ymd_opt(date.year, date.month, date.day)
                    .ok_or_else(|| PmpError::Calendar(format!("invalid date {date}")))?;
                i64::from(nd.num_days_from_ce()) - 1
            }
            Self::Day360 => years * 360 + i64::from(date.month - 1) * 30 + i64::from(date.day - 1),
            Self::NoLeap | Self::AllLeap => {
                let year_len = i64::from(self.days_in_year(date.year));
                let before: u32 = (1..date.month)
                    .map(|m| self.days_in_month(date.year, m))
                    .sum();
                years * year_len + i64::from(before) + i64::from(date.day - 1)
            }
        };
        Ok(ordinal)
    }

    /// Inverse of [`Calendar::ordinal`]
    pub fn from_ordinal(self, ordinal: i64) -> Result<ModelDate> {
        match self {
            Self::Standard => {
                let days = i32::try_from(ordinal + 1)
                    .map_err(|_| PmpError::Calendar(format!("ordinal {ordinal} out of range")))?;
                let nd = NaiveDate::from_num_days_from_ce_opt(days)
                    .ok_or_else(|| PmpError::Calendar(format!("ordinal {ordinal} out of range")))?;
                Ok(ModelDate::new(nd.year(), nd.month(), nd.day()))
            }
            _ => {
                let year_len = i64::from(self.days_in_year(1));
                let year = ordinal.div_euclid(year_len) + 1;
                let mut rest = ordinal.rem_euclid(year_len) as u32;
                let year = i32::try_from(year)
                    .map_err(|_| PmpError::Calendar(format!("ordinal {ordinal} out of range")))?;
                let mut month = 1;
                while rest >= self.days_in_month(year, month) {
                    rest -= self.days_in_month(year, month);
                    month += 1;
                }
                Ok(ModelDate::new(year, month, rest + 1))
            }
        }
    }

    fn validate(self, date: ModelDate) -> Result<()> {
        if !(1..=12).contains(&date.month) {
            return Err(PmpError::Calendar(format!("invalid month in {date}")));
        }
        if date.day == 0 || date.day > self.days_in_month(date.year, date.month) {
            return Err(PmpError::Calendar(format!(
                "invalid day in {date} for calendar {}",
                self.as_str()
            )));
        }
        Ok(())
    }
}

/// A calendar-agnostic date
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl ModelDate {
    pub const fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for ModelDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Consecutive daily dates from `start` (inclusive), `count` of them.
pub fn daily_range(calendar: Calendar, start: ModelDate, count: usize) -> Result<Vec<ModelDate>> {
    let first = calendar.ordinal(start)?;
    (0..count as i64)
        .map(|offset| calendar.from_ordinal(first + offset))
        .collect()
}

/// Monthly mid-points (day 15) starting at January of `start_year`.
pub fn monthly_range(start_year: i32, count: usize) -> Vec<ModelDate> {
    (0..count)
        .map(|i| ModelDate::new(start_year + (i / 12) as i32, (i % 12) as u32 + 1, 15))
        .collect()
}

/// Decode numeric CF time values such as `"days since 1850-01-01 00:00:00"`.
///
/// # Errors
///
/// Returns [`PmpError::Calendar`] for unparseable units or reference dates.
pub fn decode_time(values: &[f64], units: &str, calendar: Calendar) -> Result<Vec<ModelDate>> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| PmpError::Calendar(format!("unsupported time units '{units}'")))?;
    let (ref_date, ref_fraction) = parse_reference(reference.trim())?;

    let unit = unit.trim().to_ascii_lowercase();
    if unit.starts_with("month") {
        return values
            .iter()
            .map(|&v| {
                let total = i64::from(ref_date.month) - 1 + v.floor() as i64;
                let year = ref_date.year + total.div_euclid(12) as i32;
                let month = total.rem_euclid(12) as u32 + 1;
                let day = ref_date.day.min(calendar.days_in_month(year, month));
                Ok(ModelDate::new(year, month, day))
            })
            .collect();
    }

    let per_day = match unit.as_str() {
        "day" | "days" | "d" => 1.0,
        "hour" | "hours" | "h" | "hr" => 24.0,
        "minute" | "minutes" | "min" => 1440.0,
        "second" | "seconds" | "s" | "sec" => 86400.0,
        other => return Err(PmpError::Calendar(format!("unsupported time unit '{other}'"))),
    };

    let base = calendar.ordinal(ref_date)?;
    values
        .iter()
        .map(|&v| {
            // Small tolerance so values stored as 0.99999 still land on the next day.
            let offset = (ref_fraction + v / per_day + 1e-6).floor() as i64;
            calendar.from_ordinal(base + offset)
        })
        .collect()
}

/// Parse `YYYY-MM-DD[ HH:MM:SS]` into a date and the fraction of day elapsed.
fn parse_reference(reference: &str) -> Result<(ModelDate, f64)> {
    let bad = || PmpError::Calendar(format!("invalid reference date '{reference}'"));
    let mut parts = reference.splitn(2, |c: char| c == ' ' || c == 'T');
    let date_part = parts.next().ok_or_else(bad)?;
    let time_part = parts.next().unwrap_or("").trim();

    // Leading '-' would be a negative year; CF files in practice never use one.
    let ymd: Vec<&str> = date_part.split('-').collect();
    if ymd.len() != 3 {
        return Err(bad());
    }
    let year: i32 = ymd[0].parse().map_err(|_| bad())?;
    let month: u32 = ymd[1].parse().map_err(|_| bad())?;
    let day: u32 = ymd[2].parse().map_err(|_| bad())?;

    let mut fraction = 0.0;
    if !time_part.is_empty() {
        let clock = time_part.trim_end_matches('Z');
        let clock = clock.split_whitespace().next().unwrap_or("");
        let hms: Vec<f64> = clock
            .split(':')
            .map(|p| p.parse::<f64>().map_err(|_| bad()))
            .collect::<Result<_>>()?;
        let seconds = hms.first().copied().unwrap_or(0.0) * 3600.0
            + hms.get(1).copied().unwrap_or(0.0) * 60.0
            + hms.get(2).copied().unwrap_or(0.0);
        fraction = seconds / 86400.0;
    }

    Ok((ModelDate::new(year, month, day), fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_round_trip_all_calendars() {
        for cal in [
            Calendar::Standard,
            Calendar::NoLeap,
            Calendar::AllLeap,
            Calendar::Day360,
        ] {
            let start = cal.ordinal(ModelDate::new(1999, 12, 1)).unwrap();
            for offset in 0..800 {
                let date = cal.from_ordinal(start + offset).unwrap();
                assert_eq!(cal.ordinal(date).unwrap(), start + offset, "{cal:?} {date}");
            }
        }
    }

    #[test]
    fn leap_day_depends_on_calendar() {
        assert_eq!(Calendar::Standard.days_in_month(2000, 2), 29);
        assert_eq!(Calendar::Standard.days_in_month(1900, 2), 28);
        assert_eq!(Calendar::NoLeap.days_in_month(2000, 2), 28);
        assert_eq!(Calendar::AllLeap.days_in_month(2001, 2), 29);
        assert_eq!(Calendar::Day360.days_in_month(2001, 2), 30);
    }

    #[test]
    fn decode_days_since_noleap() {
        let dates = decode_time(&[0.0, 59.0, 365.5], "days since 2000-01-01", Calendar::NoLeap)
            .unwrap();
        assert_eq!(dates[0], ModelDate::new(2000, 1, 1));
        assert_eq!(dates[1], ModelDate::new(2000, 3, 1));
        assert_eq!(dates[2], ModelDate::new(2001, 1, 1));
    }

    #[test]
    fn decode_hours_since_with_clock() {
        let dates = decode_time(
            &[0.0, 12.0, 36.0],
            "hours since 1979-02-28 12:00:00",
            Calendar::Standard,
        )
        .unwrap();
        assert_eq!(dates[0], ModelDate::new(1979, 2, 28));
        assert_eq!(dates[1], ModelDate::new(1979, 3, 1));
        assert_eq!(dates[2], ModelDate::new(1979, 3, 2));
    }

    #[test]
    fn decode_months_since() {
        let dates = decode_time(&[0.0, 11.0, 13.0], "months since 1850-01-15", Calendar::NoLeap)
            .unwrap();
        assert_eq!(dates[1], ModelDate::new(1850, 12, 15));
        assert_eq!(dates[2], ModelDate::new(1851, 2, 15));
    }

    #[test]
    fn rejects_unknown_calendar_and_units() {
        assert!("julian_day_count".parse::<Calendar>().is_err());
        assert!(decode_time(&[0.0], "fortnights since 2000-01-01", Calendar::Standard).is_err());
        assert!(decode_time(&[0.0], "days", Calendar::Standard).is_err());
    }
}
