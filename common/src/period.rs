//! Calendar periods used to bucket volume.
//!
//! Weeks start on Monday (ISO 8601) everywhere in the workspace, months on the
//! first calendar day. All dates are UTC calendar days.

use std::str::FromStr;

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn parse(s: &str) -> crate::Result<Self> {
        Period::from_str(&s.to_lowercase()).map_err(|_| crate::Error::InvalidPeriod(s.to_string()))
    }

    /// Start of the bucket of this period that contains `date`.
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => date,
            Period::Weekly => week_start(date),
            Period::Monthly => month_start(date),
        }
    }

    /// Start of the bucket that follows the one starting at `start`.
    pub fn next_start(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Period::Daily => start.succ_opt(),
            Period::Weekly => start.checked_add_signed(Duration::days(7)),
            Period::Monthly => month_start(start).checked_add_months(Months::new(1)),
        }
    }

    /// Every bucket start between `start` and `end` inclusive, both normalized
    /// to their bucket start first.
    pub fn instances(&self, start: NaiveDate, end: NaiveDate) -> PeriodInstances {
        let end = self.bucket_start(end);
        let first = self.bucket_start(start);
        PeriodInstances {
            period: *self,
            next: (first <= end).then_some(first),
            end,
        }
    }
}

/// Bucket starts produced by [`Period::instances`].
pub struct PeriodInstances {
    period: Period,
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for PeriodInstances {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        self.next = self
            .period
            .next_start(current)
            .filter(|next| *next <= self.end);
        Some(current)
    }
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

pub fn parse_year(s: &str) -> crate::Result<i32> {
    let s = s.trim();
    if s.len() != 4 || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(crate::Error::InvalidYear(s.to_string()));
    }
    let year = s
        .parse::<i32>()
        .map_err(|_| crate::Error::InvalidYear(s.to_string()))?;
    if year < 1970 {
        return Err(crate::Error::InvalidYear(s.to_string()));
    }
    Ok(year)
}

/// First and last day of a calendar year.
pub fn year_bounds(year: i32) -> crate::Result<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1);
    let last = NaiveDate::from_ymd_opt(year, 12, 31);
    first
        .zip(last)
        .ok_or_else(|| crate::Error::InvalidYear(year.to_string()))
}
