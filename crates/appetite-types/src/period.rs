//! Reporting periods.
//!
//! Statuses are re-derivable for any period, not only "now". A period is a
//! closed date range plus a sequential ordinal; the ordinal is what breach
//! events store as `period_number` so consecutive runs can be detected by
//! simple subtraction.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Measurement cadence of a tolerance metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Monthly,
    Quarterly,
}

impl Frequency {
    fn periods_per_year(self) -> u32 {
        match self {
            Frequency::Monthly => 12,
            Frequency::Quarterly => 4,
        }
    }

    fn months_per_period(self) -> u32 {
        12 / self.periods_per_year()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodParseError {
    #[error("period '{0}' is not of the form YYYY-MM or YYYY-Qn")]
    Malformed(String),

    #[error("period index {index} out of range for {frequency:?}")]
    OutOfRange { frequency: Frequency, index: u32 },
}

/// A monthly (`2025-03`) or quarterly (`2025-Q1`) reporting period.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportingPeriod {
    frequency: Frequency,
    year: i32,
    index: u32,
    start: NaiveDate,
    end: NaiveDate,
}

impl ReportingPeriod {
    /// Build a period from its 1-based index within the year.
    pub fn new(frequency: Frequency, year: i32, index: u32) -> Result<Self, PeriodParseError> {
        if index == 0 || index > frequency.periods_per_year() {
            return Err(PeriodParseError::OutOfRange { frequency, index });
        }
        let first_month = (index - 1) * frequency.months_per_period() + 1;
        let start = NaiveDate::from_ymd_opt(year, first_month, 1)
            .ok_or(PeriodParseError::OutOfRange { frequency, index })?;
        let (next_year, next_month) = if first_month + frequency.months_per_period() > 12 {
            (year + 1, 1)
        } else {
            (year, first_month + frequency.months_per_period())
        };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .map(|next| next - Duration::days(1))
            .ok_or(PeriodParseError::OutOfRange { frequency, index })?;
        Ok(Self {
            frequency,
            year,
            index,
            start,
            end,
        })
    }

    /// The period of the given cadence that contains `date`.
    pub fn containing(frequency: Frequency, date: NaiveDate) -> Self {
        let index = (date.month() - 1) / frequency.months_per_period() + 1;
        let first_month = (index - 1) * frequency.months_per_period() + 1;
        let start = date.with_day(1).and_then(|d| d.with_month(first_month)).unwrap_or(date);
        let months = frequency.months_per_period() as i32;
        let end = add_months(start, months) - Duration::days(1);
        Self {
            frequency,
            year: date.year(),
            index,
            start,
            end,
        }
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Sequential number of this period; consecutive periods differ by one.
    pub fn ordinal(&self) -> i64 {
        i64::from(self.year) * i64::from(self.frequency.periods_per_year())
            + i64::from(self.index - 1)
    }
}

fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months;
    NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)
        .unwrap_or(date)
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frequency {
            Frequency::Monthly => write!(f, "{:04}-{:02}", self.year, self.index),
            Frequency::Quarterly => write!(f, "{:04}-Q{}", self.year, self.index),
        }
    }
}

impl FromStr for ReportingPeriod {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodParseError::Malformed(s.to_string());
        let (year, rest) = s.split_once('-').ok_or_else(malformed)?;
        let year: i32 = year.parse().map_err(|_| malformed())?;
        if let Some(quarter) = rest.strip_prefix('Q') {
            let index = quarter.parse().map_err(|_| malformed())?;
            ReportingPeriod::new(Frequency::Quarterly, year, index)
        } else {
            let index = rest.parse().map_err(|_| malformed())?;
            ReportingPeriod::new(Frequency::Monthly, year, index)
        }
    }
}

impl TryFrom<String> for ReportingPeriod {
    type Error = PeriodParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReportingPeriod> for String {
    fn from(value: ReportingPeriod) -> Self {
        value.to_string()
    }
}
