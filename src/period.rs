//! Calendar periods used to discretize delivery dates

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::AnalyticsError;

/// Granularity of a period bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// Monday-start weeks of seven days
    Week,
    /// Calendar months
    Month,
    /// Calendar quarters
    Quarter,
}

impl Frequency {
    /// Short code used in file names (`W`, `M`, `Q`)
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Week => "W",
            Frequency::Month => "M",
            Frequency::Quarter => "Q",
        }
    }

    /// Plural unit name for human readable output
    pub fn unit_name(&self) -> &'static str {
        match self {
            Frequency::Week => "Weeks",
            Frequency::Month => "Months",
            Frequency::Quarter => "Quarters",
        }
    }

    pub fn periods_per_year(&self) -> f64 {
        match self {
            Frequency::Week => 52.0,
            Frequency::Month => 12.0,
            Frequency::Quarter => 4.0,
        }
    }

    /// Index of the period containing `date`.
    ///
    /// Indices are consecutive integers, so the number of periods between two
    /// dates is the difference of their indices. Week 0 starts on Monday
    /// 1969-12-29.
    pub fn index_of(&self, date: NaiveDate) -> i64 {
        match self {
            Frequency::Week => (days_since_epoch(date) + 3).div_euclid(7),
            Frequency::Month => date.year() as i64 * 12 + date.month0() as i64,
            Frequency::Quarter => date.year() as i64 * 4 + (date.month0() / 3) as i64,
        }
    }

    /// First day of the period with the given index
    pub fn start_of(&self, index: i64) -> Option<NaiveDate> {
        match self {
            Frequency::Week => Some(date_from_epoch_days(index * 7 - 3)),
            Frequency::Month => NaiveDate::from_ymd_opt(
                index.div_euclid(12) as i32,
                index.rem_euclid(12) as u32 + 1,
                1,
            ),
            Frequency::Quarter => NaiveDate::from_ymd_opt(
                index.div_euclid(4) as i32,
                index.rem_euclid(4) as u32 * 3 + 1,
                1,
            ),
        }
    }

    /// Display label of a period: `2021-03-01/2021-03-07`, `2021-03` or `2021Q1`
    pub fn label(&self, index: i64) -> String {
        match self {
            Frequency::Week => {
                let start = date_from_epoch_days(index * 7 - 3);
                let end = start + Duration::days(6);
                format!("{}/{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
            }
            Frequency::Month => format!(
                "{:04}-{:02}",
                index.div_euclid(12),
                index.rem_euclid(12) + 1
            ),
            Frequency::Quarter => {
                format!("{}Q{}", index.div_euclid(4), index.rem_euclid(4) + 1)
            }
        }
    }

    /// Reject frequencies outside of `allowed` with a configuration error
    pub fn ensure_one_of(self, allowed: &[Frequency]) -> Result<Self, AnalyticsError> {
        if allowed.contains(&self) {
            Ok(self)
        } else {
            Err(AnalyticsError::Configuration {
                given: self.code().to_string(),
                expected: expected_codes(allowed),
            })
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Frequency {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "w" | "week" | "weekly" => Ok(Frequency::Week),
            "m" | "month" | "monthly" => Ok(Frequency::Month),
            "q" | "quarter" | "quarterly" => Ok(Frequency::Quarter),
            _ => Err(AnalyticsError::Configuration {
                given: s.to_string(),
                expected: expected_codes(&[Frequency::Week, Frequency::Month, Frequency::Quarter]),
            }),
        }
    }
}

fn expected_codes(allowed: &[Frequency]) -> String {
    let codes: Vec<&str> = allowed.iter().map(|f| f.code()).collect();
    format!("{{{}}}", codes.join(", "))
}

/// Days between 1970-01-01 and `date`, the physical encoding of a polars `Date`
pub fn days_since_epoch(date: NaiveDate) -> i64 {
    date.signed_duration_since(NaiveDate::default()).num_days()
}

pub fn date_from_epoch_days(days: i64) -> NaiveDate {
    NaiveDate::default() + Duration::days(days)
}
