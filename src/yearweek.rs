//! ISO 8601 week identifiers encoded as six-digit `YYYYWW` strings.
//!
//! The year is the ISO week-numbering year, which differs from the calendar
//! year for a few days around New Year (2024-12-30 belongs to `202501`).

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearWeek {
    year: i32,
    week: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearWeekError {
    /// Not six ASCII digits
    Format(String),
    /// Week number outside what the ISO year contains
    NoSuchWeek { year: i32, week: u32 },
}

impl Display for YearWeekError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            YearWeekError::Format(s) => write!(f, "invalid yearweek {:?}: expected YYYYWW", s),
            YearWeekError::NoSuchWeek { year, week } => {
                write!(f, "ISO year {} has no week {}", year, week)
            }
        }
    }
}

impl Error for YearWeekError {}

impl YearWeek {
    pub fn new(year: i32, week: u32) -> Result<Self, YearWeekError> {
        if !(1000..=9999).contains(&year) || NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).is_none() {
            return Err(YearWeekError::NoSuchWeek { year, week });
        }
        Ok(YearWeek { year, week })
    }

    /// The ISO week a calendar date falls in.
    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        YearWeek {
            year: iso.year(),
            week: iso.week(),
        }
    }

    /// Like `from_date`, but only for ISO years that fit the `YYYYWW` label.
    pub fn try_from_date(date: NaiveDate) -> Result<Self, YearWeekError> {
        let iso = date.iso_week();
        YearWeek::new(iso.year(), iso.week())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    /// Monday that opens this week.
    pub fn monday(&self) -> NaiveDate {
        // Validated on construction.
        NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon).unwrap_or(NaiveDate::MIN)
    }

    /// Half-open date range `[monday, next monday)`.
    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        let start = self.monday();
        (start, start + Duration::days(7))
    }

    /// The following ISO week, crossing 52- and 53-week years correctly.
    pub fn succ(&self) -> Self {
        YearWeek::from_date(self.monday() + Duration::days(7))
    }

    /// `count` consecutive weeks starting right after this one.
    pub fn following(&self, count: usize) -> Vec<YearWeek> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = *self;
        for _ in 0..count {
            cursor = cursor.succ();
            out.push(cursor);
        }
        out
    }

    /// Every week from `self` through `last`, inclusive. Empty if `last < self`.
    pub fn through(&self, last: YearWeek) -> Vec<YearWeek> {
        let mut out = Vec::new();
        let mut cursor = *self;
        while cursor <= last {
            out.push(cursor);
            cursor = cursor.succ();
        }
        out
    }
}

impl Display for YearWeek {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.week)
    }
}

impl FromStr for YearWeek {
    type Err = YearWeekError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(YearWeekError::Format(s.to_string()));
        }
        let year = trimmed[..4]
            .parse::<i32>()
            .map_err(|_| YearWeekError::Format(s.to_string()))?;
        let week = trimmed[4..]
            .parse::<u32>()
            .map_err(|_| YearWeekError::Format(s.to_string()))?;
        YearWeek::new(year, week)
    }
}

impl TryFrom<String> for YearWeek {
    type Error = YearWeekError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearWeek> for String {
    fn from(value: YearWeek) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monday_mid_january_is_week_three() {
        let yw = YearWeek::from_date(date(2024, 1, 15));
        assert_eq!(yw.to_string(), "202403");
        assert_eq!(yw.monday(), date(2024, 1, 15));
    }

    #[test]
    fn sunday_belongs_to_the_week_it_closes() {
        let yw = YearWeek::from_date(date(2024, 1, 21));
        assert_eq!(yw.to_string(), "202403");
        assert_eq!(YearWeek::from_date(date(2024, 1, 22)).to_string(), "202404");
    }

    #[test]
    fn uses_iso_year_across_new_year() {
        assert_eq!(YearWeek::from_date(date(2024, 12, 30)).to_string(), "202501");
        assert_eq!(YearWeek::from_date(date(2021, 1, 3)).to_string(), "202053");
        assert_eq!(YearWeek::from_date(date(2021, 1, 3)).monday(), date(2020, 12, 28));
    }

    #[test]
    fn succ_handles_52_and_53_week_years() {
        let w: YearWeek = "202452".parse().unwrap();
        assert_eq!(w.succ().to_string(), "202501");
        let w: YearWeek = "202052".parse().unwrap();
        assert_eq!(w.succ().to_string(), "202053");
        assert_eq!(w.succ().succ().to_string(), "202101");
    }

    #[test]
    fn following_is_contiguous_and_increasing() {
        let start: YearWeek = "202451".parse().unwrap();
        let next = start.following(4);
        let labels: Vec<String> = next.iter().map(|w| w.to_string()).collect();
        assert_eq!(labels, vec!["202452", "202501", "202502", "202503"]);
        assert!(next.windows(2).all(|p| p[0] < p[1]));
    }

    #[test]
    fn dates_outside_four_digit_years_have_no_label() {
        assert!(YearWeek::try_from_date(date(2024, 12, 30)).is_ok());
        assert!(YearWeek::try_from_date(NaiveDate::from_ymd_opt(10000, 1, 5).unwrap()).is_err());
    }

    #[test]
    fn through_is_inclusive() {
        let a: YearWeek = "202350".parse().unwrap();
        let b: YearWeek = "202402".parse().unwrap();
        assert_eq!(a.through(b).len(), 5);
        assert!(b.through(a).is_empty());
    }

    #[test]
    fn date_range_covers_seven_days() {
        let yw: YearWeek = "202403".parse().unwrap();
        let (start, end) = yw.date_range();
        assert_eq!(start, date(2024, 1, 15));
        assert_eq!(end, date(2024, 1, 22));
        assert_eq!(YearWeek::from_date(date(2024, 1, 21)), yw);
        assert_ne!(YearWeek::from_date(end), yw);
    }

    #[test]
    fn rejects_malformed_and_missing_weeks() {
        assert!(matches!("2024-3".parse::<YearWeek>(), Err(YearWeekError::Format(_))));
        assert!(matches!("20240".parse::<YearWeek>(), Err(YearWeekError::Format(_))));
        assert_eq!(
            "202453".parse::<YearWeek>(),
            Err(YearWeekError::NoSuchWeek { year: 2024, week: 53 })
        );
        assert!("202000".parse::<YearWeek>().is_err());
        assert!("202053".parse::<YearWeek>().is_ok());
    }

    #[test]
    fn serde_uses_the_string_form() {
        let yw: YearWeek = "202409".parse().unwrap();
        assert_eq!(serde_json::to_string(&yw).unwrap(), "\"202409\"");
        let back: YearWeek = serde_json::from_str("\"202409\"").unwrap();
        assert_eq!(back, yw);
        assert!(serde_json::from_str::<YearWeek>("\"202460\"").is_err());
    }
}
