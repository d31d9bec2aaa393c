//! Time granularity and time-range primitives.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Standard time granularities, ordered from finest to coarsest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    /// Parse a granularity from its lowercase name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "quarter" => Some(Self::Quarter),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }

    pub fn is_coarser_than(&self, other: TimeGranularity) -> bool {
        self > &other
    }

    pub fn is_finer_than(&self, other: TimeGranularity) -> bool {
        self < &other
    }

    /// The first date of the period containing `date`.
    pub fn period_begin(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => date - Days::new(u64::from(date.weekday().num_days_from_monday())),
            Self::Month => date - Days::new(u64::from(date.day0())),
            Self::Quarter => {
                let first_of_month = date - Days::new(u64::from(date.day0()));
                first_of_month - Months::new(date.month0() % 3)
            }
            Self::Year => {
                let first_of_month = date - Days::new(u64::from(date.day0()));
                first_of_month - Months::new(date.month0())
            }
        }
    }

    /// Move `date` back by `count` periods of this granularity.
    pub fn subtract_periods(&self, date: NaiveDate, count: u32) -> NaiveDate {
        match self {
            Self::Day => date - Days::new(u64::from(count)),
            Self::Week => date - Days::new(u64::from(count) * 7),
            Self::Month => date - Months::new(count),
            Self::Quarter => date - Months::new(count * 3),
            Self::Year => date - Months::new(count * 12),
        }
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A date part extracted from a time dimension (e.g. day-of-week).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DatePart {
    Dow,
    Doy,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DatePart {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dow => "dow",
            Self::Doy => "doy",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for DatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A time granularity as written in a query: either a standard grain or a
/// custom named calendar grain backed by a standard base grain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpandedGranularity {
    pub name: String,
    pub base: TimeGranularity,
}

impl ExpandedGranularity {
    pub fn standard(base: TimeGranularity) -> Self {
        Self {
            name: base.name().to_string(),
            base,
        }
    }

    pub fn custom(name: impl Into<String>, base: TimeGranularity) -> Self {
        Self {
            name: name.into(),
            base,
        }
    }

    /// Whether this is a custom calendar grain rather than a standard one.
    pub fn is_custom(&self) -> bool {
        self.name != self.base.name()
    }
}

impl PartialOrd for ExpandedGranularity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExpandedGranularity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base
            .cmp(&other.base)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl fmt::Display for ExpandedGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A window measured in whole periods of one granularity (e.g. "7 day").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricTimeWindow {
    pub count: u32,
    pub granularity: TimeGranularity,
}

impl MetricTimeWindow {
    pub fn new(count: u32, granularity: TimeGranularity) -> Self {
        Self { count, granularity }
    }
}

impl fmt::Display for MetricTimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.count, self.granularity)
    }
}

/// An inclusive date range restricting the rows a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRangeConstraint {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRangeConstraint {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        assert!(start <= end, "time range start {start} is after end {end}");
        Self { start, end }
    }

    /// Widen the range backward so a trailing window ending anywhere inside
    /// the original range has all of its input rows available.
    pub fn expand_for_window(&self, window: &MetricTimeWindow) -> Self {
        Self {
            start: window.granularity.subtract_periods(self.start, window.count),
            end: self.end,
        }
    }

    /// Widen the range backward to the beginning of the period containing its
    /// start date.
    pub fn expand_to_period_begin(&self, granularity: TimeGranularity) -> Self {
        Self {
            start: granularity.period_begin(self.start),
            end: self.end,
        }
    }
}

impl fmt::Display for TimeRangeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
