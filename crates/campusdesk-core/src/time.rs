//! Time types for calendar events.
//!
//! [`EventTime`] is either a specific instant or an all-day date, matching
//! the two shapes Google Calendar uses. [`TimeWindow`] is the half-open
//! range used when listing events.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Start or end of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day date.
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates an `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates an `EventTime::DateTime` from a datetime in any timezone.
    pub fn from_local<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::DateTime(dt.with_timezone(&Utc))
    }

    /// Creates an `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` for all-day times.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the datetime of a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            Self::AllDay(_) => None,
        }
    }

    /// Returns the date of an `AllDay` variant.
    pub fn as_date(&self) -> Option<&NaiveDate> {
        match self {
            Self::AllDay(d) => Some(d),
            Self::DateTime(_) => None,
        }
    }

    /// Instant used for comparisons. All-day dates map to midnight UTC.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Returns `true` when `self` is strictly before `other`.
    pub fn is_before(&self, other: &EventTime) -> bool {
        self.to_utc_datetime() < other.to_utc_datetime()
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, or `None` when `start` is after `end`.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Window starting at `now` and lasting `duration`. Negative durations
    /// produce an empty window at `now`.
    pub fn from_now(now: DateTime<Utc>, duration: Duration) -> Self {
        let end = if duration < Duration::zero() {
            now
        } else {
            now + duration
        };
        Self { start: now, end }
    }

    /// Window covering one calendar day in the given timezone.
    ///
    /// Returns `None` when local midnight is ambiguous or missing (DST edge).
    pub fn for_date<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Option<Self> {
        let start = tz
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()?
            .with_timezone(&Utc);
        let end = tz
            .from_local_datetime(&date.succ_opt()?.and_time(NaiveTime::MIN))
            .single()?
            .with_timezone(&Utc);
        Self::try_new(start, end)
    }

    /// Duration of the window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks whether `dt` falls within `[start, end)`.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn all_day_compares_at_midnight() {
        let morning = EventTime::from_utc(utc(2025, 9, 1, 9, 0));
        let day = EventTime::from_date(date(2025, 9, 1));
        assert!(day < morning);
        assert!(day.is_before(&morning));
        assert_eq!(day.to_utc_datetime(), utc(2025, 9, 1, 0, 0));
    }

    #[test]
    fn accessors() {
        let et = EventTime::from_date(date(2025, 9, 1));
        assert!(et.is_all_day());
        assert_eq!(et.as_date(), Some(&date(2025, 9, 1)));
        assert!(et.as_datetime().is_none());
    }

    #[test]
    fn serde_shape_is_tagged() {
        let et = EventTime::from_date(date(2025, 9, 1));
        let json = serde_json::to_value(&et).unwrap();
        assert_eq!(json["type"], "AllDay");
        assert_eq!(json["value"], "2025-09-01");
    }

    #[test]
    fn try_new_rejects_inverted_window() {
        assert!(TimeWindow::try_new(utc(2025, 9, 2, 0, 0), utc(2025, 9, 1, 0, 0)).is_none());
        assert!(TimeWindow::try_new(utc(2025, 9, 1, 0, 0), utc(2025, 9, 1, 0, 0)).is_some());
    }

    #[test]
    fn from_now_clamps_negative_duration() {
        let now = utc(2025, 9, 1, 12, 0);
        let window = TimeWindow::from_now(now, Duration::hours(-3));
        assert_eq!(window.duration(), Duration::zero());

        let window = TimeWindow::from_now(now, Duration::days(7));
        assert!(window.contains(utc(2025, 9, 7, 0, 0)));
        assert!(!window.contains(utc(2025, 9, 8, 12, 0)));
    }

    #[test]
    fn for_date_spans_one_day() {
        let window = TimeWindow::for_date(date(2025, 9, 1), &Utc).unwrap();
        assert_eq!(window.start, utc(2025, 9, 1, 0, 0));
        assert_eq!(window.end, utc(2025, 9, 2, 0, 0));
    }
}
