//! Terminal and JSON rendering.

use std::borrow::Cow;

use campusdesk_core::EventTime;
use campusdesk_google::{ApiResult, Listing, Outcome};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::error::ClientResult;

/// Prints command results either as text or as [`Outcome`] JSON.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Renders `result` and hands back the error, if any, for the exit code.
    ///
    /// In JSON mode failures are printed as an outcome on stdout as well.
    pub fn emit<T: Serialize>(&self, result: ApiResult<T>, human: impl FnOnce(&T)) -> ClientResult<()> {
        match result {
            Ok(data) => {
                if self.json {
                    print_json(&Outcome::ok(&data));
                } else {
                    human(&data);
                }
                Ok(())
            }
            Err(err) => {
                if self.json {
                    print_json(&Outcome::<()>::failure(err.code(), err.message()));
                }
                Err(err.into())
            }
        }
    }

    /// Like [`emit`](Self::emit), noting dropped items on stderr.
    pub fn emit_listing<T: Serialize>(
        &self,
        result: ApiResult<Listing<T>>,
        what: &str,
        human: impl FnOnce(&[T]),
    ) -> ClientResult<()> {
        self.emit(result, |listing| {
            human(&listing.items);
            if listing.is_partial() {
                eprintln!("warning: {} {what} could not be loaded", listing.dropped);
            }
        })
    }

    /// Prints an outcome the session layer already produced.
    pub fn emit_outcome<T: Serialize>(&self, outcome: &Outcome<T>, human: impl FnOnce(&T)) {
        if self.json {
            print_json(outcome);
        } else if let Some(data) = &outcome.data {
            human(data);
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: failed to serialize output: {e}"),
    }
}

/// Cuts `text` to `max` characters, ending with an ellipsis when shortened.
pub fn truncate(text: &str, max: usize) -> Cow<'_, str> {
    if text.chars().count() <= max {
        return Cow::Borrowed(text);
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    Cow::Owned(format!("{cut}…"))
}

/// Byte count in binary units, one decimal place above bytes.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// `2025-09-01 14:30` in local time.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_event_time(time: &EventTime) -> String {
    match time {
        EventTime::DateTime(dt) => format_datetime(dt),
        EventTime::AllDay(date) => format!("{} (all day)", date.format("%Y-%m-%d")),
    }
}

/// `-` for missing values in tables.
pub fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("Physics", 10), "Physics");
        assert_eq!(truncate("Linear Algebra II", 8), "Linear …");
        assert_eq!(truncate("Überprüfung", 4), "Übe…");
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn all_day_times_are_marked() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        assert_eq!(format_event_time(&EventTime::from_date(date)), "2025-09-01 (all day)");
    }

    #[test]
    fn dash_for_missing() {
        assert_eq!(or_dash(None), "-");
        assert_eq!(or_dash(Some("")), "-");
        assert_eq!(or_dash(Some("B-204")), "B-204");
    }
}
