//! Google Calendar commands.

use campusdesk_core::{EventTime, TimeWindow};
use campusdesk_google::{CalendarEvent, EventDraft};
use chrono::{DateTime, Duration, Local, NaiveDate};

use crate::cli::{CalendarAction, EventArgs};
use crate::commands::App;
use crate::error::{ClientError, ClientResult};
use crate::output::{format_event_time, or_dash, truncate};

pub async fn run(app: &App, action: CalendarAction) -> ClientResult<()> {
    let calendar = app.calendar();
    match action {
        CalendarAction::Events { days, from } => {
            let first = match from {
                Some(from) => parse_date(&from)?,
                None => Local::now().date_naive(),
            };
            let window = days_window(first, days)?;
            let result = calendar.list_events(window.start, window.end).await;
            app.printer.emit_listing(result, "events", print_events)
        }
        CalendarAction::Add { event } => {
            let draft = draft(event)?;
            let result = calendar.create_event(&draft).await;
            app.printer.emit(result, |e| println!("Created {} ({})", e.summary, e.id))
        }
        CalendarAction::Update { id, event } => {
            let draft = draft(event)?;
            let result = calendar.update_event(&id, &draft).await;
            app.printer.emit(result, |e| println!("Updated {} ({})", e.summary, e.id))
        }
        CalendarAction::Rm { id } => {
            let result = calendar.delete_event(&id).await;
            app.printer.emit(result, |_| println!("Deleted {id}"))
        }
    }
}

fn parse_date(value: &str) -> ClientResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| ClientError::Input(format!("'{value}' is not a YYYY-MM-DD date: {e}")))
}

/// `days` local days starting at midnight of `first`.
fn days_window(first: NaiveDate, days: u32) -> ClientResult<TimeWindow> {
    if days == 0 {
        return Err(ClientError::Input("--days must be at least 1".to_string()));
    }
    let day = TimeWindow::for_date(first, &Local).ok_or_else(|| {
        ClientError::Input(format!("local midnight of {first} is ambiguous"))
    })?;
    let end = day.start + Duration::days(i64::from(days));
    TimeWindow::try_new(day.start, end)
        .ok_or_else(|| ClientError::Input("invalid event window".to_string()))
}

/// RFC 3339 becomes a timed event; a bare date becomes an all-day one.
fn parse_event_time(value: &str) -> ClientResult<EventTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(EventTime::from_local(dt));
    }
    parse_date(value)
        .map(EventTime::from_date)
        .map_err(|_| ClientError::Input(format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD")))
}

fn draft(args: EventArgs) -> ClientResult<EventDraft> {
    let start = parse_event_time(&args.start)?;
    let end = parse_event_time(&args.end)?;
    if start.is_all_day() != end.is_all_day() {
        return Err(ClientError::Input(
            "--start and --end must both be dates or both be date-times".to_string(),
        ));
    }
    let mut draft = EventDraft::new(args.summary, start, end);
    if let Some(description) = args.description {
        draft = draft.with_description(description);
    }
    if let Some(location) = args.location {
        draft = draft.with_location(location);
    }
    for attendee in args.attendees {
        draft = draft.with_attendee(attendee);
    }
    Ok(draft)
}

fn print_events(events: &[CalendarEvent]) {
    if events.is_empty() {
        println!("No events.");
    }
    for event in events {
        println!(
            "{:<28} {:<40} {:<16} {}",
            format_event_time(&event.start),
            truncate(&event.summary, 40),
            truncate(or_dash(event.location.as_deref()), 16),
            event.id
        );
    }
}
