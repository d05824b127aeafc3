use crate::domain::dates::ISO_DATE_FORMAT;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

pub const DEFAULT_EVENT_TITLE: &str = "Event";
const TASK_EVENT_START_HOUR: u32 = 9;
const TASK_EVENT_DURATION_MINUTES: i64 = 60;

/// `start`/`end` of a calendar event: `date` for all-day events, `dateTime` otherwise.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl CalendarEventTime {
    pub fn at(value: DateTime<Utc>) -> Self {
        Self {
            date: None,
            date_time: Some(value.to_rfc3339()),
            time_zone: None,
        }
    }

    /// Calendar date of this time: the all-day date when present, else the date part of `dateTime`.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        if let Some(date) = self.date.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            return NaiveDate::parse_from_str(date, ISO_DATE_FORMAT).ok();
        }
        let date_time = self.date_time.as_deref()?.trim();
        let date_part = date_time.get(..10)?;
        NaiveDate::parse_from_str(date_part, ISO_DATE_FORMAT).ok()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub start: CalendarEventTime,
    #[serde(default)]
    pub end: CalendarEventTime,
}

impl GoogleCalendarEvent {
    pub fn new(summary: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: None,
            summary: Some(summary.to_string()),
            status: None,
            start: CalendarEventTime::at(start),
            end: CalendarEventTime::at(end),
        }
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start.calendar_date()
    }

    /// Trimmed summary, or `"Event"` when missing or blank. Matches the title stored on tasks.
    pub fn title(&self) -> String {
        match self.summary.as_deref().map(str::trim) {
            Some(summary) if !summary.is_empty() => summary.to_string(),
            _ => DEFAULT_EVENT_TITLE.to_string(),
        }
    }
}

/// One-hour slot at 09:00 UTC on `date`, the placement used for task events.
pub fn task_event_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_time = NaiveTime::from_hms_opt(TASK_EVENT_START_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
    let start = Utc.from_utc_datetime(&date.and_time(start_time));
    (start, start + Duration::minutes(TASK_EVENT_DURATION_MINUTES))
}
