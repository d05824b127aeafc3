use chrono::{DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical `YYYY-MM-DD` form of the UTC calendar date of `value`.
pub fn format_date<Tz: TimeZone>(value: &DateTime<Tz>) -> String {
    value
        .with_timezone(&Utc)
        .date_naive()
        .format(ISO_DATE_FORMAT)
        .to_string()
}

pub fn parse_iso_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), ISO_DATE_FORMAT)
        .map_err(|_| format!("'{value}' must be YYYY-MM-DD"))
}

/// Monday of the week containing `date`. Sunday closes the week.
pub fn week_start_date(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Monday 00:00 in the time zone of `value`, for the week containing `value`.
pub fn start_of_week<Tz: TimeZone>(value: &DateTime<Tz>) -> DateTime<Tz> {
    let timezone = value.timezone();
    local_midnight(&timezone, week_start_date(value.date_naive()))
}

/// First instant of `date` in `timezone`. Falls forward when midnight is skipped by a DST change.
pub fn local_midnight<Tz: TimeZone>(timezone: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    match timezone.from_local_datetime(&midnight) {
        LocalResult::Single(value) => value,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => (1..=3)
            .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
            .find_map(|candidate| timezone.from_local_datetime(&candidate).earliest())
            .unwrap_or_else(|| timezone.from_utc_datetime(&midnight)),
    }
}

/// Every day of the month, ascending. `month_index` is zero-based; an invalid index yields no days.
pub fn days_in_month(year: i32, month_index: u32) -> Vec<NaiveDate> {
    MonthAnchor::new(year, month_index)
        .map(|anchor| anchor.days())
        .unwrap_or_default()
}

/// A calendar month, identified by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthAnchor {
    first_day: NaiveDate,
}

impl MonthAnchor {
    pub fn new(year: i32, month_index: u32) -> Option<Self> {
        if month_index > 11 {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month_index + 1, 1).map(|first_day| Self { first_day })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month_index(&self) -> u32 {
        self.first_day.month0()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.days().last().copied().unwrap_or(self.first_day)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month0() == self.month_index()
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.first_day
            .iter_days()
            .take_while(|day| self.contains(*day))
            .collect()
    }

    pub fn previous(&self) -> Self {
        self.first_day
            .checked_sub_months(Months::new(1))
            .map(|first_day| Self { first_day })
            .unwrap_or(*self)
    }

    pub fn next(&self) -> Self {
        self.first_day
            .checked_add_months(Months::new(1))
            .map(|first_day| Self { first_day })
            .unwrap_or(*self)
    }
}

impl fmt::Display for MonthAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_day.format("%B %Y"))
    }
}
