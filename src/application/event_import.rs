use crate::domain::dates::{MonthAnchor, local_midnight};
use crate::domain::models::{NewTask, Task, TaskPeriod};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::CalendarGateway;
use crate::infrastructure::persistence::PersistenceGateway;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;

/// Identifies one month of one user's calendar for import.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportKey {
    pub user_id: String,
    pub year: i32,
    pub month_index: u32,
}

impl ImportKey {
    pub fn new(user_id: impl Into<String>, month: MonthAnchor) -> Self {
        Self {
            user_id: user_id.into(),
            year: month.year(),
            month_index: month.month_index(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: Vec<String>,
    pub skipped_duplicates: usize,
    pub skipped_undated: usize,
    pub failed: Vec<String>,
    pub fetch_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    AlreadyImported,
    Completed(ImportReport),
}

/// Inclusive UTC bounds of `month` as seen in `timezone`.
pub fn month_window<Tz: TimeZone>(timezone: &Tz, month: MonthAnchor) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(timezone, month.first_day()).with_timezone(&Utc);
    let next_start = local_midnight(timezone, month.next().first_day()).with_timezone(&Utc);
    (start, next_start - Duration::milliseconds(1))
}

/// Imports calendar events as daily tasks, at most once per [`ImportKey`] for the
/// lifetime of the reconciler.
#[derive(Debug, Default)]
pub struct EventImportReconciler {
    processed: Mutex<HashSet<ImportKey>>,
}

impl EventImportReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, key: &ImportKey) -> bool {
        self.processed
            .lock()
            .map(|processed| processed.contains(key))
            .unwrap_or(false)
    }

    /// Claims `key`. Returns false when it was already claimed.
    fn claim(&self, key: &ImportKey) -> Result<bool, InfraError> {
        let mut processed = self
            .processed
            .lock()
            .map_err(|error| InfraError::Persistence(format!("import key lock poisoned: {error}")))?;
        Ok(processed.insert(key.clone()))
    }

    pub async fn import_month<Tz: TimeZone>(
        &self,
        key: &ImportKey,
        timezone: &Tz,
        access_token: &str,
        existing_tasks: &[Task],
        calendar: &dyn CalendarGateway,
        persistence: &dyn PersistenceGateway,
    ) -> Result<ImportOutcome, InfraError> {
        let Some(month) = MonthAnchor::new(key.year, key.month_index) else {
            return Err(InfraError::Validation(format!(
                "invalid month {}-{}",
                key.year, key.month_index
            )));
        };
        // Claimed before any await so a concurrent run for the same month is a no-op.
        if !self.claim(key)? {
            return Ok(ImportOutcome::AlreadyImported);
        }

        let (time_min, time_max) = month_window(timezone, month);
        let mut report = ImportReport::default();
        let events = match calendar.list_events(access_token, time_min, time_max).await {
            Ok(events) => events,
            Err(error) => {
                log::warn!("calendar import for {} {month} aborted: {error}", key.user_id);
                report.fetch_error = Some(error.to_string());
                return Ok(ImportOutcome::Completed(report));
            }
        };

        let mut known: HashSet<(NaiveDate, String)> = existing_tasks
            .iter()
            .map(|task| (task.date, task.title.clone()))
            .collect();

        for event in events {
            let Some(date) = event.start_date() else {
                report.skipped_undated += 1;
                continue;
            };
            let title = event.title();
            if known.contains(&(date, title.clone())) {
                report.skipped_duplicates += 1;
                continue;
            }

            let task = NewTask::new(title.clone(), date, TaskPeriod::Daily);
            match persistence.add_task(&key.user_id, task).await {
                Ok(id) => {
                    known.insert((date, title));
                    report.created.push(id);
                }
                Err(error) => {
                    log::warn!("failed to import event {title:?} on {date}: {error}");
                    report.failed.push(format!("{date} {title}: {error}"));
                }
            }
        }

        log::info!(
            "calendar import for {} {month}: created={} duplicates={} undated={} failed={}",
            key.user_id,
            report.created.len(),
            report.skipped_duplicates,
            report.skipped_undated,
            report.failed.len()
        );
        Ok(ImportOutcome::Completed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dates::parse_iso_date;
    use crate::domain::models::{Habit, HabitPatch, NewHabit, TaskPatch};
    use crate::infrastructure::event_mapper::{CalendarEventTime, GoogleCalendarEvent};
    use crate::infrastructure::persistence::{SnapshotCallback, Subscription};
    use async_trait::async_trait;
    use chrono_tz::Tz;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(value: &str) -> NaiveDate {
        parse_iso_date(value).expect("valid date")
    }

    fn all_day(summary: Option<&str>, day: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: None,
            summary: summary.map(ToOwned::to_owned),
            status: Some("confirmed".to_string()),
            start: CalendarEventTime {
                date: Some(day.to_string()),
                ..CalendarEventTime::default()
            },
            end: CalendarEventTime::default(),
        }
    }

    fn timed(summary: &str, date_time: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: None,
            summary: Some(summary.to_string()),
            status: None,
            start: CalendarEventTime {
                date_time: Some(date_time.to_string()),
                ..CalendarEventTime::default()
            },
            end: CalendarEventTime::default(),
        }
    }

    #[derive(Default)]
    struct FakeCalendar {
        responses: Mutex<VecDeque<Result<Vec<GoogleCalendarEvent>, InfraError>>>,
        windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl FakeCalendar {
        fn with_response(response: Result<Vec<GoogleCalendarEvent>, InfraError>) -> Self {
            let fake = Self::default();
            fake.responses.lock().expect("responses lock").push_back(response);
            fake
        }
    }

    #[async_trait]
    impl CalendarGateway for FakeCalendar {
        async fn list_events(
            &self,
            _access_token: &str,
            time_min: DateTime<Utc>,
            time_max: DateTime<Utc>,
        ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
            self.windows.lock().expect("windows lock").push((time_min, time_max));
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn create_event(
            &self,
            _access_token: &str,
            _title: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<String, InfraError> {
            panic!("imports must not write back to the calendar");
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        added: Mutex<Vec<NewTask>>,
        fail_titles: Vec<&'static str>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceGateway for RecordingStore {
        fn subscribe_tasks(
            &self,
            _user_id: &str,
            _callback: SnapshotCallback<Task>,
        ) -> Result<Subscription, InfraError> {
            Ok(Subscription::new(|| {}))
        }

        fn subscribe_habits(
            &self,
            _user_id: &str,
            _callback: SnapshotCallback<Habit>,
        ) -> Result<Subscription, InfraError> {
            Ok(Subscription::new(|| {}))
        }

        async fn add_task(&self, _user_id: &str, task: NewTask) -> Result<String, InfraError> {
            if self.fail_titles.contains(&task.title.as_str()) {
                return Err(InfraError::Persistence("write rejected".to_string()));
            }
            self.added.lock().expect("added lock").push(task);
            Ok(format!("t{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }

        async fn update_task(&self, _: &str, _: &str, _: TaskPatch) -> Result<(), InfraError> {
            Ok(())
        }

        async fn delete_task(&self, _: &str, _: &str) -> Result<(), InfraError> {
            Ok(())
        }

        async fn add_habit(&self, _: &str, _: NewHabit) -> Result<String, InfraError> {
            Ok("h".to_string())
        }

        async fn update_habit(&self, _: &str, _: &str, _: HabitPatch) -> Result<(), InfraError> {
            Ok(())
        }

        async fn delete_habit(&self, _: &str, _: &str) -> Result<(), InfraError> {
            Ok(())
        }
    }

    fn june_key() -> ImportKey {
        ImportKey::new("u1", MonthAnchor::new(2024, 5).expect("june"))
    }

    fn existing_dentist() -> Vec<Task> {
        vec![NewTask::new("Dentist", date("2024-06-01"), TaskPeriod::Weekly).with_id("t-existing")]
    }

    #[tokio::test]
    async fn same_date_and_title_is_skipped_and_different_title_is_created() {
        let calendar = FakeCalendar::with_response(Ok(vec![
            all_day(Some("Dentist"), "2024-06-01"),
            all_day(Some("Dentist follow-up"), "2024-06-01"),
        ]));
        let store = RecordingStore::default();
        let reconciler = EventImportReconciler::new();

        let outcome = reconciler
            .import_month(&june_key(), &Utc, "token", &existing_dentist(), &calendar, &store)
            .await
            .expect("import");

        let ImportOutcome::Completed(report) = outcome else {
            panic!("expected completed import");
        };
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(report.created.len(), 1);
        let added = store.added.lock().expect("added lock");
        assert_eq!(added[0].title, "Dentist follow-up");
        assert_eq!(added[0].period, TaskPeriod::Daily);
        assert!(!added[0].completed);
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_create_a_single_task() {
        let calendar = FakeCalendar::with_response(Ok(vec![
            timed("Standup", "2024-06-03T09:00:00+02:00"),
            timed("Standup", "2024-06-03T15:00:00+02:00"),
            all_day(None, "2024-06-04"),
            all_day(Some(""), "2024-06-04"),
            GoogleCalendarEvent {
                start: CalendarEventTime::default(),
                ..all_day(Some("No date"), "2024-06-05")
            },
        ]));
        let store = RecordingStore::default();
        let reconciler = EventImportReconciler::new();

        let outcome = reconciler
            .import_month(&june_key(), &Utc, "token", &[], &calendar, &store)
            .await
            .expect("import");

        let ImportOutcome::Completed(report) = outcome else {
            panic!("expected completed import");
        };
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.skipped_duplicates, 2);
        assert_eq!(report.skipped_undated, 1);
        let added = store.added.lock().expect("added lock");
        assert_eq!(added[1].title, "Event");
        assert_eq!(added[1].date, date("2024-06-04"));
    }

    #[tokio::test]
    async fn month_is_imported_once_even_after_fetch_failure() {
        let calendar = FakeCalendar::with_response(Err(InfraError::Calendar(
            "failed to fetch events: http 500".to_string(),
        )));
        let store = RecordingStore::default();
        let reconciler = EventImportReconciler::new();
        let key = june_key();

        let first = reconciler
            .import_month(&key, &Utc, "token", &[], &calendar, &store)
            .await
            .expect("import");
        match first {
            ImportOutcome::Completed(report) => {
                assert!(report.fetch_error.is_some());
                assert!(report.created.is_empty());
            }
            other => panic!("expected completed import, got {other:?}"),
        }
        assert!(reconciler.is_processed(&key));

        let second = reconciler
            .import_month(&key, &Utc, "token", &[], &calendar, &store)
            .await
            .expect("import");
        assert_eq!(second, ImportOutcome::AlreadyImported);
        assert_eq!(calendar.windows.lock().expect("windows lock").len(), 1);
    }

    #[tokio::test]
    async fn failed_create_does_not_stop_remaining_events() {
        let calendar = FakeCalendar::with_response(Ok(vec![
            all_day(Some("Broken"), "2024-06-02"),
            all_day(Some("Fine"), "2024-06-02"),
        ]));
        let store = RecordingStore {
            fail_titles: vec!["Broken"],
            ..RecordingStore::default()
        };
        let reconciler = EventImportReconciler::new();

        let outcome = reconciler
            .import_month(&june_key(), &Utc, "token", &[], &calendar, &store)
            .await
            .expect("import");
        let ImportOutcome::Completed(report) = outcome else {
            panic!("expected completed import");
        };
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn window_spans_local_month_including_last_instant() {
        let calendar = FakeCalendar::default();
        let store = RecordingStore::default();
        let reconciler = EventImportReconciler::new();
        let timezone: Tz = "Asia/Tokyo".parse().expect("known zone");

        reconciler
            .import_month(&june_key(), &timezone, "token", &[], &calendar, &store)
            .await
            .expect("import");

        let windows = calendar.windows.lock().expect("windows lock");
        let (start, end) = windows[0];
        assert_eq!(start.to_rfc3339(), "2024-05-31T15:00:00+00:00");
        assert_eq!(
            end.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "2024-06-30T14:59:59.999Z"
        );
    }

    #[tokio::test]
    async fn padded_summary_is_not_imported_again_in_a_later_session() {
        let store = RecordingStore::default();
        let key = june_key();

        let first = FakeCalendar::with_response(Ok(vec![all_day(Some(" Dentist "), "2024-06-01")]));
        EventImportReconciler::new()
            .import_month(&key, &Utc, "token", &[], &first, &store)
            .await
            .expect("first session");

        let stored: Vec<Task> = store
            .added
            .lock()
            .expect("added lock")
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, task)| task.with_id(format!("t{index}")))
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Dentist");

        let second = FakeCalendar::with_response(Ok(vec![all_day(Some(" Dentist "), "2024-06-01")]));
        let outcome = EventImportReconciler::new()
            .import_month(&key, &Utc, "token", &stored, &second, &store)
            .await
            .expect("second session");

        let ImportOutcome::Completed(report) = outcome else {
            panic!("expected a completed import");
        };
        assert!(report.created.is_empty());
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(store.added.lock().expect("added lock").len(), 1);
    }

    #[tokio::test]
    async fn blank_summary_is_imported_as_event() {
        let calendar = FakeCalendar::with_response(Ok(vec![all_day(Some("   "), "2024-06-01")]));
        let store = RecordingStore::default();

        let outcome = EventImportReconciler::new()
            .import_month(&june_key(), &Utc, "token", &[], &calendar, &store)
            .await
            .expect("import");

        let ImportOutcome::Completed(report) = outcome else {
            panic!("expected a completed import");
        };
        assert_eq!(report.created.len(), 1);
        assert!(report.failed.is_empty());
        let added = store.added.lock().expect("added lock");
        assert_eq!(added[0].title, "Event");
    }

    #[tokio::test]
    async fn different_users_and_months_have_independent_keys() {
        let calendar = FakeCalendar::default();
        let store = RecordingStore::default();
        let reconciler = EventImportReconciler::new();
        let june = MonthAnchor::new(2024, 5).expect("june");

        for key in [
            ImportKey::new("u1", june),
            ImportKey::new("u2", june),
            ImportKey::new("u1", june.next()),
        ] {
            let outcome = reconciler
                .import_month(&key, &Utc, "token", &[], &calendar, &store)
                .await
                .expect("import");
            assert!(matches!(outcome, ImportOutcome::Completed(_)));
        }
    }
}
