use crate::application::auth::AuthState;
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::event_import::{
    EventImportReconciler, ImportKey, ImportOutcome, ImportReport,
};
use crate::application::sync_queue::{
    CalendarSyncJob, CalendarSyncQueue, JobId, RetryPolicy, SyncOutcome,
};
use crate::domain::calendar_grid::{MonthGrid, WEEKDAY_LABELS};
use crate::domain::dates::{MonthAnchor, parse_iso_date};
use crate::domain::habit_tracker::{
    DailyCompletionCount, HabitTrackerRow, completion_counts, habit_tracker_rows,
};
use crate::domain::models::{
    Habit, HabitPatch, NewHabit, NewTask, Task, TaskEditRequest, TaskPatch, TaskPeriod, Theme,
    User,
};
use crate::domain::range_filter::{RangeFilter, RangeMode, TaskBuckets, overdue_tasks};
use crate::infrastructure::config::{AppConfig, load_app_config, save_theme};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::{CalendarGateway, ReqwestGoogleCalendarClient};
use crate::infrastructure::persistence::{PersistenceGateway, SnapshotCallback, Subscription};
use crate::infrastructure::sqlite_store::SqliteDocumentStore;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Latest task and habit collections delivered by the store for the current user.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub habits: Vec<Habit>,
    pub tasks_loaded: bool,
    pub habits_loaded: bool,
}

#[derive(Default)]
struct SessionState {
    user: Option<User>,
    calendar_access_token: Option<String>,
    generation: u64,
    snapshot: Snapshot,
    subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, Copy)]
struct ViewState {
    selected_month: MonthAnchor,
    range_mode: RangeMode,
    theme: Theme,
}

/// Everything the UI layer drives: gateways, the signed-in session, view selection
/// and preferences. Must be created inside a tokio runtime.
pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    database_path: PathBuf,
    config: AppConfig,
    timezone: Tz,
    persistence: Arc<dyn PersistenceGateway>,
    calendar: Arc<dyn CalendarGateway>,
    sync_queue: CalendarSyncQueue,
    reconciler: EventImportReconciler,
    session: Arc<Mutex<SessionState>>,
    view: Mutex<ViewState>,
    now_provider: NowProvider,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = load_app_config(&bootstrap.config_dir)?;
        let persistence = Arc::new(SqliteDocumentStore::open(&bootstrap.database_path)?);
        let calendar = Arc::new(ReqwestGoogleCalendarClient::new(config.calendar_id.clone()));
        Self::from_parts(bootstrap, config, persistence, calendar, Arc::new(Utc::now))
    }

    pub fn with_gateways(
        workspace_root: PathBuf,
        persistence: Arc<dyn PersistenceGateway>,
        calendar: Arc<dyn CalendarGateway>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = load_app_config(&bootstrap.config_dir)?;
        Self::from_parts(bootstrap, config, persistence, calendar, now_provider)
    }

    fn from_parts(
        bootstrap: BootstrapResult,
        config: AppConfig,
        persistence: Arc<dyn PersistenceGateway>,
        calendar: Arc<dyn CalendarGateway>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let timezone = config.time_zone()?;
        let today = now_provider().with_timezone(&timezone).date_naive();
        let view = ViewState {
            selected_month: MonthAnchor::containing(today),
            range_mode: RangeMode::default(),
            theme: config.theme,
        };

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            database_path: bootstrap.database_path,
            timezone,
            sync_queue: CalendarSyncQueue::spawn(Arc::clone(&calendar), RetryPolicy::default()),
            config,
            persistence,
            calendar,
            reconciler: EventImportReconciler::new(),
            session: Arc::new(Mutex::new(SessionState::default())),
            view: Mutex::new(view),
            now_provider,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Today's date in the configured time zone.
    pub fn today(&self) -> NaiveDate {
        (self.now_provider)().with_timezone(&self.timezone).date_naive()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTaskResponse {
    pub task_id: String,
    pub sync_job_id: Option<JobId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskViewResponse {
    pub today: NaiveDate,
    pub mode: RangeMode,
    pub month_label: String,
    pub buckets: TaskBuckets,
    pub overdue: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitTrackerResponse {
    pub month_label: String,
    pub days: Vec<NaiveDate>,
    pub rows: Vec<HabitTrackerRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarHabitBadge {
    pub habit_id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDayResponse {
    pub date: NaiveDate,
    pub in_month: bool,
    pub is_today: bool,
    pub tasks: Vec<Task>,
    pub habits: Vec<CalendarHabitBadge>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarViewResponse {
    pub month_label: String,
    pub weekday_labels: Vec<String>,
    pub weeks: Vec<Vec<CalendarDayResponse>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ImportCalendarResponse {
    NoCalendarAccess,
    AlreadyImported,
    Imported { report: ImportReport },
}

/// Switches the signed-in user. Previous subscriptions are cancelled and the
/// snapshot is cleared; deliveries for an older user are ignored.
pub fn set_user_impl(state: &AppState, user: Option<User>) -> Result<(), InfraError> {
    let (generation, previous) = {
        let mut session = lock_session(state)?;
        session.generation += 1;
        session.user = user.clone();
        session.snapshot = Snapshot::default();
        if user.is_none() {
            session.calendar_access_token = None;
        }
        (session.generation, std::mem::take(&mut session.subscriptions))
    };
    drop(previous);

    let Some(user) = user else {
        state.log_info("set_user", "signed out");
        return Ok(());
    };

    let tasks = state.persistence.subscribe_tasks(
        &user.uid,
        snapshot_callback(&state.session, generation, |snapshot, tasks| {
            snapshot.tasks = tasks;
            snapshot.tasks_loaded = true;
        }),
    )?;
    let habits = state.persistence.subscribe_habits(
        &user.uid,
        snapshot_callback(&state.session, generation, |snapshot, habits| {
            snapshot.habits = habits;
            snapshot.habits_loaded = true;
        }),
    )?;

    let mut session = lock_session(state)?;
    if session.generation == generation {
        session.subscriptions.push(tasks);
        session.subscriptions.push(habits);
    }
    drop(session);

    state.log_info("set_user", &format!("subscribed uid={}", user.uid));
    Ok(())
}

/// Follows an [`AuthState`] change: switches user when the uid differs and keeps
/// the calendar token in step.
pub fn apply_auth_state_impl(state: &AppState, auth: &AuthState) -> Result<(), InfraError> {
    let current_uid = lock_session(state)?.user.as_ref().map(|user| user.uid.clone());
    let next_uid = auth.user.as_ref().map(|user| user.uid.as_str());
    if current_uid.as_deref() != next_uid {
        set_user_impl(state, auth.user.clone())?;
    }

    let mut session = lock_session(state)?;
    if auth.user.is_some() {
        session.user = auth.user.clone();
    }
    session.calendar_access_token = auth.calendar_access_token.clone();
    Ok(())
}

pub fn current_user_impl(state: &AppState) -> Result<Option<User>, InfraError> {
    Ok(lock_session(state)?.user.clone())
}

pub fn snapshot_impl(state: &AppState) -> Result<Snapshot, InfraError> {
    Ok(lock_session(state)?.snapshot.clone())
}

pub async fn add_task_impl(
    state: &AppState,
    title: String,
    date: Option<String>,
    period: Option<String>,
) -> Result<AddTaskResponse, InfraError> {
    let (user_id, access_token) = signed_in(state)?;
    let date = match non_blank(date) {
        Some(value) => parse_iso_date(&value).map_err(InfraError::Validation)?,
        None => state.today(),
    };
    let period = match non_blank(period) {
        Some(value) => value.parse::<TaskPeriod>().map_err(InfraError::Validation)?,
        None => TaskPeriod::Daily,
    };
    let task = NewTask::new(title, date, period);
    task.validate().map_err(InfraError::Validation)?;

    let title = task.title.clone();
    let task_id = state.persistence.add_task(&user_id, task).await?;
    state.log_info("add_task", &format!("created task_id={task_id}"));

    let sync_job_id = match access_token {
        Some(access_token) => match state.sync_queue.enqueue(CalendarSyncJob {
            access_token,
            title,
            date,
        }) {
            Ok(job_id) => Some(job_id),
            Err(error) => {
                state.log_error("add_task", &format!("calendar sync not queued: {error}"));
                None
            }
        },
        None => None,
    };

    Ok(AddTaskResponse {
        task_id,
        sync_job_id,
    })
}

/// Flips `completed` for a task in the current snapshot and returns the new value.
pub async fn toggle_task_impl(state: &AppState, task_id: String) -> Result<bool, InfraError> {
    let (user_id, _) = signed_in(state)?;
    let task = find_task(state, &task_id)?;
    let completed = !task.completed;
    state
        .persistence
        .update_task(&user_id, &task.id, TaskPatch::completed(completed))
        .await?;
    state.log_info(
        "toggle_task",
        &format!("task_id={} completed={completed}", task.id),
    );
    Ok(completed)
}

pub async fn edit_task_impl(
    state: &AppState,
    task_id: String,
    request: TaskEditRequest,
) -> Result<(), InfraError> {
    let (user_id, _) = signed_in(state)?;
    let task = find_task(state, &task_id)?;
    let patch = request.into_patch().map_err(InfraError::Validation)?;
    if patch.is_empty() {
        return Ok(());
    }
    state.persistence.update_task(&user_id, &task.id, patch).await?;
    state.log_info("edit_task", &format!("updated task_id={}", task.id));
    Ok(())
}

pub async fn delete_task_impl(state: &AppState, task_id: String) -> Result<(), InfraError> {
    let (user_id, _) = signed_in(state)?;
    let task_id = required_id(&task_id, "task_id")?;
    state.persistence.delete_task(&user_id, task_id).await?;
    state.log_info("delete_task", &format!("deleted task_id={task_id}"));
    Ok(())
}

/// Creates a habit. Missing fields fall back to the configured color and a span
/// starting today.
pub async fn add_habit_impl(
    state: &AppState,
    name: String,
    color: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
) -> Result<String, InfraError> {
    let (user_id, _) = signed_in(state)?;
    let start = match non_blank(start_date) {
        Some(value) => parse_iso_date(&value).map_err(InfraError::Validation)?,
        None => state.today(),
    };
    let color = non_blank(color).unwrap_or_else(|| state.config.habit_default_color.clone());
    let mut habit = NewHabit::starting(name, color, start, state.config.habit_default_span_days);
    if let Some(end) = non_blank(end_date) {
        habit.end_date = Some(parse_iso_date(&end).map_err(InfraError::Validation)?);
    }
    habit.validate().map_err(InfraError::Validation)?;

    let habit_id = state.persistence.add_habit(&user_id, habit).await?;
    state.log_info("add_habit", &format!("created habit_id={habit_id}"));
    Ok(habit_id)
}

/// Adds or removes `date` from a habit's completions and returns whether the
/// habit is now completed on that date.
pub async fn toggle_habit_completion_impl(
    state: &AppState,
    habit_id: String,
    date: String,
) -> Result<bool, InfraError> {
    let (user_id, _) = signed_in(state)?;
    let date = parse_iso_date(&date).map_err(InfraError::Validation)?;
    let habit = find_habit(state, &habit_id)?;
    let completions = habit
        .toggled_completions(date)
        .map_err(InfraError::Validation)?;
    let done = completions.contains(&date);

    state
        .persistence
        .update_habit(&user_id, &habit.id, HabitPatch::completions(completions))
        .await?;
    state.log_info(
        "toggle_habit_completion",
        &format!("habit_id={} date={date} done={done}", habit.id),
    );
    Ok(done)
}

pub async fn delete_habit_impl(state: &AppState, habit_id: String) -> Result<(), InfraError> {
    let (user_id, _) = signed_in(state)?;
    let habit_id = required_id(&habit_id, "habit_id")?;
    state.persistence.delete_habit(&user_id, habit_id).await?;
    state.log_info("delete_habit", &format!("deleted habit_id={habit_id}"));
    Ok(())
}

pub fn task_view_impl(state: &AppState) -> Result<TaskViewResponse, InfraError> {
    let view = current_view(state)?;
    let today = state.today();
    let filter = RangeFilter::new(today, view.range_mode, view.selected_month);
    let session = lock_session(state)?;
    let tasks = &session.snapshot.tasks;

    Ok(TaskViewResponse {
        today,
        mode: view.range_mode,
        month_label: view.selected_month.to_string(),
        buckets: filter.buckets(tasks),
        overdue: overdue_tasks(tasks, today).into_iter().cloned().collect(),
    })
}

pub fn habit_tracker_impl(state: &AppState) -> Result<HabitTrackerResponse, InfraError> {
    let month = current_view(state)?.selected_month;
    let session = lock_session(state)?;
    Ok(HabitTrackerResponse {
        month_label: month.to_string(),
        days: month.days(),
        rows: habit_tracker_rows(&session.snapshot.habits, month),
    })
}

/// Completed-habit counts for each day of the selected month.
pub fn habit_progress_impl(state: &AppState) -> Result<Vec<DailyCompletionCount>, InfraError> {
    let month = current_view(state)?.selected_month;
    let session = lock_session(state)?;
    Ok(completion_counts(&session.snapshot.habits, &month.days()))
}

pub fn calendar_view_impl(state: &AppState) -> Result<CalendarViewResponse, InfraError> {
    let month = current_view(state)?.selected_month;
    let today = state.today();
    let grid = MonthGrid::build(month);
    let session = lock_session(state)?;

    let weeks = grid
        .day_views(today, &session.snapshot.tasks, &session.snapshot.habits)
        .into_iter()
        .map(|week| {
            week.into_iter()
                .map(|day| CalendarDayResponse {
                    date: day.date,
                    in_month: day.in_month,
                    is_today: day.is_today,
                    tasks: day.tasks.into_iter().cloned().collect(),
                    habits: day
                        .habits
                        .into_iter()
                        .map(|habit| CalendarHabitBadge {
                            habit_id: habit.id.clone(),
                            name: habit.name.clone(),
                            color: habit.color.clone(),
                        })
                        .collect(),
                })
                .collect()
        })
        .collect();

    Ok(CalendarViewResponse {
        month_label: month.to_string(),
        weekday_labels: WEEKDAY_LABELS.iter().map(|label| label.to_string()).collect(),
        weeks,
    })
}

pub fn set_range_mode_impl(state: &AppState, mode: String) -> Result<RangeMode, InfraError> {
    let mode = mode.parse::<RangeMode>().map_err(InfraError::Validation)?;
    lock_view(state)?.range_mode = mode;
    Ok(mode)
}

pub fn select_previous_month_impl(state: &AppState) -> Result<MonthAnchor, InfraError> {
    let mut view = lock_view(state)?;
    view.selected_month = view.selected_month.previous();
    Ok(view.selected_month)
}

pub fn select_next_month_impl(state: &AppState) -> Result<MonthAnchor, InfraError> {
    let mut view = lock_view(state)?;
    view.selected_month = view.selected_month.next();
    Ok(view.selected_month)
}

/// Imports calendar events for the selected month once per user and month.
pub async fn import_calendar_events_impl(
    state: &AppState,
) -> Result<ImportCalendarResponse, InfraError> {
    let (user_id, access_token) = signed_in(state)?;
    let Some(access_token) = access_token else {
        return Ok(ImportCalendarResponse::NoCalendarAccess);
    };
    let month = current_view(state)?.selected_month;
    let existing_tasks = lock_session(state)?.snapshot.tasks.clone();

    let key = ImportKey::new(user_id, month);
    let outcome = state
        .reconciler
        .import_month(
            &key,
            &state.timezone,
            &access_token,
            &existing_tasks,
            state.calendar.as_ref(),
            state.persistence.as_ref(),
        )
        .await?;

    match outcome {
        ImportOutcome::AlreadyImported => Ok(ImportCalendarResponse::AlreadyImported),
        ImportOutcome::Completed(report) => {
            match &report.fetch_error {
                Some(error) => state.log_error("import_calendar_events", error),
                None => state.log_info(
                    "import_calendar_events",
                    &format!("month={month} created={}", report.created.len()),
                ),
            }
            Ok(ImportCalendarResponse::Imported { report })
        }
    }
}

pub fn sync_outcomes_impl(state: &AppState) -> Result<Vec<SyncOutcome>, InfraError> {
    state.sync_queue.history()
}

/// Waits for queued calendar writes to finish.
pub async fn shutdown_impl(state: &AppState) -> Result<(), InfraError> {
    state.sync_queue.shutdown().await
}

pub fn toggle_theme_impl(state: &AppState) -> Result<Theme, InfraError> {
    let mut view = lock_view(state)?;
    let theme = view.theme.toggled();
    save_theme(&state.config_dir, theme)?;
    view.theme = theme;
    drop(view);
    state.log_info("toggle_theme", &format!("theme={theme:?}"));
    Ok(theme)
}

pub fn preferences_impl(state: &AppState) -> Result<AppConfig, InfraError> {
    let theme = current_view(state)?.theme;
    Ok(AppConfig {
        theme,
        ..state.config.clone()
    })
}

fn snapshot_callback<T, F>(
    session: &Arc<Mutex<SessionState>>,
    generation: u64,
    apply: F,
) -> SnapshotCallback<T>
where
    T: Send + 'static,
    F: Fn(&mut Snapshot, Vec<T>) + Send + Sync + 'static,
{
    let session = Arc::downgrade(session);
    Arc::new(move |items: Vec<T>| {
        let Some(shared) = session.upgrade() else {
            return;
        };
        let Ok(mut session) = shared.lock() else {
            return;
        };
        if session.generation != generation {
            log::debug!("ignoring snapshot from stale generation {generation}");
            return;
        }
        apply(&mut session.snapshot, items);
    })
}

fn lock_session(state: &AppState) -> Result<MutexGuard<'_, SessionState>, InfraError> {
    state
        .session
        .lock()
        .map_err(|error| InfraError::Persistence(format!("session lock poisoned: {error}")))
}

fn lock_view(state: &AppState) -> Result<MutexGuard<'_, ViewState>, InfraError> {
    state
        .view
        .lock()
        .map_err(|error| InfraError::Persistence(format!("view lock poisoned: {error}")))
}

fn current_view(state: &AppState) -> Result<ViewState, InfraError> {
    Ok(*lock_view(state)?)
}

fn signed_in(state: &AppState) -> Result<(String, Option<String>), InfraError> {
    let session = lock_session(state)?;
    let user = session.user.as_ref().ok_or(InfraError::NotSignedIn)?;
    Ok((user.uid.clone(), session.calendar_access_token.clone()))
}

fn find_task(state: &AppState, task_id: &str) -> Result<Task, InfraError> {
    let task_id = required_id(task_id, "task_id")?;
    lock_session(state)?
        .snapshot
        .tasks
        .iter()
        .find(|task| task.id == task_id)
        .cloned()
        .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))
}

fn find_habit(state: &AppState, habit_id: &str) -> Result<Habit, InfraError> {
    let habit_id = required_id(habit_id, "habit_id")?;
    lock_session(state)?
        .snapshot
        .habits
        .iter()
        .find(|habit| habit.id == habit_id)
        .cloned()
        .ok_or_else(|| InfraError::NotFound(format!("habit {habit_id}")))
}

fn required_id<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::Validation(format!("{field_name} must not be empty")));
    }
    Ok(value)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
