use crate::domain::dates::{ISO_DATE_FORMAT, parse_iso_date};
use crate::domain::models::{Habit, HabitPatch, NewHabit, NewTask, Task, TaskPatch, TaskPeriod};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::persistence::{
    PersistenceGateway, SnapshotCallback, SubscriberRegistry, Subscription,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const TASK_COLUMNS: &str = "id, title, date, period, completed";
const HABIT_COLUMNS: &str = "id, name, color, start_date, end_date, completions";

/// SQLite-backed [`PersistenceGateway`]. Writes are last-write-wins per document and
/// every write republishes the affected user's full collection.
pub struct SqliteDocumentStore {
    connection: Mutex<Connection>,
    tasks: SubscriberRegistry<Task>,
    habits: SubscriberRegistry<Habit>,
}

impl SqliteDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InfraError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, InfraError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self, InfraError> {
        connection.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            connection: Mutex::new(connection),
            tasks: SubscriberRegistry::default(),
            habits: SubscriberRegistry::default(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, InfraError> {
        self.connection
            .lock()
            .map_err(|error| InfraError::Persistence(format!("connection lock poisoned: {error}")))
    }

    fn publish_tasks(&self, user_id: &str) -> Result<(), InfraError> {
        if !self.tasks.has_subscribers(user_id) {
            return Ok(());
        }
        let tasks = {
            let connection = self.lock()?;
            load_tasks(&connection, user_id)?
        };
        self.tasks.publish(user_id, &tasks)
    }

    fn publish_habits(&self, user_id: &str) -> Result<(), InfraError> {
        if !self.habits.has_subscribers(user_id) {
            return Ok(());
        }
        let habits = {
            let connection = self.lock()?;
            load_habits(&connection, user_id)?
        };
        self.habits.publish(user_id, &habits)
    }
}

#[async_trait]
impl PersistenceGateway for SqliteDocumentStore {
    fn subscribe_tasks(
        &self,
        user_id: &str,
        callback: SnapshotCallback<Task>,
    ) -> Result<Subscription, InfraError> {
        let user_id = required(user_id, "user id")?;
        let current = {
            let connection = self.lock()?;
            load_tasks(&connection, user_id)?
        };
        let subscription = self.tasks.register(user_id, callback.clone())?;
        callback(current);
        Ok(subscription)
    }

    fn subscribe_habits(
        &self,
        user_id: &str,
        callback: SnapshotCallback<Habit>,
    ) -> Result<Subscription, InfraError> {
        let user_id = required(user_id, "user id")?;
        let current = {
            let connection = self.lock()?;
            load_habits(&connection, user_id)?
        };
        let subscription = self.habits.register(user_id, callback.clone())?;
        callback(current);
        Ok(subscription)
    }

    async fn add_task(&self, user_id: &str, task: NewTask) -> Result<String, InfraError> {
        let user_id = required(user_id, "user id")?;
        task.validate().map_err(InfraError::Validation)?;

        let id = next_id("tsk");
        {
            let connection = self.lock()?;
            connection.execute(
                "INSERT INTO tasks (id, user_id, title, date, period, completed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    user_id,
                    task.title,
                    format_day(task.date),
                    task.period.as_str(),
                    task.completed
                ],
            )?;
        }
        self.publish_tasks(user_id)?;
        Ok(id)
    }

    async fn update_task(&self, user_id: &str, id: &str, patch: TaskPatch) -> Result<(), InfraError> {
        let user_id = required(user_id, "user id")?;
        let id = required(id, "task id")?;
        patch.validate().map_err(InfraError::Validation)?;
        {
            let connection = self.lock()?;
            let mut task = load_task(&connection, user_id, id)?
                .ok_or_else(|| InfraError::NotFound(format!("task {id}")))?;
            patch.apply_to(&mut task);
            connection.execute(
                "UPDATE tasks SET title = ?1, date = ?2, period = ?3, completed = ?4
                 WHERE id = ?5 AND user_id = ?6",
                params![
                    task.title,
                    format_day(task.date),
                    task.period.as_str(),
                    task.completed,
                    id,
                    user_id
                ],
            )?;
        }
        self.publish_tasks(user_id)
    }

    async fn delete_task(&self, user_id: &str, id: &str) -> Result<(), InfraError> {
        let user_id = required(user_id, "user id")?;
        let id = required(id, "task id")?;
        let removed = {
            let connection = self.lock()?;
            connection.execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?
        };
        if removed == 0 {
            return Err(InfraError::NotFound(format!("task {id}")));
        }
        self.publish_tasks(user_id)
    }

    async fn add_habit(&self, user_id: &str, habit: NewHabit) -> Result<String, InfraError> {
        let user_id = required(user_id, "user id")?;
        habit.validate().map_err(InfraError::Validation)?;

        let id = next_id("hab");
        {
            let connection = self.lock()?;
            connection.execute(
                "INSERT INTO habits (id, user_id, name, color, start_date, end_date, completions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    user_id,
                    habit.name,
                    habit.color,
                    format_day(habit.start_date),
                    habit.end_date.map(format_day),
                    serde_json::to_string(&habit.completions)?
                ],
            )?;
        }
        self.publish_habits(user_id)?;
        Ok(id)
    }

    async fn update_habit(&self, user_id: &str, id: &str, patch: HabitPatch) -> Result<(), InfraError> {
        let user_id = required(user_id, "user id")?;
        let id = required(id, "habit id")?;
        {
            let connection = self.lock()?;
            let mut habit = load_habit(&connection, user_id, id)?
                .ok_or_else(|| InfraError::NotFound(format!("habit {id}")))?;
            patch.apply_to(&mut habit);
            habit.validate().map_err(InfraError::Validation)?;
            connection.execute(
                "UPDATE habits SET name = ?1, color = ?2, start_date = ?3, end_date = ?4, completions = ?5
                 WHERE id = ?6 AND user_id = ?7",
                params![
                    habit.name,
                    habit.color,
                    format_day(habit.start_date),
                    habit.end_date.map(format_day),
                    serde_json::to_string(&habit.completions)?,
                    id,
                    user_id
                ],
            )?;
        }
        self.publish_habits(user_id)
    }

    async fn delete_habit(&self, user_id: &str, id: &str) -> Result<(), InfraError> {
        let user_id = required(user_id, "user id")?;
        let id = required(id, "habit id")?;
        let removed = {
            let connection = self.lock()?;
            connection.execute(
                "DELETE FROM habits WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?
        };
        if removed == 0 {
            return Err(InfraError::NotFound(format!("habit {id}")));
        }
        self.publish_habits(user_id)
    }
}

fn required<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::Validation(format!("{field_name} must not be empty")));
    }
    Ok(value)
}

fn format_day(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

fn parse_day(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    parse_iso_date(value).map_err(|error| InfraError::Persistence(format!("invalid {field_name}: {error}")))
}

type TaskRow = (String, String, String, String, bool);
type HabitRow = (String, String, String, String, Option<String>, String);

fn task_from_row((id, title, date, period, completed): TaskRow) -> Result<Task, InfraError> {
    Ok(Task {
        date: parse_day(&date, "tasks.date")?,
        period: period
            .parse::<TaskPeriod>()
            .map_err(|error| InfraError::Persistence(format!("invalid tasks.period: {error}")))?,
        id,
        title,
        completed,
    })
}

fn habit_from_row(
    (id, name, color, start_date, end_date, completions): HabitRow,
) -> Result<Habit, InfraError> {
    let completions: BTreeSet<NaiveDate> = serde_json::from_str(&completions)
        .map_err(|error| InfraError::Persistence(format!("invalid habits.completions: {error}")))?;
    Ok(Habit {
        start_date: parse_day(&start_date, "habits.start_date")?,
        end_date: end_date
            .as_deref()
            .map(|value| parse_day(value, "habits.end_date"))
            .transpose()?,
        id,
        name,
        color,
        completions,
    })
}

fn load_tasks(connection: &Connection, user_id: &str) -> Result<Vec<Task>, InfraError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY date DESC, id ASC"
    ))?;
    let rows = statement
        .query_map(params![user_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<Result<Vec<TaskRow>, _>>()?;
    rows.into_iter().map(task_from_row).collect()
}

fn load_task(connection: &Connection, user_id: &str, id: &str) -> Result<Option<Task>, InfraError> {
    let row: Option<TaskRow> = connection
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    row.map(task_from_row).transpose()
}

fn load_habits(connection: &Connection, user_id: &str) -> Result<Vec<Habit>, InfraError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {HABIT_COLUMNS} FROM habits WHERE user_id = ?1 ORDER BY start_date DESC, id ASC"
    ))?;
    let rows = statement
        .query_map(params![user_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<Result<Vec<HabitRow>, _>>()?;
    rows.into_iter().map(habit_from_row).collect()
}

fn load_habit(connection: &Connection, user_id: &str, id: &str) -> Result<Option<Habit>, InfraError> {
    let row: Option<HabitRow> = connection
        .query_row(
            &format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;
    row.map(habit_from_row).transpose()
}
