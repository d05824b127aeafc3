use crate::domain::dates::parse_iso_date;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_HABIT_COLOR: &str = "#6366f1";
pub const DEFAULT_HABIT_SPAN_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl TaskPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl FromStr for TaskPeriod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("invalid task period: {other}")),
        }
    }
}

impl fmt::Display for TaskPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub period: TaskPeriod,
    pub completed: bool,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")
    }
}

/// A task that has not been stored yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub date: NaiveDate,
    pub period: TaskPeriod,
    pub completed: bool,
}

impl NewTask {
    pub fn new(title: impl Into<String>, date: NaiveDate, period: TaskPeriod) -> Self {
        Self {
            title: title.into().trim().to_string(),
            date,
            period,
            completed: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "task.title")
    }

    pub fn with_id(self, id: impl Into<String>) -> Task {
        Task {
            id: id.into(),
            title: self.title,
            date: self.date,
            period: self.period,
            completed: self.completed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub period: Option<TaskPeriod>,
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.date.is_none() && self.period.is_none() && self.completed.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = self.title.as_deref() {
            validate_non_empty(title, "task.title")?;
        }
        Ok(())
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(date) = self.date {
            task.date = date;
        }
        if let Some(period) = self.period {
            task.period = period;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

/// Raw edit form input. Blank fields keep the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEditRequest {
    pub title: Option<String>,
    pub date: Option<String>,
    pub period: Option<String>,
}

impl TaskEditRequest {
    pub fn into_patch(self) -> Result<TaskPatch, String> {
        let title = match self.title {
            Some(title) => {
                let title = title.trim();
                validate_non_empty(title, "task.title")?;
                Some(title.to_string())
            }
            None => None,
        };
        let date = non_blank(self.date)
            .map(|value| parse_iso_date(&value).map_err(|error| format!("task.date {error}")))
            .transpose()?;
        let period = non_blank(self.period)
            .map(|value| value.parse::<TaskPeriod>())
            .transpose()?;

        Ok(TaskPatch {
            title,
            date,
            period,
            completed: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Habit {
    pub id: String,
    pub name: String,
    pub color: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub completions: BTreeSet<NaiveDate>,
}

impl Habit {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "habit.id")?;
        validate_habit_fields(&self.name, &self.color, self.start_date, self.end_date)
    }

    /// Whether `date` lies in `[start_date, end_date]`; a missing end date is unbounded.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.is_none_or(|end| date <= end)
    }

    pub fn is_completed_on(&self, date: NaiveDate) -> bool {
        self.completions.contains(&date)
    }

    /// Completion set after toggling `date`. Only dates inside the habit range may be toggled.
    pub fn toggled_completions(&self, date: NaiveDate) -> Result<BTreeSet<NaiveDate>, String> {
        if !self.covers(date) {
            return Err(format!(
                "habit.completions: {date} is outside the habit range"
            ));
        }
        let mut completions = self.completions.clone();
        if !completions.remove(&date) {
            completions.insert(date);
        }
        Ok(completions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewHabit {
    pub name: String,
    pub color: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub completions: BTreeSet<NaiveDate>,
}

impl NewHabit {
    /// A habit running `span_days` days starting `today`.
    pub fn starting(name: impl Into<String>, color: impl Into<String>, today: NaiveDate, span_days: u32) -> Self {
        let span = i64::from(span_days.max(1)) - 1;
        Self {
            name: name.into().trim().to_string(),
            color: color.into().trim().to_string(),
            start_date: today,
            end_date: Some(today + Duration::days(span)),
            completions: BTreeSet::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_habit_fields(&self.name, &self.color, self.start_date, self.end_date)
    }

    pub fn with_id(self, id: impl Into<String>) -> Habit {
        Habit {
            id: id.into(),
            name: self.name,
            color: self.color,
            start_date: self.start_date,
            end_date: self.end_date,
            completions: self.completions,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub start_date: Option<NaiveDate>,
    /// `Some(None)` clears the end date.
    pub end_date: Option<Option<NaiveDate>>,
    pub completions: Option<BTreeSet<NaiveDate>>,
}

impl HabitPatch {
    pub fn completions(completions: BTreeSet<NaiveDate>) -> Self {
        Self {
            completions: Some(completions),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, habit: &mut Habit) {
        if let Some(name) = &self.name {
            habit.name = name.clone();
        }
        if let Some(color) = &self.color {
            habit.color = color.clone();
        }
        if let Some(start_date) = self.start_date {
            habit.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            habit.end_date = end_date;
        }
        if let Some(completions) = &self.completions {
            habit.completions = completions.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

fn validate_habit_fields(
    name: &str,
    color: &str,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
) -> Result<(), String> {
    validate_non_empty(name, "habit.name")?;
    validate_hex_color(color, "habit.color")?;
    if let Some(end_date) = end_date {
        if end_date < start_date {
            return Err("habit.end_date must be >= habit.start_date".to_string());
        }
    }
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_hex_color(value: &str, field_name: &str) -> Result<(), String> {
    let Some(digits) = value.strip_prefix('#') else {
        return Err(format!("{field_name} must be #rrggbb"));
    };
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("{field_name} must be #rrggbb"));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
