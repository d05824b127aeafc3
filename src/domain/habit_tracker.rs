use crate::domain::dates::MonthAnchor;
use crate::domain::models::Habit;
use crate::domain::streak::compute_streak;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HabitCell {
    pub date: NaiveDate,
    pub within_range: bool,
    pub done: bool,
}

/// One habit across a month. Cells outside the habit range cannot be toggled.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HabitTrackerRow {
    pub habit_id: String,
    pub name: String,
    pub color: String,
    pub streak: u32,
    pub cells: Vec<HabitCell>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DailyCompletionCount {
    pub date: NaiveDate,
    pub count: usize,
}

pub fn habit_tracker_rows(habits: &[Habit], month: MonthAnchor) -> Vec<HabitTrackerRow> {
    let days = month.days();
    habits
        .iter()
        .map(|habit| HabitTrackerRow {
            habit_id: habit.id.clone(),
            name: habit.name.clone(),
            color: habit.color.clone(),
            streak: compute_streak(habit, &days),
            cells: days
                .iter()
                .map(|&date| HabitCell {
                    date,
                    within_range: habit.covers(date),
                    done: habit.is_completed_on(date),
                })
                .collect(),
        })
        .collect()
}

/// Number of habits with a recorded completion on each day, range or not.
pub fn completion_counts(habits: &[Habit], days: &[NaiveDate]) -> Vec<DailyCompletionCount> {
    days.iter()
        .map(|&date| DailyCompletionCount {
            date,
            count: habits.iter().filter(|habit| habit.is_completed_on(date)).count(),
        })
        .collect()
}
