use crate::domain::dates::{MonthAnchor, week_start_date};
use crate::domain::models::{Habit, Task};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

pub const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Month padded to whole Monday-start weeks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
    month: MonthAnchor,
    weeks: Vec<[NaiveDate; 7]>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CalendarDayView<'a> {
    pub date: NaiveDate,
    pub in_month: bool,
    pub is_today: bool,
    pub tasks: Vec<&'a Task>,
    pub habits: Vec<&'a Habit>,
}

impl MonthGrid {
    pub fn build(month: MonthAnchor) -> Self {
        let last_day = month.last_day();
        let mut cursor = week_start_date(month.first_day());
        let mut weeks = Vec::new();

        // After each 7-day step the cursor is a Monday again, so stopping once it
        // has passed the month leaves only whole weeks.
        loop {
            let mut week = [cursor; 7];
            for (offset, slot) in week.iter_mut().enumerate() {
                *slot = cursor + Duration::days(offset as i64);
            }
            weeks.push(week);
            cursor += Duration::days(7);
            if cursor > last_day {
                break;
            }
        }

        Self { month, weeks }
    }

    pub fn month(&self) -> MonthAnchor {
        self.month
    }

    pub fn weeks(&self) -> &[[NaiveDate; 7]] {
        &self.weeks
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.weeks.iter().flatten().copied()
    }

    pub fn day_views<'a>(
        &self,
        today: NaiveDate,
        tasks: &'a [Task],
        habits: &'a [Habit],
    ) -> Vec<Vec<CalendarDayView<'a>>> {
        self.weeks
            .iter()
            .map(|week| {
                week.iter()
                    .map(|&date| CalendarDayView {
                        date,
                        in_month: self.month.contains(date),
                        is_today: date == today,
                        tasks: tasks.iter().filter(|task| task.date == date).collect(),
                        habits: habits
                            .iter()
                            .filter(|habit| habit.covers(date) && habit.is_completed_on(date))
                            .collect(),
                    })
                    .collect()
            })
            .collect()
    }
}
