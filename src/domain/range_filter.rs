use crate::domain::dates::{MonthAnchor, week_start_date};
use crate::domain::models::{Task, TaskPeriod};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    #[default]
    Day,
    Week,
    Month,
}

impl FromStr for RangeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("invalid range mode: {other}")),
        }
    }
}

/// Selects the tasks shown for the active day/week/month view.
///
/// Day and week windows follow `today`; the month window follows `selected_month`
/// so other months can be browsed without moving the day and week filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeFilter {
    pub today: NaiveDate,
    pub mode: RangeMode,
    pub selected_month: MonthAnchor,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskBuckets {
    pub daily: Vec<Task>,
    pub weekly: Vec<Task>,
    pub monthly: Vec<Task>,
    pub overdue_count: usize,
}

impl RangeFilter {
    pub fn new(today: NaiveDate, mode: RangeMode, selected_month: MonthAnchor) -> Self {
        Self {
            today,
            mode,
            selected_month,
        }
    }

    /// Inclusive Monday..Sunday window containing `today`.
    pub fn week_window(&self) -> (NaiveDate, NaiveDate) {
        let start = week_start_date(self.today);
        (start, start + Duration::days(6))
    }

    pub fn includes(&self, date: NaiveDate) -> bool {
        match self.mode {
            RangeMode::Day => date == self.today,
            RangeMode::Week => {
                let (start, end) = self.week_window();
                date >= start && date <= end
            }
            RangeMode::Month => self.selected_month.contains(date),
        }
    }

    pub fn filter<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|task| self.includes(task.date)).collect()
    }

    pub fn buckets(&self, tasks: &[Task]) -> TaskBuckets {
        let mut buckets = TaskBuckets {
            overdue_count: overdue_tasks(tasks, self.today).len(),
            ..TaskBuckets::default()
        };
        for task in self.filter(tasks) {
            let bucket = match task.period {
                TaskPeriod::Daily => &mut buckets.daily,
                TaskPeriod::Weekly => &mut buckets.weekly,
                TaskPeriod::Monthly => &mut buckets.monthly,
            };
            bucket.push(task.clone());
        }
        buckets
    }
}

/// Incomplete and dated strictly before `today`, whatever the active view.
pub fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    !task.completed && task.date < today
}

pub fn overdue_tasks(tasks: &[Task], today: NaiveDate) -> Vec<&Task> {
    tasks.iter().filter(|task| is_overdue(task, today)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dates::parse_iso_date;

    fn date(value: &str) -> NaiveDate {
        parse_iso_date(value).expect("valid date")
    }

    fn task(id: &str, on: &str, period: TaskPeriod, completed: bool) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            date: date(on),
            period,
            completed,
        }
    }

    fn june() -> MonthAnchor {
        MonthAnchor::new(2024, 5).expect("valid month")
    }

    #[test]
    fn day_mode_matches_today_only() {
        let filter = RangeFilter::new(date("2024-06-05"), RangeMode::Day, june());
        assert!(filter.includes(date("2024-06-05")));
        assert!(!filter.includes(date("2024-06-04")));
        assert!(!filter.includes(date("2024-06-06")));
    }

    #[test]
    fn week_mode_spans_monday_through_sunday() {
        let filter = RangeFilter::new(date("2024-06-05"), RangeMode::Week, june());
        assert_eq!(filter.week_window(), (date("2024-06-03"), date("2024-06-09")));
        assert!(filter.includes(date("2024-06-03")));
        assert!(filter.includes(date("2024-06-09")));
        assert!(!filter.includes(date("2024-06-10")));
        assert!(!filter.includes(date("2024-06-02")));
    }

    #[test]
    fn week_mode_on_sunday_looks_back_to_monday() {
        let filter = RangeFilter::new(date("2024-06-09"), RangeMode::Week, june());
        assert_eq!(filter.week_window(), (date("2024-06-03"), date("2024-06-09")));
    }

    #[test]
    fn month_mode_follows_selected_month_not_today() {
        let march = MonthAnchor::new(2024, 2).expect("valid month");
        let filter = RangeFilter::new(date("2024-06-05"), RangeMode::Month, march);
        assert!(filter.includes(date("2024-03-31")));
        assert!(!filter.includes(date("2024-06-05")));
        assert!(!filter.includes(date("2023-03-15")));
    }

    #[test]
    fn overdue_requires_incomplete_and_past() {
        let today = date("2024-06-05");
        assert!(is_overdue(&task("a", "2024-06-04", TaskPeriod::Daily, false), today));
        assert!(!is_overdue(&task("b", "2024-06-04", TaskPeriod::Daily, true), today));
        assert!(!is_overdue(&task("c", "2024-06-05", TaskPeriod::Daily, false), today));
    }

    #[test]
    fn buckets_split_by_period_and_count_overdue_across_all_tasks() {
        let tasks = vec![
            task("1", "2024-06-05", TaskPeriod::Daily, false),
            task("2", "2024-06-06", TaskPeriod::Weekly, false),
            task("3", "2024-06-07", TaskPeriod::Monthly, true),
            task("4", "2024-06-12", TaskPeriod::Daily, false),
            task("5", "2024-05-01", TaskPeriod::Weekly, false),
        ];
        let filter = RangeFilter::new(date("2024-06-05"), RangeMode::Week, june());
        let buckets = filter.buckets(&tasks);

        assert_eq!(buckets.daily.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(buckets.weekly.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(buckets.monthly.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["3"]);
        assert_eq!(buckets.overdue_count, 1);
    }

    #[test]
    fn range_mode_parses_case_insensitively() {
        assert_eq!("Week".parse::<RangeMode>(), Ok(RangeMode::Week));
        assert!("year".parse::<RangeMode>().is_err());
    }
}
