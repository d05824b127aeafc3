use crate::domain::models::Habit;
use chrono::NaiveDate;

/// Current streak of `habit` over `days`, counted backward from the most recent day.
///
/// Days outside the habit range are skipped rather than treated as gaps. The count
/// stops at the first in-range day without a completion.
pub fn compute_streak(habit: &Habit, days: &[NaiveDate]) -> u32 {
    let mut sorted = days.to_vec();
    sorted.sort_unstable_by(|left, right| right.cmp(left));

    let mut streak = 0;
    for day in sorted {
        if !habit.covers(day) {
            continue;
        }
        if !habit.is_completed_on(day) {
            break;
        }
        streak += 1;
    }
    streak
}
