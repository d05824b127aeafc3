pub mod calendar_grid;
pub mod dates;
pub mod habit_tracker;
pub mod models;
pub mod range_filter;
pub mod streak;
