pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::auth::{AuthSession, AuthState, OAuthConfig};
pub use application::commands::AppState;
pub use domain::models::{Habit, Task, TaskPeriod, Theme, User};
pub use infrastructure::error::InfraError;

use application::bootstrap::bootstrap_workspace;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_root: String,
    pub database_path: String,
}

/// Installs the `env_logger` backend for the `log` macros used across the crate.
/// Honors `RUST_LOG`; repeated calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Prepares the workspace layout under `root`, or the current directory.
pub fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}
