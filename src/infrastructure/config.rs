use crate::domain::models::{DEFAULT_HABIT_COLOR, DEFAULT_HABIT_SPAN_DAYS, Theme};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const CONFIG_SCHEMA: u64 = 1;
const DEFAULT_APP_NAME: &str = "Habit Planner";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_CALENDAR_ID: &str = "primary";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u8,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_habit_color")]
    pub habit_default_color: String,
    #[serde(default = "default_habit_span_days")]
    pub habit_default_span_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: CONFIG_SCHEMA as u8,
            app_name: default_app_name(),
            timezone: default_timezone(),
            calendar_id: default_calendar_id(),
            theme: Theme::default(),
            habit_default_color: default_habit_color(),
            habit_default_span_days: default_habit_span_days(),
        }
    }
}

impl AppConfig {
    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone {}: {error}", self.timezone)))
    }
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_calendar_id() -> String {
    DEFAULT_CALENDAR_ID.to_string()
}

fn default_habit_color() -> String {
    DEFAULT_HABIT_COLOR.to_string()
}

fn default_habit_span_days() -> u32 {
    DEFAULT_HABIT_SPAN_DAYS
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        write_config(&path, &serde_json::to_value(AppConfig::default())?)?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != CONFIG_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let config: AppConfig = serde_json::from_value(read_config(&path)?)?;
    config.time_zone()?;
    Ok(config)
}

/// Rewrites only the `theme` key so hand-edited fields survive.
pub fn save_theme(config_dir: &Path, theme: Theme) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert("theme".to_string(), serde_json::to_value(theme)?);
    write_config(&path, &app)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleOAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

pub fn load_google_oauth_settings_from_env() -> Result<GoogleOAuthSettings, InfraError> {
    load_google_oauth_settings_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_google_oauth_settings_from_lookup<F>(lookup: F) -> Result<GoogleOAuthSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["HABIT_PLANNER_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = required_lookup_value(
        &lookup,
        &["HABIT_PLANNER_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
        "google client secret",
    )?;
    let redirect_uri = optional_lookup_value(
        &lookup,
        &["HABIT_PLANNER_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"],
    )
    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

    Ok(GoogleOAuthSettings {
        client_id,
        client_secret,
        redirect_uri,
    })
}

pub fn load_firebase_api_key_from_env() -> Result<String, InfraError> {
    load_firebase_api_key_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_firebase_api_key_from_lookup<F>(lookup: F) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    required_lookup_value(
        &lookup,
        &["HABIT_PLANNER_FIREBASE_API_KEY", "FIREBASE_API_KEY"],
        "firebase api key",
    )
}

fn required_lookup_value<F>(lookup: &F, keys: &[&str], field_name: &str) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
