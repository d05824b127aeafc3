pub mod config;
pub mod error;
pub mod event_mapper;
pub mod google_calendar_client;
pub mod identity_client;
pub mod oauth_client;
pub mod persistence;
pub mod sqlite_store;
