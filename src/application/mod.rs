pub mod auth;
pub mod bootstrap;
pub mod commands;
pub mod event_import;
pub mod sync_queue;
