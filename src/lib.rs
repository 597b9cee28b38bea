pub mod auth;
pub mod config;
pub mod history;
pub mod invitation;
pub mod notify;
pub mod permission;
pub mod recurrence;
pub mod server;
pub mod shared;
pub mod store;
#[cfg(feature = "scheduler")]
pub mod tasks;
