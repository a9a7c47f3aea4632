//! Goal list: personal goals, their tasks, and a shareable profile card.
//!
//! The library hosts the persistence stores, the form rules, the profile
//! image compositor and the axum router. The `goallistd` binary serves the
//! router; the `goallist` binary is a small administration CLI.

pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod goals;
pub mod interfaces;
pub mod logging;
pub mod profile_image;
pub mod runtime_paths;
pub mod scheduler;
pub mod schema;
pub mod server;
pub mod sessions;
pub mod tasks;

pub type Result<T> = std::result::Result<T, error::GoalListError>;

pub fn version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), "+", env!("GOALLIST_GIT_SHA"))
}
