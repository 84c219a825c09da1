//! Core of the task tracker backend.
//! Owns database access, the task domain and its persistence contracts.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{load_dotenv, ConfigError, ConnectionParams};
pub use db::schema::{create_tables, drop_tables};
pub use db::{
    Backend, Connection, Cursor, DbError, DbResult, Dialect, DriverError, HandleState, PgBackend,
    ResourceKind, Row, Scope, ScopedHandle, SqliteBackend, Value,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::task::{Task, TaskId, TaskPublic, UserId};
pub use repo::task_repo::{
    InMemoryTaskRepository, RepoError, RepoResult, SqlTaskRepository, TaskRepository,
};
pub use service::task_service::TaskService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
