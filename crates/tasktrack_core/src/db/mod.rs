//! Database access: driver contracts, backends and the scoped handle.
//!
//! # Responsibility
//! - Define the backend-neutral `Backend`/`Connection`/`Cursor` contracts.
//! - Provide SQLite and PostgreSQL backends.
//! - Guarantee release of every connection/cursor pair via `ScopedHandle`.
//!
//! # Invariants
//! - A cursor never outlives the connection it was derived from.
//! - A connection is owned by exactly one scope and never reused.
//! - The handle never commits or rolls back on behalf of the caller.

use crate::config::ConfigError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod driver;
pub mod pg;
pub mod schema;
pub mod scope;
pub mod sqlite;
pub mod value;

pub use driver::{Backend, Connection, Cursor, Dialect};
pub use pg::PgBackend;
pub use scope::{HandleState, Scope, ScopedHandle};
pub use sqlite::SqliteBackend;
pub use value::{Row, Value};

pub type DbResult<T> = Result<T, DbError>;

/// Failure reported by the underlying driver.
#[derive(Debug)]
pub enum DriverError {
    Sqlite(rusqlite::Error),
    Postgres(postgres::Error),
    /// Driver-agnostic failure (value conversion, custom backends).
    Message(String),
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Postgres(err) => write!(f, "{err}"),
            Self::Message(message) => write!(f, "{message}"),
        }
    }
}

impl Error for DriverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Postgres(err) => Some(err),
            Self::Message(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<postgres::Error> for DriverError {
    fn from(value: postgres::Error) -> Self {
        Self::Postgres(value)
    }
}

/// Resource owned by a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cursor,
    Connection,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cursor => write!(f, "cursor"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

#[derive(Debug)]
pub enum DbError {
    /// Establishing the connection failed; nothing was acquired.
    Acquisition(DriverError),
    /// A statement, fetch, commit or rollback failed inside a scope.
    Statement(DriverError),
    /// Closing the cursor or the connection failed.
    Teardown {
        resource: ResourceKind,
        source: DriverError,
    },
    /// Operation on a cursor or connection that was already closed.
    Closed(ResourceKind),
    /// `enter` was called on a handle that already left `Unopened`.
    HandleReused(HandleState),
    /// A fetched value could not be converted to the requested type.
    InvalidData(String),
    Config(ConfigError),
}

impl DbError {
    pub fn statement(err: impl Into<DriverError>) -> Self {
        Self::Statement(err.into())
    }

    pub fn acquisition(err: impl Into<DriverError>) -> Self {
        Self::Acquisition(err.into())
    }

    pub fn teardown(resource: ResourceKind, err: impl Into<DriverError>) -> Self {
        Self::Teardown {
            resource,
            source: err.into(),
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquisition(err) => write!(f, "failed to establish connection: {err}"),
            Self::Statement(err) => write!(f, "statement failed: {err}"),
            Self::Teardown { resource, source } => {
                write!(f, "failed to close {resource}: {source}")
            }
            Self::Closed(resource) => write!(f, "{resource} is already closed"),
            Self::HandleReused(state) => {
                write!(f, "scoped handle is single-use; current state is `{state}`")
            }
            Self::InvalidData(message) => write!(f, "invalid column data: {message}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Acquisition(err) | Self::Statement(err) => Some(err),
            Self::Teardown { source, .. } => Some(source),
            Self::Config(err) => Some(err),
            Self::Closed(_) | Self::HandleReused(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ConfigError> for DbError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}
