//! Driver contracts implemented by every storage backend.
//!
//! # Responsibility
//! - `Backend`: the one capability a backend must supply, establishing a
//!   connection from its pre-configured parameters.
//! - `Connection`/`Cursor`: DB-API style session and statement channel.
//!
//! # Invariants
//! - The first statement after connect/commit/rollback opens an implicit
//!   transaction; nothing is committed unless the caller commits.
//! - `close` releases the resource even when it reports an error, and
//!   closing a closed resource is a no-op returning `Ok(())`.
//! - Once a connection is closed, every cursor derived from it fails with
//!   `DbError::Closed(ResourceKind::Connection)`.
//! - Statement placeholders are `$1..$n`, numbered in order of appearance.

use super::{DbResult, Row, Value};
use std::fmt::{Display, Formatter};

/// SQL flavour spoken by a backend. Used to pick DDL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// A family of database backends that can open connections.
pub trait Backend {
    type Connection: Connection;

    fn dialect(&self) -> Dialect;

    /// Establishes a new connection.
    ///
    /// # Errors
    /// - Returns `DbError::Acquisition` when the driver cannot connect.
    fn connect(&self) -> DbResult<Self::Connection>;
}

/// A live session to the backing store.
pub trait Connection {
    type Cursor: Cursor;

    /// Derives a statement-execution channel over this connection.
    fn cursor(&mut self) -> DbResult<Self::Cursor>;
    fn commit(&mut self) -> DbResult<()>;
    fn rollback(&mut self) -> DbResult<()>;
    /// Releases the session. Uncommitted work is discarded by the store.
    ///
    /// # Errors
    /// - Returns `DbError::Teardown` when the driver close call fails.
    fn close(&mut self) -> DbResult<()>;
    fn is_closed(&self) -> bool;
}

/// Statement-execution channel derived from a `Connection`.
pub trait Cursor {
    /// Executes one statement and buffers its result rows, if any.
    ///
    /// Returns the affected row count for writes, or the number of buffered
    /// rows for queries.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64>;
    /// Executes several `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> DbResult<()>;
    fn fetch_one(&mut self) -> DbResult<Option<Row>>;
    fn fetch_all(&mut self) -> DbResult<Vec<Row>>;
    /// Row count of the last `execute`, `None` before the first one.
    fn rowcount(&self) -> Option<u64>;
    fn close(&mut self) -> DbResult<()>;
    fn is_closed(&self) -> bool;
}
