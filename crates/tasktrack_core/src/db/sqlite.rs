//! SQLite backend.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas and busy timeout before use.
//! - Emulate driver-style implicit transactions on top of SQLite autocommit.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Timestamps are stored as RFC 3339 UTC text with microsecond precision,
//!   uuids as lowercase hyphenated text.
//! - Every in-memory connection is a separate, empty database.

use super::driver::{Backend, Connection, Cursor, Dialect};
use super::{DbError, DbResult, ResourceKind, Row, Value};
use chrono::SecondsFormat;
use log::{error, info};
use rusqlite::params_from_iter;
use rusqlite::types::{Value as SqlValue, ValueRef};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Session = Rc<RefCell<Option<rusqlite::Connection>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    File(PathBuf),
    Memory,
}

/// Backend opening a fresh SQLite connection per scope.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    target: Target,
    busy_timeout: Duration,
}

impl SqliteBackend {
    /// Targets a database file. The file is created on first connect.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            target: Target::File(path.as_ref().to_path_buf()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            target: Target::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Sets how long a statement waits on a locked database before failing.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File(path) => Some(path.as_path()),
            Target::Memory => None,
        }
    }

    fn mode(&self) -> &'static str {
        match self.target {
            Target::File(_) => "file",
            Target::Memory => "memory",
        }
    }

    fn open_raw(&self) -> rusqlite::Result<rusqlite::Connection> {
        let conn = match &self.target {
            Target::File(path) => rusqlite::Connection::open(path)?,
            Target::Memory => rusqlite::Connection::open_in_memory()?,
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

impl Backend for SqliteBackend {
    type Connection = SqliteConnection;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self) -> DbResult<SqliteConnection> {
        let started_at = Instant::now();
        let mode = self.mode();
        info!("event=db_connect module=db status=start backend=sqlite mode={mode}");

        match self.open_raw() {
            Ok(conn) => {
                info!(
                    "event=db_connect module=db status=ok backend=sqlite mode={} duration_ms={}",
                    mode,
                    started_at.elapsed().as_millis()
                );
                Ok(SqliteConnection {
                    session: Rc::new(RefCell::new(Some(conn))),
                })
            }
            Err(err) => {
                error!(
                    "event=db_connect module=db status=error backend=sqlite mode={} duration_ms={} error_code=db_open_failed error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(DbError::acquisition(err))
            }
        }
    }
}

/// Live SQLite session. Cursors share it and fail once it is closed.
pub struct SqliteConnection {
    session: Session,
}

impl SqliteConnection {
    fn finish_transaction(&self, verb: &str) -> DbResult<()> {
        let guard = self.session.borrow();
        let conn = guard
            .as_ref()
            .ok_or(DbError::Closed(ResourceKind::Connection))?;
        if !conn.is_autocommit() {
            conn.execute_batch(verb).map_err(DbError::statement)?;
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    type Cursor = SqliteCursor;

    fn cursor(&mut self) -> DbResult<SqliteCursor> {
        if self.is_closed() {
            return Err(DbError::Closed(ResourceKind::Connection));
        }
        Ok(SqliteCursor {
            session: Some(Rc::clone(&self.session)),
            rows: VecDeque::new(),
            rowcount: None,
        })
    }

    fn commit(&mut self) -> DbResult<()> {
        self.finish_transaction("COMMIT;")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.finish_transaction("ROLLBACK;")
    }

    fn close(&mut self) -> DbResult<()> {
        let Some(conn) = self.session.borrow_mut().take() else {
            return Ok(());
        };
        // An open transaction is rolled back by SQLite itself.
        conn.close()
            .map_err(|(_conn, err)| DbError::teardown(ResourceKind::Connection, err))
    }

    fn is_closed(&self) -> bool {
        self.session.borrow().is_none()
    }
}

/// Buffered statement channel over a `SqliteConnection`.
pub struct SqliteCursor {
    session: Option<Session>,
    rows: VecDeque<Row>,
    rowcount: Option<u64>,
}

impl SqliteCursor {
    fn session(&self) -> DbResult<&Session> {
        self.session
            .as_ref()
            .ok_or(DbError::Closed(ResourceKind::Cursor))
    }
}

impl Cursor for SqliteCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let (rows, count) = {
            let guard = self.session()?.borrow();
            let conn = guard
                .as_ref()
                .ok_or(DbError::Closed(ResourceKind::Connection))?;
            begin_implicit(conn)?;
            run_statement(conn, sql, params).map_err(DbError::statement)?
        };

        self.rows = rows;
        self.rowcount = Some(count);
        Ok(count)
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        {
            let guard = self.session()?.borrow();
            let conn = guard
                .as_ref()
                .ok_or(DbError::Closed(ResourceKind::Connection))?;
            begin_implicit(conn)?;
            conn.execute_batch(sql).map_err(DbError::statement)?;
        }

        self.rows.clear();
        self.rowcount = None;
        Ok(())
    }

    fn fetch_one(&mut self) -> DbResult<Option<Row>> {
        self.session()?;
        Ok(self.rows.pop_front())
    }

    fn fetch_all(&mut self) -> DbResult<Vec<Row>> {
        self.session()?;
        Ok(self.rows.drain(..).collect())
    }

    fn rowcount(&self) -> Option<u64> {
        self.rowcount
    }

    fn close(&mut self) -> DbResult<()> {
        self.session = None;
        self.rows.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.session.is_none()
    }
}

fn begin_implicit(conn: &rusqlite::Connection) -> DbResult<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN;").map_err(DbError::statement)?;
    }
    Ok(())
}

fn run_statement(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<(VecDeque<Row>, u64)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let bound = params.iter().map(to_sqlite);

    if columns.is_empty() {
        let changed = stmt.execute(params_from_iter(bound))?;
        return Ok((VecDeque::new(), changed as u64));
    }

    let mut rows = stmt.query(params_from_iter(bound))?;
    let mut buffered = VecDeque::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(from_sqlite(row.get_ref(index)?)?);
        }
        buffered.push_back(Row::new(Arc::clone(&columns), values));
    }

    let count = buffered.len() as u64;
    Ok((buffered, count))
}

fn to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Blob(value) => SqlValue::Blob(value.clone()),
        Value::Timestamp(value) => {
            SqlValue::Text(value.to_rfc3339_opts(SecondsFormat::Micros, true))
        }
        Value::Uuid(value) => SqlValue::Text(value.to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> rusqlite::Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(rusqlite::Error::Utf8Error)?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}
