//! Scoped acquisition and guaranteed release of a connection/cursor pair.
//!
//! # Responsibility
//! - Connect through a `Backend`, derive one cursor, hand both to the caller.
//! - Close the cursor, then the connection, exactly once on every exit path
//!   (explicit close, error return, early drop, panic unwind).
//!
//! # Invariants
//! - Handle state only moves `Unopened -> Open -> Closed`; `Closed` is terminal.
//! - A failed connect leaves the handle `Unopened` and exposes nothing.
//! - A body error always wins over teardown errors; teardown errors on an
//!   error path are logged and dropped.
//! - The handle never commits or rolls back.

use super::driver::{Backend, Connection, Cursor, Dialect};
use super::{DbError, DbResult};
use log::{error, info, warn};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Cursor type produced by a backend's connections.
pub type CursorOf<B> = <<B as Backend>::Connection as Connection>::Cursor;

/// Lifecycle of a `ScopedHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Not entered yet (or the last connect attempt failed).
    Unopened,
    /// Connection and cursor are live.
    Open,
    /// Resources released. Terminal.
    Closed,
}

impl HandleState {
    pub fn can_transition_to(self, next: HandleState) -> bool {
        use HandleState::*;

        matches!(
            (self, next),
            (Unopened, Open) | (Unopened, Closed) | (Open, Closed)
        )
    }

    fn transition(&mut self, next: HandleState) -> DbResult<()> {
        if !self.can_transition_to(next) {
            return Err(DbError::HandleReused(*self));
        }
        *self = next;
        Ok(())
    }
}

impl Display for HandleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unopened => write!(f, "unopened"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Single-use coordinator of one connection/cursor acquisition.
///
/// The backend carries the pre-configured connection parameters; the handle
/// borrows it so several sequential handles can share one backend.
pub struct ScopedHandle<'b, B: Backend> {
    backend: &'b B,
    state: HandleState,
}

impl<'b, B: Backend> ScopedHandle<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            state: HandleState::Unopened,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Enters the scope: connects, derives a cursor, returns both.
    ///
    /// # Errors
    /// - `DbError::HandleReused` when the handle is not `Unopened`.
    /// - `DbError::Acquisition` when connecting fails; the handle stays
    ///   `Unopened` and no cursor is created.
    /// - Any cursor-derivation error; the connection is closed first and the
    ///   handle moves to `Closed`.
    pub fn enter(&mut self) -> DbResult<Scope<'_, B>> {
        if !self.state.can_transition_to(HandleState::Open) {
            return Err(DbError::HandleReused(self.state));
        }

        let dialect = self.backend.dialect();
        let started_at = Instant::now();
        info!("event=scope_enter module=db status=start backend={dialect}");

        let mut connection = match self.backend.connect() {
            Ok(connection) => connection,
            Err(err) => {
                error!(
                    "event=scope_enter module=db status=error backend={} duration_ms={} error_code=connect_failed error={}",
                    dialect,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };

        let cursor = match connection.cursor() {
            Ok(cursor) => cursor,
            Err(err) => {
                if let Err(close_err) = connection.close() {
                    warn!(
                        "event=teardown module=db status=error backend={dialect} resource=connection masked=true error={close_err}"
                    );
                }
                self.state.transition(HandleState::Closed)?;
                error!(
                    "event=scope_enter module=db status=error backend={} duration_ms={} error_code=cursor_failed error={}",
                    dialect,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };

        self.state.transition(HandleState::Open)?;
        info!(
            "event=scope_enter module=db status=ok backend={} duration_ms={}",
            dialect,
            started_at.elapsed().as_millis()
        );

        Ok(Scope {
            state: &mut self.state,
            dialect,
            connection,
            cursor,
            started_at,
            released: false,
        })
    }

    /// Runs `body` inside a scope and releases it on the way out.
    ///
    /// On success the teardown result is returned; on failure the body's
    /// error is returned and teardown errors are only logged.
    pub fn run<T, E, F>(&mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Scope<'_, B>) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut scope = self.enter()?;
        match body(&mut scope) {
            Ok(value) => {
                scope.close()?;
                Ok(value)
            }
            Err(err) => {
                scope.abandon();
                Err(err)
            }
        }
    }
}

/// Live connection/cursor pair owned by one entered `ScopedHandle`.
///
/// Dropping the scope without calling `close` still releases both
/// resources; teardown errors are then logged.
pub struct Scope<'h, B: Backend> {
    state: &'h mut HandleState,
    dialect: Dialect,
    connection: B::Connection,
    cursor: CursorOf<B>,
    started_at: Instant,
    released: bool,
}

impl<B: Backend> Scope<'_, B> {
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn cursor(&mut self) -> &mut CursorOf<B> {
        &mut self.cursor
    }

    /// Borrows the connection for commit, rollback or driver-specific calls.
    ///
    /// Closing it here, while the scope's cursor is still open, is outside
    /// the scope's contract: the exit ordering can no longer hold, and the
    /// scope only logs `error_code=connection_closed_early` when it releases.
    pub fn connection(&mut self) -> &mut B::Connection {
        &mut self.connection
    }

    /// Borrows connection and cursor at the same time. The restriction on
    /// closing the connection documented on `connection` applies.
    pub fn parts(&mut self) -> (&mut B::Connection, &mut CursorOf<B>) {
        (&mut self.connection, &mut self.cursor)
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.connection.commit()
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.connection.rollback()
    }

    /// Exits the scope, reporting the first teardown error if any.
    pub fn close(mut self) -> DbResult<()> {
        self.release()
    }

    fn abandon(mut self) {
        if let Err(err) = self.release() {
            warn!(
                "event=teardown module=db status=error backend={} masked=true error={}",
                self.dialect, err
            );
        }
    }

    fn release(&mut self) -> DbResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if self.connection.is_closed() && !self.cursor.is_closed() {
            warn!(
                "event=teardown module=db status=error backend={} resource=connection error_code=connection_closed_early",
                self.dialect
            );
        }

        // Cursor strictly before connection.
        let cursor_result = if self.cursor.is_closed() {
            Ok(())
        } else {
            self.cursor.close()
        };
        let connection_result = if self.connection.is_closed() {
            Ok(())
        } else {
            self.connection.close()
        };
        *self.state = HandleState::Closed;

        let result = cursor_result.and(connection_result);
        match &result {
            Ok(()) => info!(
                "event=scope_exit module=db status=ok backend={} duration_ms={}",
                self.dialect,
                self.started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=scope_exit module=db status=error backend={} duration_ms={} error={}",
                self.dialect,
                self.started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

impl<B: Backend> Drop for Scope<'_, B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.release() {
            warn!(
                "event=teardown module=db status=error backend={} masked=true error={}",
                self.dialect, err
            );
        }
    }
}
