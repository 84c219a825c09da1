use std::cell::{Cell, RefCell};
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tasktrack_core::db::{
    Backend, Connection, Cursor, DbError, DbResult, Dialect, DriverError, HandleState,
    ResourceKind, Row, ScopedHandle, Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connect(u32),
    CursorOpen(u32),
    Execute(u32, String),
    Commit(u32),
    Rollback(u32),
    CursorClose(u32),
    ConnectionClose(u32),
}

type Log = Rc<RefCell<Vec<Event>>>;

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    connect: bool,
    cursor: bool,
    cursor_close: bool,
    connection_close: bool,
}

struct RecordingBackend {
    log: Log,
    next_id: Cell<u32>,
    faults: Faults,
}

impl RecordingBackend {
    fn new() -> Self {
        Self::with_faults(Faults::default())
    }

    fn with_faults(faults: Faults) -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(1),
            faults,
        }
    }

    fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
        self.log.borrow().iter().filter(|event| wanted(event)).count()
    }
}

fn fault(message: &str) -> DriverError {
    DriverError::Message(message.to_string())
}

impl Backend for RecordingBackend {
    type Connection = RecordingConnection;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self) -> DbResult<RecordingConnection> {
        if self.faults.connect {
            return Err(DbError::Acquisition(fault("connection refused")));
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.log.borrow_mut().push(Event::Connect(id));
        Ok(RecordingConnection {
            id,
            log: Rc::clone(&self.log),
            faults: self.faults,
            closed: false,
        })
    }
}

struct RecordingConnection {
    id: u32,
    log: Log,
    faults: Faults,
    closed: bool,
}

impl Connection for RecordingConnection {
    type Cursor = RecordingCursor;

    fn cursor(&mut self) -> DbResult<RecordingCursor> {
        if self.faults.cursor {
            return Err(DbError::Statement(fault("out of cursors")));
        }
        self.log.borrow_mut().push(Event::CursorOpen(self.id));
        Ok(RecordingCursor {
            id: self.id,
            log: Rc::clone(&self.log),
            fail_close: self.faults.cursor_close,
            closed: false,
        })
    }

    fn commit(&mut self) -> DbResult<()> {
        self.log.borrow_mut().push(Event::Commit(self.id));
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.log.borrow_mut().push(Event::Rollback(self.id));
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        self.log.borrow_mut().push(Event::ConnectionClose(self.id));
        if self.faults.connection_close {
            return Err(DbError::teardown(
                ResourceKind::Connection,
                fault("socket reset"),
            ));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct RecordingCursor {
    id: u32,
    log: Log,
    fail_close: bool,
    closed: bool,
}

impl Cursor for RecordingCursor {
    fn execute(&mut self, sql: &str, _params: &[Value]) -> DbResult<u64> {
        self.log
            .borrow_mut()
            .push(Event::Execute(self.id, sql.to_string()));
        if sql.starts_with("BROKEN") {
            return Err(DbError::Statement(fault("syntax error")));
        }
        Ok(0)
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        self.execute(sql, &[]).map(|_| ())
    }

    fn fetch_one(&mut self) -> DbResult<Option<Row>> {
        Ok(None)
    }

    fn fetch_all(&mut self) -> DbResult<Vec<Row>> {
        Ok(Vec::new())
    }

    fn rowcount(&self) -> Option<u64> {
        None
    }

    fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        self.log.borrow_mut().push(Event::CursorClose(self.id));
        if self.fail_close {
            return Err(DbError::teardown(ResourceKind::Cursor, fault("already gone")));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug)]
enum BodyError {
    Db(DbError),
    Domain(&'static str),
}

impl Display for BodyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Domain(message) => write!(f, "{message}"),
        }
    }
}

impl From<DbError> for BodyError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

#[test]
fn successful_scope_closes_cursor_then_connection_exactly_once() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    handle
        .run(|scope| {
            scope.cursor().execute("SELECT 1", &[])?;
            scope.commit()
        })
        .unwrap();

    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(
        backend.events(),
        vec![
            Event::Connect(1),
            Event::CursorOpen(1),
            Event::Execute(1, "SELECT 1".to_string()),
            Event::Commit(1),
            Event::CursorClose(1),
            Event::ConnectionClose(1),
        ]
    );
}

#[test]
fn body_error_is_returned_and_resources_are_still_released() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    let err = handle
        .run(|scope| -> Result<(), BodyError> {
            scope.cursor().execute("INSERT INTO t VALUES (1)", &[])?;
            Err(BodyError::Domain("task name rejected"))
        })
        .unwrap_err();

    assert!(matches!(err, BodyError::Domain("task name rejected")));
    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(backend.count(|e| matches!(e, Event::CursorClose(_))), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::ConnectionClose(_))), 1);
}

#[test]
fn statement_error_reaches_caller_unchanged() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    let err = handle
        .run(|scope| scope.cursor().execute("BROKEN SQL", &[]))
        .unwrap_err();

    match err {
        DbError::Statement(DriverError::Message(message)) => assert_eq!(message, "syntax error"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        &backend.events()[3..],
        &[Event::CursorClose(1), Event::ConnectionClose(1)]
    );
}

#[test]
fn teardown_errors_never_mask_the_body_error() {
    let backend = RecordingBackend::with_faults(Faults {
        cursor_close: true,
        connection_close: true,
        ..Faults::default()
    });
    let mut handle = ScopedHandle::new(&backend);

    let err = handle
        .run(|scope| scope.cursor().execute("BROKEN SQL", &[]))
        .unwrap_err();

    assert!(matches!(err, DbError::Statement(_)));
    assert_eq!(backend.count(|e| matches!(e, Event::CursorClose(_))), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::ConnectionClose(_))), 1);
    assert_eq!(handle.state(), HandleState::Closed);
}

#[test]
fn teardown_error_is_reported_when_the_body_succeeded() {
    let backend = RecordingBackend::with_faults(Faults {
        cursor_close: true,
        ..Faults::default()
    });
    let mut handle = ScopedHandle::new(&backend);

    let err = handle.run(|_scope| Ok::<_, DbError>(())).unwrap_err();

    assert!(matches!(
        err,
        DbError::Teardown {
            resource: ResourceKind::Cursor,
            ..
        }
    ));
    // The connection is still released after the cursor failed to close.
    assert_eq!(backend.count(|e| matches!(e, Event::ConnectionClose(_))), 1);
}

#[test]
fn connect_failure_creates_no_cursor_and_closes_nothing() {
    let backend = RecordingBackend::with_faults(Faults {
        connect: true,
        ..Faults::default()
    });
    let mut handle = ScopedHandle::new(&backend);

    let err = handle.enter().err().expect("connect must fail");

    assert!(matches!(err, DbError::Acquisition(_)));
    assert!(backend.events().is_empty());
    assert_eq!(handle.state(), HandleState::Unopened);
}

#[test]
fn cursor_failure_releases_the_connection() {
    let backend = RecordingBackend::with_faults(Faults {
        cursor: true,
        ..Faults::default()
    });
    let mut handle = ScopedHandle::new(&backend);

    let err = handle.enter().err().expect("cursor must fail");

    assert!(matches!(err, DbError::Statement(_)));
    assert_eq!(
        backend.events(),
        vec![Event::Connect(1), Event::ConnectionClose(1)]
    );
    assert_eq!(handle.state(), HandleState::Closed);
}

#[test]
fn sequential_scopes_use_independent_connections() {
    let backend = RecordingBackend::new();

    let mut first = ScopedHandle::new(&backend);
    first
        .run(|scope| scope.cursor().execute("SELECT 1", &[]))
        .unwrap();

    let mut second = ScopedHandle::new(&backend);
    let mut scope = second.enter().unwrap();
    scope.cursor().execute("SELECT 2", &[]).unwrap();
    assert!(!scope.connection().is_closed());
    scope.close().unwrap();

    assert_eq!(first.state(), HandleState::Closed);
    assert_eq!(second.state(), HandleState::Closed);
    assert_eq!(
        backend.events(),
        vec![
            Event::Connect(1),
            Event::CursorOpen(1),
            Event::Execute(1, "SELECT 1".to_string()),
            Event::CursorClose(1),
            Event::ConnectionClose(1),
            Event::Connect(2),
            Event::CursorOpen(2),
            Event::Execute(2, "SELECT 2".to_string()),
            Event::CursorClose(2),
            Event::ConnectionClose(2),
        ]
    );
}

#[test]
fn empty_scope_closes_cleanly() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    handle.enter().unwrap().close().unwrap();

    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(
        backend.events(),
        vec![
            Event::Connect(1),
            Event::CursorOpen(1),
            Event::CursorClose(1),
            Event::ConnectionClose(1),
        ]
    );
}

#[test]
fn handle_is_single_use() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);
    handle.enter().unwrap().close().unwrap();

    let err = handle.enter().err().expect("re-entry must fail");

    assert!(matches!(err, DbError::HandleReused(HandleState::Closed)));
    assert_eq!(backend.count(|e| matches!(e, Event::Connect(_))), 1);
}

#[test]
fn handle_never_commits_or_rolls_back_on_exit() {
    let backend = RecordingBackend::new();

    ScopedHandle::new(&backend)
        .run(|scope| scope.cursor().execute("UPDATE t SET x = 1", &[]))
        .unwrap();
    let _ = ScopedHandle::new(&backend).run(|scope| scope.cursor().execute("BROKEN", &[]));

    assert_eq!(
        backend.count(|e| matches!(e, Event::Commit(_) | Event::Rollback(_))),
        0
    );
}

#[test]
fn dropping_an_open_scope_releases_resources() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    {
        let mut scope = handle.enter().unwrap();
        scope.cursor().execute("SELECT 1", &[]).unwrap();
    }

    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(
        &backend.events()[3..],
        &[Event::CursorClose(1), Event::ConnectionClose(1)]
    );
}

#[test]
fn panic_inside_scope_still_releases_resources() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _scope = handle.enter().unwrap();
        panic!("handler bug");
    }));

    assert!(outcome.is_err());
    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(backend.count(|e| matches!(e, Event::CursorClose(_))), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::ConnectionClose(_))), 1);
}

#[test]
fn cursor_closed_by_caller_is_not_closed_again() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    handle
        .run(|scope| {
            scope.cursor().close()?;
            Ok::<_, DbError>(())
        })
        .unwrap();

    assert_eq!(backend.count(|e| matches!(e, Event::CursorClose(_))), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::ConnectionClose(_))), 1);
}

#[test]
fn connection_closed_inside_scope_is_not_closed_again() {
    let backend = RecordingBackend::new();
    let mut handle = ScopedHandle::new(&backend);

    handle.run(|scope| scope.connection().close()).unwrap();

    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(
        backend.events(),
        vec![
            Event::Connect(1),
            Event::CursorOpen(1),
            Event::ConnectionClose(1),
            Event::CursorClose(1),
        ]
    );
}
