//! Table setup and teardown for the task tracker store.
//!
//! # Responsibility
//! - Own the DDL for `t_news` and `t_tasks` in every supported dialect.
//! - Create or drop both tables inside one committed scope.
//!
//! # Invariants
//! - `create_tables` fails if a table already exists; it never alters.
//! - Each helper commits its own work before the scope closes.

use super::driver::{Backend, Cursor, Dialect};
use super::scope::ScopedHandle;
use super::DbResult;
use log::{error, info};

pub const NEWS_TABLE: &str = "t_news";
pub const TASKS_TABLE: &str = "t_tasks";

const NEWS_DDL_POSTGRES: &str = "CREATE TABLE t_news (
    id SERIAL PRIMARY KEY,
    published_date TIMESTAMPTZ,
    created_date TIMESTAMPTZ DEFAULT NOW(),
    created_by VARCHAR(140),
    context TEXT NOT NULL
);";

const NEWS_DDL_SQLITE: &str = "CREATE TABLE t_news (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    published_date TEXT,
    created_date TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    created_by VARCHAR(140),
    context TEXT NOT NULL
);";

const TASKS_DDL_POSTGRES: &str = "CREATE TABLE t_tasks (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    due_date TIMESTAMPTZ,
    created_at TIMESTAMPTZ DEFAULT NOW()
);";

const TASKS_DDL_SQLITE: &str = "CREATE TABLE t_tasks (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    due_date TEXT,
    created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

/// Returns the `CREATE TABLE` statements for `dialect`, in creation order.
pub fn create_statements(dialect: Dialect) -> [&'static str; 2] {
    match dialect {
        Dialect::Postgres => [NEWS_DDL_POSTGRES, TASKS_DDL_POSTGRES],
        Dialect::Sqlite => [NEWS_DDL_SQLITE, TASKS_DDL_SQLITE],
    }
}

/// Returns the `DROP TABLE` statements for `dialect`.
pub fn drop_statements(dialect: Dialect) -> [&'static str; 2] {
    match dialect {
        Dialect::Postgres => [
            "DROP TABLE IF EXISTS t_news CASCADE;",
            "DROP TABLE IF EXISTS t_tasks CASCADE;",
        ],
        Dialect::Sqlite => [
            "DROP TABLE IF EXISTS t_news;",
            "DROP TABLE IF EXISTS t_tasks;",
        ],
    }
}

/// Creates `t_news` and `t_tasks` and commits.
pub fn create_tables<B: Backend>(backend: &B) -> DbResult<()> {
    apply(backend, "schema_create", create_statements(backend.dialect()))
}

/// Drops `t_news` and `t_tasks` if present and commits.
pub fn drop_tables<B: Backend>(backend: &B) -> DbResult<()> {
    apply(backend, "schema_drop", drop_statements(backend.dialect()))
}

fn apply<B: Backend>(backend: &B, event: &str, statements: [&'static str; 2]) -> DbResult<()> {
    let dialect = backend.dialect();
    let mut handle = ScopedHandle::new(backend);
    let result = handle.run(|scope| {
        for statement in statements {
            scope.cursor().execute_batch(statement)?;
        }
        scope.commit()
    });

    match &result {
        Ok(()) => info!(
            "event={event} module=schema status=ok backend={dialect} tables={NEWS_TABLE},{TASKS_TABLE}"
        ),
        Err(err) => error!("event={event} module=schema status=error backend={dialect} error={err}"),
    }
    result
}
