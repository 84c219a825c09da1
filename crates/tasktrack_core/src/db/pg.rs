//! PostgreSQL backend over the blocking `postgres` driver.
//!
//! # Responsibility
//! - Connect with environment-sourced `ConnectionParams`.
//! - Open an implicit transaction before the first statement, like a
//!   DB-API driver; commit/rollback end it.
//! - Convert between `Value` and Postgres wire types.
//!
//! # Invariants
//! - One connect attempt per call; no retry.
//! - After a failed statement the transaction stays aborted until the
//!   caller rolls back, as Postgres itself enforces.

use super::driver::{Backend, Connection, Cursor, Dialect};
use super::{DbError, DbResult, ResourceKind, Row, Value};
use crate::config::ConnectionParams;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{error, info};
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, NoTls};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct PgSession {
    client: Option<Client>,
    in_transaction: bool,
}

type Session = Rc<RefCell<PgSession>>;

/// Backend opening a fresh PostgreSQL connection per scope.
#[derive(Debug, Clone)]
pub struct PgBackend {
    params: ConnectionParams,
    connect_timeout: Option<Duration>,
}

impl PgBackend {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            connect_timeout: None,
        }
    }

    /// Reads `DB_*` variables (after loading `.env`) and builds a backend.
    pub fn from_env() -> DbResult<Self> {
        Ok(Self::new(ConnectionParams::from_env()?))
    }

    /// Bounds how long the driver waits for the server during connect.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn open_client(&self) -> Result<Client, postgres::Error> {
        let mut config: postgres::Config = self.params.to_pg_config().parse()?;
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }
        config.connect(NoTls)
    }
}

impl Backend for PgBackend {
    type Connection = PgConnection;

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn connect(&self) -> DbResult<PgConnection> {
        let started_at = Instant::now();
        info!(
            "event=db_connect module=db status=start backend=postgres host={} port={} database={}",
            self.params.host, self.params.port, self.params.database
        );

        match self.open_client() {
            Ok(client) => {
                info!(
                    "event=db_connect module=db status=ok backend=postgres duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(PgConnection {
                    session: Rc::new(RefCell::new(PgSession {
                        client: Some(client),
                        in_transaction: false,
                    })),
                })
            }
            Err(err) => {
                error!(
                    "event=db_connect module=db status=error backend=postgres duration_ms={} error_code=db_connect_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(DbError::acquisition(err))
            }
        }
    }
}

/// Live PostgreSQL session. Cursors share it and fail once it is closed.
pub struct PgConnection {
    session: Session,
}

impl PgConnection {
    fn finish_transaction(&self, verb: &str) -> DbResult<()> {
        let mut session = self.session.borrow_mut();
        if session.client.is_none() {
            return Err(DbError::Closed(ResourceKind::Connection));
        }
        if !session.in_transaction {
            return Ok(());
        }
        // The server ends the transaction even when COMMIT reports an error.
        session.in_transaction = false;
        match session.client.as_mut() {
            Some(client) => client.batch_execute(verb).map_err(DbError::statement),
            None => Err(DbError::Closed(ResourceKind::Connection)),
        }
    }
}

impl Connection for PgConnection {
    type Cursor = PgCursor;

    fn cursor(&mut self) -> DbResult<PgCursor> {
        if self.is_closed() {
            return Err(DbError::Closed(ResourceKind::Connection));
        }
        Ok(PgCursor {
            session: Some(Rc::clone(&self.session)),
            rows: VecDeque::new(),
            rowcount: None,
        })
    }

    fn commit(&mut self) -> DbResult<()> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.finish_transaction("ROLLBACK")
    }

    fn close(&mut self) -> DbResult<()> {
        let client = {
            let mut session = self.session.borrow_mut();
            session.in_transaction = false;
            session.client.take()
        };
        match client {
            Some(client) => client
                .close()
                .map_err(|err| DbError::teardown(ResourceKind::Connection, err)),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.session.borrow().client.is_none()
    }
}

/// Buffered statement channel over a `PgConnection`.
pub struct PgCursor {
    session: Option<Session>,
    rows: VecDeque<Row>,
    rowcount: Option<u64>,
}

impl PgCursor {
    fn session(&self) -> DbResult<&Session> {
        self.session
            .as_ref()
            .ok_or(DbError::Closed(ResourceKind::Cursor))
    }
}

impl Cursor for PgCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let (rows, count) = {
            let mut session = self.session()?.borrow_mut();
            let session = &mut *session;
            let client = session
                .client
                .as_mut()
                .ok_or(DbError::Closed(ResourceKind::Connection))?;
            begin_implicit(client, &mut session.in_transaction)?;
            run_statement(client, sql, params)?
        };

        self.rows = rows;
        self.rowcount = Some(count);
        Ok(count)
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        {
            let mut session = self.session()?.borrow_mut();
            let session = &mut *session;
            let client = session
                .client
                .as_mut()
                .ok_or(DbError::Closed(ResourceKind::Connection))?;
            begin_implicit(client, &mut session.in_transaction)?;
            client.batch_execute(sql).map_err(DbError::statement)?;
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

fn begin_implicit(client: &mut Client, in_transaction: &mut bool) -> DbResult<()> {
    if !*in_transaction {
        client.batch_execute("BEGIN").map_err(DbError::statement)?;
        *in_transaction = true;
    }
    Ok(())
}

fn run_statement(
    client: &mut Client,
    sql: &str,
    params: &[Value],
) -> DbResult<(VecDeque<Row>, u64)> {
    let statement = client.prepare(sql).map_err(DbError::statement)?;
    let bound: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|value| value as &(dyn ToSql + Sync))
        .collect();

    if statement.columns().is_empty() {
        let changed = client
            .execute(&statement, &bound)
            .map_err(DbError::statement)?;
        return Ok((VecDeque::new(), changed));
    }

    let columns: Arc<[String]> = statement
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    let fetched = client
        .query(&statement, &bound)
        .map_err(DbError::statement)?;

    let mut buffered = VecDeque::with_capacity(fetched.len());
    for row in &fetched {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(from_pg(row, index)?);
        }
        buffered.push_back(Row::new(Arc::clone(&columns), values));
    }

    let count = buffered.len() as u64;
    Ok((buffered, count))
}

fn from_pg(row: &postgres::Row, index: usize) -> DbResult<Value> {
    let ty = row.columns()[index].type_().clone();
    let value = if ty == Type::BOOL {
        get::<bool>(row, index)?.map(Value::from)
    } else if ty == Type::INT2 {
        get::<i16>(row, index)?.map(|value| Value::Integer(i64::from(value)))
    } else if ty == Type::INT4 {
        get::<i32>(row, index)?.map(Value::from)
    } else if ty == Type::INT8 {
        get::<i64>(row, index)?.map(Value::from)
    } else if ty == Type::FLOAT4 {
        get::<f32>(row, index)?.map(|value| Value::Real(f64::from(value)))
    } else if ty == Type::FLOAT8 {
        get::<f64>(row, index)?.map(Value::from)
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR || ty == Type::NAME {
        get::<String>(row, index)?.map(Value::from)
    } else if ty == Type::BYTEA {
        get::<Vec<u8>>(row, index)?.map(Value::from)
    } else if ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, index)?.map(Value::from)
    } else if ty == Type::TIMESTAMP {
        get::<NaiveDateTime>(row, index)?.map(|value| Value::Timestamp(value.and_utc()))
    } else if ty == Type::UUID {
        get::<Uuid>(row, index)?.map(Value::from)
    } else {
        return Err(DbError::InvalidData(format!(
            "unsupported postgres column type `{ty}` in column `{}`",
            row.columns()[index].name()
        )));
    };
    Ok(value.unwrap_or(Value::Null))
}

fn get<'r, T>(row: &'r postgres::Row, index: usize) -> DbResult<Option<T>>
where
    T: postgres::types::FromSql<'r>,
{
    row.try_get::<_, Option<T>>(index).map_err(DbError::statement)
}

impl ToSql for Value {
    // Arms defer to the inner type's checked encoder; a column type it does
    // not accept is a `WrongType` error.
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(value) => {
                if *ty == Type::BOOL {
                    (*value != 0).to_sql_checked(ty, out)
                } else if *ty == Type::INT2 {
                    i16::try_from(*value)?.to_sql_checked(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*value)?.to_sql_checked(ty, out)
                } else {
                    value.to_sql_checked(ty, out)
                }
            }
            Value::Real(value) => {
                if *ty == Type::FLOAT4 {
                    (*value as f32).to_sql_checked(ty, out)
                } else {
                    value.to_sql_checked(ty, out)
                }
            }
            Value::Text(value) => value.as_str().to_sql_checked(ty, out),
            Value::Blob(value) => value.as_slice().to_sql_checked(ty, out),
            Value::Timestamp(value) => {
                if *ty == Type::TIMESTAMP {
                    value.naive_utc().to_sql_checked(ty, out)
                } else {
                    value.to_sql_checked(ty, out)
                }
            }
            Value::Uuid(value) => value.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
