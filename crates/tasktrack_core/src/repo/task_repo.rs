//! Task repository contracts with in-memory and SQL implementations.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over task storage.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Listing order is stable: creation time, then ID. Tasks without a
//!   creation time list first in every implementation.
//! - Update and delete of an unknown ID return `RepoError::NotFound`.
//! - The SQL repository never commits; the owning scope's caller does.

use crate::db::{Cursor, DbError, Row, Value};
use crate::model::task::{Task, TaskId};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    user_id,
    name,
    description,
    due_date,
    created_at
FROM t_tasks";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for task persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(TaskId),
    AlreadyExists(TaskId),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "task already exists: {id}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::AlreadyExists(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Repository interface for task CRUD operations.
pub trait TaskRepository {
    fn create_task(&mut self, task: &Task) -> RepoResult<TaskId>;
    fn get_task(&mut self, id: TaskId) -> RepoResult<Option<Task>>;
    fn list_tasks(&mut self) -> RepoResult<Vec<Task>>;
    fn update_task(&mut self, task: &Task) -> RepoResult<()>;
    fn delete_task(&mut self, id: TaskId) -> RepoResult<()>;
}

/// Process-local task store. Contents live as long as the repository.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: Vec<Task>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, keeping the given order for equal creation times.
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == id)
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn create_task(&mut self, task: &Task) -> RepoResult<TaskId> {
        if self.position(task.id).is_some() {
            return Err(RepoError::AlreadyExists(task.id));
        }
        self.tasks.push(task.clone());
        Ok(task.id)
    }

    fn get_task(&mut self, id: TaskId) -> RepoResult<Option<Task>> {
        Ok(self.position(id).map(|index| self.tasks[index].clone()))
    }

    fn list_tasks(&mut self) -> RepoResult<Vec<Task>> {
        let mut tasks = self.tasks.clone();
        // Stable sort keeps insertion order among equal keys.
        tasks.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(tasks)
    }

    fn update_task(&mut self, task: &Task) -> RepoResult<()> {
        let index = self.position(task.id).ok_or(RepoError::NotFound(task.id))?;
        self.tasks[index] = task.clone();
        Ok(())
    }

    fn delete_task(&mut self, id: TaskId) -> RepoResult<()> {
        let index = self.position(id).ok_or(RepoError::NotFound(id))?;
        self.tasks.remove(index);
        Ok(())
    }
}

/// Task repository issuing statements through a scope's cursor.
pub struct SqlTaskRepository<'c, C: Cursor> {
    cursor: &'c mut C,
}

impl<'c, C: Cursor> SqlTaskRepository<'c, C> {
    pub fn new(cursor: &'c mut C) -> Self {
        Self { cursor }
    }
}

impl<C: Cursor> TaskRepository for SqlTaskRepository<'_, C> {
    fn create_task(&mut self, task: &Task) -> RepoResult<TaskId> {
        let mut params = vec![
            Value::from(task.id),
            Value::from(task.user_id),
            Value::from(task.name.as_str()),
            Value::from(task.description.clone()),
            Value::from(task.due_date),
        ];

        // Without a timestamp the column default stamps the row.
        let sql = match task.created_at {
            Some(created_at) => {
                params.push(Value::from(created_at));
                "INSERT INTO t_tasks (
                    id,
                    user_id,
                    name,
                    description,
                    due_date,
                    created_at
                ) VALUES ($1, $2, $3, $4, $5, $6);"
            }
            None => {
                "INSERT INTO t_tasks (
                    id,
                    user_id,
                    name,
                    description,
                    due_date
                ) VALUES ($1, $2, $3, $4, $5);"
            }
        };
        self.cursor.execute(sql, &params)?;

        Ok(task.id)
    }

    fn get_task(&mut self, id: TaskId) -> RepoResult<Option<Task>> {
        self.cursor.execute(
            &format!("{TASK_SELECT_SQL} WHERE id = $1;"),
            &[Value::from(id)],
        )?;

        match self.cursor.fetch_one()? {
            Some(row) => Ok(Some(parse_task_row(&row)?)),
            None => Ok(None),
        }
    }

    fn list_tasks(&mut self) -> RepoResult<Vec<Task>> {
        self.cursor.execute(
            &format!(
                "{TASK_SELECT_SQL} ORDER BY created_at IS NOT NULL, created_at ASC, id ASC;"
            ),
            &[],
        )?;

        let rows = self.cursor.fetch_all()?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn update_task(&mut self, task: &Task) -> RepoResult<()> {
        let changed = self.cursor.execute(
            "UPDATE t_tasks
             SET
                user_id = $1,
                name = $2,
                description = $3,
                due_date = $4
             WHERE id = $5;",
            &[
                Value::from(task.user_id),
                Value::from(task.name.as_str()),
                Value::from(task.description.clone()),
                Value::from(task.due_date),
                Value::from(task.id),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(task.id));
        }

        Ok(())
    }

    fn delete_task(&mut self, id: TaskId) -> RepoResult<()> {
        let changed = self
            .cursor
            .execute("DELETE FROM t_tasks WHERE id = $1;", &[Value::from(id)])?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

fn parse_task_row(row: &Row) -> Result<Task, DbError> {
    Ok(Task {
        id: row.uuid("id")?,
        user_id: row.uuid("user_id")?,
        name: row.text("name")?,
        description: row.opt_text("description")?,
        due_date: row.opt_timestamp("due_date")?,
        created_at: row.opt_timestamp("created_at")?,
    })
}
