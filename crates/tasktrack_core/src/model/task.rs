//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical task record and its public projection.
//!
//! # Invariants
//! - `id` is stable and never reused for another task.
//! - Timestamps are UTC and truncated to microseconds, the finest precision
//!   every backend stores.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;
pub type UserId = Uuid;

const TIMESTAMP_DIGITS: u16 = 6;

/// Canonical task record, including ownership and bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Caller-facing projection of a task: what can be submitted and shown
/// without exposing ownership or bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPublic {
    pub name: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a task with a generated ID and no optional fields.
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), user_id, name)
    }

    /// Creates a task with a caller-provided stable ID.
    pub fn with_id(id: TaskId, user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            user_id,
            name: name.into(),
            description: None,
            due_date: None,
            created_at: None,
        }
    }

    /// Builds a new task owned by `user_id` from submitted public fields.
    pub fn from_public(user_id: UserId, input: TaskPublic) -> Self {
        let mut task = Self::new(user_id, String::new());
        task.apply(input);
        task
    }

    /// Replaces the public fields with `input`.
    pub fn apply(&mut self, input: TaskPublic) {
        self.name = input.name;
        self.description = input.description;
        self.due_date = input.due_date.map(normalize_timestamp);
    }

    pub fn to_public(&self) -> TaskPublic {
        TaskPublic {
            name: self.name.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
        }
    }
}

impl TaskPublic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            due_date: None,
        }
    }
}

impl From<&Task> for TaskPublic {
    fn from(value: &Task) -> Self {
        value.to_public()
    }
}

/// Truncates `value` to the precision kept by storage.
pub fn normalize_timestamp(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(TIMESTAMP_DIGITS)
}
