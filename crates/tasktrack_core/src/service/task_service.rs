//! Task use-case service.
//!
//! # Responsibility
//! - Provide CRUD entry points shaped around the public task projection.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository persistence contracts.
//! - Service layer remains storage-agnostic.
//! - Newly created tasks always carry a `created_at` timestamp.

use crate::model::task::{normalize_timestamp, Task, TaskId, TaskPublic, UserId};
use crate::repo::task_repo::{RepoError, RepoResult, TaskRepository};
use chrono::Utc;
use log::info;

/// Use-case service wrapper for task CRUD operations.
pub struct TaskService<R: TaskRepository> {
    repo: R,
}

impl<R: TaskRepository> TaskService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Gives the repository back, e.g. to inspect an in-memory store.
    pub fn into_inner(self) -> R {
        self.repo
    }

    /// Creates a task owned by `user_id` and returns the stored record.
    pub fn create_task(&mut self, user_id: UserId, input: TaskPublic) -> RepoResult<Task> {
        let mut task = Task::from_public(user_id, input);
        task.created_at = Some(normalize_timestamp(Utc::now()));
        self.repo.create_task(&task)?;
        info!("event=task_create module=service status=ok task_id={}", task.id);
        Ok(task)
    }

    /// Returns the public projection of one task.
    ///
    /// # Errors
    /// - `RepoError::NotFound` when no task has `id`.
    pub fn get_task(&mut self, id: TaskId) -> RepoResult<TaskPublic> {
        self.repo
            .get_task(id)?
            .map(|task| task.to_public())
            .ok_or(RepoError::NotFound(id))
    }

    /// Lists full task records in creation order.
    pub fn list_tasks(&mut self) -> RepoResult<Vec<Task>> {
        self.repo.list_tasks()
    }

    /// Replaces the public fields of an existing task.
    pub fn update_task(&mut self, id: TaskId, input: TaskPublic) -> RepoResult<Task> {
        let mut task = self.repo.get_task(id)?.ok_or(RepoError::NotFound(id))?;
        task.apply(input);
        self.repo.update_task(&task)?;
        info!("event=task_update module=service status=ok task_id={id}");
        Ok(task)
    }

    pub fn delete_task(&mut self, id: TaskId) -> RepoResult<()> {
        self.repo.delete_task(id)?;
        info!("event=task_delete module=service status=ok task_id={id}");
        Ok(())
    }
}
