use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use teamline_common::types::{Task, TaskChange, TaskStatus, User};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::map_db_error;
use crate::error::ApiError;

#[derive(Clone)]
pub enum TaskStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryTaskStore>>),
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: HashMap<Uuid, Task>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    project_id: Uuid,
    author_id: Uuid,
    title: String,
    description: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    author_name: Option<String>,
    author_email: Option<String>,
    author_created_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, ApiError> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            ApiError::server(
                "invalid task status in database",
                anyhow::anyhow!("status '{}'", self.status),
            )
        })?;

        let author = match (self.author_name, self.author_email, self.author_created_at) {
            (Some(name), Some(email), Some(created_at)) => Some(User {
                id: self.author_id,
                name,
                email,
                password: String::new(),
                created_at,
            }),
            _ => None,
        };

        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            author_id: self.author_id,
            title: self.title,
            description: self.description,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            author,
            changes: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskChangeRow {
    id: Uuid,
    task_id: Uuid,
    author_id: Uuid,
    change_description: String,
    created_at: DateTime<Utc>,
}

impl TaskChangeRow {
    fn into_change(self) -> TaskChange {
        TaskChange {
            id: self.id,
            task_id: self.task_id,
            author_id: self.author_id,
            change_description: self.change_description,
            created_at: self.created_at,
        }
    }
}

const TASK_SELECT: &str = "SELECT t.id, t.project_id, t.author_id, t.title, t.description, \
     t.status, t.created_at, t.updated_at, \
     u.name AS author_name, u.email AS author_email, u.created_at AS author_created_at \
     FROM tasks t LEFT JOIN users u ON u.id = t.author_id";

impl TaskStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryTaskStore::default())))
    }

    pub async fn create(&self, task: &Task) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO tasks \
                     (id, project_id, author_id, title, description, status, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(task.id)
                .bind(task.project_id)
                .bind(task.author_id)
                .bind(&task.title)
                .bind(&task.description)
                .bind(task.status.as_str())
                .bind(task.created_at)
                .bind(task.updated_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to insert task", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                store.write().await.tasks.insert(task.id, task.clone());
                Ok(())
            }
        }
    }

    /// Fetches a task with its author and change history hydrated.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Task, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let mut task = sqlx::query_as::<_, TaskRow>(&format!("{TASK_SELECT} WHERE t.id = $1"))
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .map_err(|error| map_db_error("failed to fetch task", error))?
                    .ok_or_else(|| ApiError::not_found("not found"))?
                    .into_task()?;

                task.changes = sqlx::query_as::<_, TaskChangeRow>(
                    "SELECT id, task_id, author_id, change_description, created_at \
                     FROM task_changes WHERE task_id = $1 ORDER BY created_at",
                )
                .bind(id)
                .fetch_all(pool)
                .await
                .map_err(|error| map_db_error("failed to fetch task changes", error))?
                .into_iter()
                .map(TaskChangeRow::into_change)
                .collect();

                Ok(task)
            }
            Self::Memory(store) => store
                .read()
                .await
                .tasks
                .get(&id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("not found")),
        }
    }

    /// Tasks in a project, authors hydrated, change history omitted.
    pub async fn list_by_project_id(&self, project_id: Uuid) -> Result<Vec<Task>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, TaskRow>(&format!(
                    "{TASK_SELECT} WHERE t.project_id = $1 ORDER BY t.created_at"
                ))
                .bind(project_id)
                .fetch_all(pool)
                .await
                .map_err(|error| map_db_error("failed to list tasks", error))?;

                rows.into_iter().map(TaskRow::into_task).collect()
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut tasks: Vec<Task> = guard
                    .tasks
                    .values()
                    .filter(|task| task.project_id == project_id)
                    .cloned()
                    .map(|mut task| {
                        task.changes = Vec::new();
                        task
                    })
                    .collect();
                tasks.sort_by_key(|task| task.created_at);
                Ok(tasks)
            }
        }
    }

    pub async fn update(&self, task: &Task) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE tasks SET title = $2, description = $3, status = $4, updated_at = $5 \
                     WHERE id = $1",
                )
                .bind(task.id)
                .bind(&task.title)
                .bind(&task.description)
                .bind(task.status.as_str())
                .bind(task.updated_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to update task", error))?;

                if result.rows_affected() == 0 {
                    return Err(ApiError::not_found("not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let existing = guard
                    .tasks
                    .get_mut(&task.id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                existing.title = task.title.clone();
                existing.description = task.description.clone();
                existing.status = task.status;
                existing.updated_at = task.updated_at;
                Ok(())
            }
        }
    }

    pub async fn create_changes(&self, changes: &[TaskChange]) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|error| map_db_error("failed to begin transaction", error))?;

                for change in changes {
                    sqlx::query(
                        "INSERT INTO task_changes \
                         (id, task_id, author_id, change_description, created_at) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(change.id)
                    .bind(change.task_id)
                    .bind(change.author_id)
                    .bind(&change.change_description)
                    .bind(change.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|error| map_db_error("failed to insert task change", error))?;
                }

                tx.commit()
                    .await
                    .map_err(|error| map_db_error("failed to commit task changes", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                for change in changes {
                    if let Some(task) = guard.tasks.get_mut(&change.task_id) {
                        task.changes.push(change.clone());
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use teamline_common::types::{Task, TaskChange, TaskStatus};
    use uuid::Uuid;

    use super::TaskStore;
    use crate::error::ErrorKind;

    fn sample_task(project_id: Uuid) -> Task {
        Task {
            id: Uuid::new_v4(),
            project_id,
            author_id: Uuid::new_v4(),
            title: "write docs".to_string(),
            description: "user guide".to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            author: None,
            changes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn listing_omits_change_history() {
        let store = TaskStore::memory();
        let project_id = Uuid::new_v4();
        let task = sample_task(project_id);
        store.create(&task).await.expect("task should insert");
        store
            .create_changes(&[TaskChange {
                id: Uuid::new_v4(),
                task_id: task.id,
                author_id: task.author_id,
                change_description: "Task created by A".to_string(),
                created_at: Utc::now(),
            }])
            .await
            .expect("changes should insert");

        let listed = store.list_by_project_id(project_id).await.expect("list should succeed");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].changes.is_empty());

        let fetched = store.get_by_id(task.id).await.expect("task should fetch");
        assert_eq!(fetched.changes.len(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_task_is_not_found() {
        let store = TaskStore::memory();
        let error = store
            .update(&sample_task(Uuid::new_v4()))
            .await
            .expect_err("update should fail");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }
}
