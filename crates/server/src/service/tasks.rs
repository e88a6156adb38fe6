use chrono::Utc;
use teamline_common::events::Topic;
use teamline_common::types::{Project, Task, TaskChange, TaskStatus};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::error::{ApiError, ErrorKind};
use crate::store::{ProjectStore, TaskStore, UserStore};

#[derive(Clone)]
pub struct TaskService {
    tasks: TaskStore,
    projects: ProjectStore,
    users: UserStore,
    publisher: Publisher,
}

#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub request_user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct UpdateTaskRequest {
    pub task_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: String,
    pub request_user_id: Uuid,
}

fn is_member(project: &Project, user_id: Uuid) -> bool {
    project.members.iter().any(|member| member.user_id == user_id)
}

impl TaskService {
    pub fn new(
        tasks: TaskStore,
        projects: ProjectStore,
        users: UserStore,
        publisher: Publisher,
    ) -> Self {
        Self { tasks, projects, users, publisher }
    }

    /// Any project member may create a task; publishes `task.created`
    /// so the hub can broadcast it to the project room.
    pub async fn create(&self, request: CreateTaskRequest) -> Result<Task, ApiError> {
        let project = self.project_for(request.project_id).await?;

        if !is_member(&project, request.request_user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        let author = self
            .users
            .get_by_id(request.request_user_id)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("user not found"),
                _ => error,
            })?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id: request.project_id,
            author_id: author.id,
            title: request.title,
            description: request.description,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            author: Some(author.clone()),
            changes: Vec::new(),
        };

        self.tasks.create(&task).await?;

        let created_change = TaskChange {
            id: Uuid::new_v4(),
            task_id: task.id,
            author_id: author.id,
            change_description: format!("Task created by {}", author.name),
            created_at: now,
        };
        self.tasks.create_changes(std::slice::from_ref(&created_change)).await?;

        let mut task = task;
        task.changes.push(created_change);

        self.publisher.publish(Topic::TaskCreated, task.id, &task).await?;

        Ok(task)
    }

    /// Any project member may update; every field change is recorded as
    /// an audit row and `task.updated` is published.
    pub async fn update(&self, request: UpdateTaskRequest) -> Result<Task, ApiError> {
        let task = self.tasks.get_by_id(request.task_id).await.map_err(|error| {
            match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("task not found"),
                _ => error,
            }
        })?;

        let project = self.project_for(task.project_id).await?;
        if !is_member(&project, request.request_user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        let status = TaskStatus::parse(&request.status)
            .ok_or_else(|| ApiError::business_validation("invalid status"))?;

        let author = self
            .users
            .get_by_id(request.request_user_id)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("user not found"),
                _ => error,
            })?;

        let mut updated = task.clone();
        updated.title = request.title;
        updated.description = request.description;
        updated.status = status;
        updated.updated_at = Utc::now();

        self.tasks.update(&updated).await?;

        let new_changes = task.changes_against(&updated, &author, updated.updated_at);
        self.tasks.create_changes(&new_changes).await?;
        updated.changes.extend(new_changes);

        self.publisher.publish(Topic::TaskUpdated, updated.id, &updated).await?;

        Ok(updated)
    }

    pub async fn list(&self, project_id: Uuid, user_id: Uuid) -> Result<Vec<Task>, ApiError> {
        let project = self.project_for(project_id).await?;

        if !is_member(&project, user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        self.tasks.list_by_project_id(project_id).await
    }

    pub async fn get_by_id(&self, id: Uuid, user_id: Uuid) -> Result<Task, ApiError> {
        let task = self.tasks.get_by_id(id).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => ApiError::not_found("task not found"),
            _ => error,
        })?;

        let project = self.project_for(task.project_id).await?;
        if !is_member(&project, user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        Ok(task)
    }

    async fn project_for(&self, project_id: Uuid) -> Result<Project, ApiError> {
        self.projects.get_by_id(project_id).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => ApiError::not_found("project not found"),
            _ => error,
        })
    }
}
