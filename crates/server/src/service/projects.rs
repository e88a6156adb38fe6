use chrono::Utc;
use teamline_common::events::Topic;
use teamline_common::types::{Project, ProjectMember, ProjectMemberRole};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::error::{ApiError, ErrorKind};
use crate::store::{ProjectStore, UserStore};

#[derive(Clone)]
pub struct ProjectService {
    projects: ProjectStore,
    users: UserStore,
    publisher: Publisher,
}

#[derive(Debug, Clone)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct UpdateProjectRequest {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct CreateMemberRequest {
    pub project_id: Uuid,
    pub email: String,
    pub request_user_id: Uuid,
}

fn is_member(project: &Project, user_id: Uuid) -> bool {
    project.members.iter().any(|member| member.user_id == user_id)
}

impl ProjectService {
    pub fn new(projects: ProjectStore, users: UserStore, publisher: Publisher) -> Self {
        Self { projects, users, publisher }
    }

    /// Creates the project with the caller as its creator member and
    /// publishes `project.created`, which bootstraps the chat.
    pub async fn create(&self, request: CreateProjectRequest) -> Result<Project, ApiError> {
        let now = Utc::now();
        let project_id = Uuid::new_v4();

        let project = Project {
            id: project_id,
            user_id: request.user_id,
            name: request.name,
            description: request.description,
            created_at: now,
            updated_at: now,
            members: vec![ProjectMember {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                project_id,
                role: ProjectMemberRole::Creator,
                user: None,
            }],
        };

        self.projects.create(&project).await?;

        self.publisher
            .publish(Topic::ProjectCreated, project.id, &project)
            .await?;

        Ok(project)
    }

    /// Fetches a project the caller can see: its owner or any member.
    pub async fn get_by_id(&self, id: Uuid, user_id: Uuid) -> Result<Project, ApiError> {
        let project = self.projects.get_by_id(id).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => ApiError::not_found("project not found"),
            _ => error,
        })?;

        if project.user_id != user_id && !is_member(&project, user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        Ok(project)
    }

    pub async fn list_by_user_id(
        &self,
        user_id: Uuid,
        role: Option<ProjectMemberRole>,
    ) -> Result<Vec<Project>, ApiError> {
        self.projects.list_by_user_id(user_id, role).await
    }

    /// Owner-only update; publishes `project.updated`.
    pub async fn update(&self, request: UpdateProjectRequest) -> Result<Project, ApiError> {
        let mut project =
            self.projects.get_by_id(request.id).await.map_err(|error| match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("project not found"),
                _ => error,
            })?;

        if project.user_id != request.user_id {
            return Err(ApiError::forbidden("forbidden"));
        }

        project.name = request.name;
        project.description = request.description;
        project.updated_at = Utc::now();

        self.projects.update(&project).await?;

        self.publisher
            .publish(Topic::ProjectUpdated, project.id, &project)
            .await?;

        Ok(project)
    }

    /// Owner-only member addition by email; publishes
    /// `project.member.created` to cascade into the chat.
    pub async fn create_member(
        &self,
        request: CreateMemberRequest,
    ) -> Result<ProjectMember, ApiError> {
        let user = self
            .users
            .get_by_email(&request.email)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("user not found"),
                _ => error,
            })?;

        if user.id == request.request_user_id {
            return Err(ApiError::business_validation("you cannot add yourself as a member"));
        }

        let project = self
            .projects
            .get_by_id(request.project_id)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("project not found"),
                _ => error,
            })?;

        if project.user_id != request.request_user_id {
            return Err(ApiError::forbidden("forbidden"));
        }

        if is_member(&project, user.id) {
            return Err(ApiError::duplicate_entry("member already exists"));
        }

        let member = ProjectMember {
            id: Uuid::new_v4(),
            user_id: user.id,
            project_id: request.project_id,
            role: ProjectMemberRole::Member,
            user: None,
        };

        self.projects.create_member(&member).await.map_err(|error| match error.kind() {
            ErrorKind::DuplicateEntry => ApiError::duplicate_entry("member already exists"),
            _ => error,
        })?;

        self.publisher
            .publish(Topic::ProjectMemberCreated, member.project_id, &member)
            .await?;

        Ok(member)
    }
}
