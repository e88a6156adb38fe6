use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use teamline_common::types::{Project, ProjectMember, ProjectMemberRole};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::map_db_error;
use crate::error::ApiError;

#[derive(Clone)]
pub enum ProjectStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryProjectStore>>),
}

#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: HashMap<Uuid, Project>,
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProjectRow {
    fn into_project(self, members: Vec<ProjectMember>) -> Project {
        Project {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            members,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProjectMemberRow {
    id: Uuid,
    user_id: Uuid,
    project_id: Uuid,
    role: String,
}

impl ProjectMemberRow {
    fn into_member(self) -> Result<ProjectMember, ApiError> {
        let role = ProjectMemberRole::parse(&self.role).ok_or_else(|| {
            ApiError::server(
                "invalid project member role in database",
                anyhow::anyhow!("role '{}'", self.role),
            )
        })?;

        Ok(ProjectMember {
            id: self.id,
            user_id: self.user_id,
            project_id: self.project_id,
            role,
            user: None,
        })
    }
}

impl ProjectStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryProjectStore::default())))
    }

    /// Inserts the project and its initial members in one transaction.
    pub async fn create(&self, project: &Project) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|error| map_db_error("failed to begin transaction", error))?;

                sqlx::query(
                    "INSERT INTO projects (id, user_id, name, description, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(project.id)
                .bind(project.user_id)
                .bind(&project.name)
                .bind(&project.description)
                .bind(project.created_at)
                .bind(project.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|error| map_db_error("failed to insert project", error))?;

                for member in &project.members {
                    sqlx::query(
                        "INSERT INTO project_members (id, project_id, user_id, role) \
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(member.id)
                    .bind(member.project_id)
                    .bind(member.user_id)
                    .bind(member.role.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|error| map_db_error("failed to insert project member", error))?;
                }

                tx.commit()
                    .await
                    .map_err(|error| map_db_error("failed to commit project insert", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                store.write().await.projects.insert(project.id, project.clone());
                Ok(())
            }
        }
    }

    /// Fetches a project with its members hydrated.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Project, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ProjectRow>(
                    "SELECT id, user_id, name, description, created_at, updated_at \
                     FROM projects WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(|error| map_db_error("failed to fetch project", error))?
                .ok_or_else(|| ApiError::not_found("not found"))?;

                let members = sqlx::query_as::<_, ProjectMemberRow>(
                    "SELECT id, user_id, project_id, role FROM project_members \
                     WHERE project_id = $1",
                )
                .bind(id)
                .fetch_all(pool)
                .await
                .map_err(|error| map_db_error("failed to fetch project members", error))?
                .into_iter()
                .map(ProjectMemberRow::into_member)
                .collect::<Result<Vec<_>, _>>()?;

                Ok(row.into_project(members))
            }
            Self::Memory(store) => store
                .read()
                .await
                .projects
                .get(&id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("not found")),
        }
    }

    /// Projects the user belongs to, optionally filtered by role.
    /// Members are not hydrated for listings.
    pub async fn list_by_user_id(
        &self,
        user_id: Uuid,
        role: Option<ProjectMemberRole>,
    ) -> Result<Vec<Project>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, ProjectRow>(
                    "SELECT p.id, p.user_id, p.name, p.description, p.created_at, p.updated_at \
                     FROM projects p \
                     INNER JOIN project_members m ON m.project_id = p.id \
                     WHERE m.user_id = $1 AND ($2::text IS NULL OR m.role = $2) \
                     ORDER BY p.created_at",
                )
                .bind(user_id)
                .bind(role.map(|role| role.as_str()))
                .fetch_all(pool)
                .await
                .map_err(|error| map_db_error("failed to list projects", error))?;

                Ok(rows.into_iter().map(|row| row.into_project(Vec::new())).collect())
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut projects: Vec<Project> = guard
                    .projects
                    .values()
                    .filter(|project| {
                        project.members.iter().any(|member| {
                            member.user_id == user_id
                                && role.map(|role| member.role == role).unwrap_or(true)
                        })
                    })
                    .cloned()
                    .map(|mut project| {
                        project.members = Vec::new();
                        project
                    })
                    .collect();
                projects.sort_by_key(|project| project.created_at);
                Ok(projects)
            }
        }
    }

    pub async fn update(&self, project: &Project) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE projects SET name = $2, description = $3, updated_at = $4 \
                     WHERE id = $1",
                )
                .bind(project.id)
                .bind(&project.name)
                .bind(&project.description)
                .bind(project.updated_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to update project", error))?;

                if result.rows_affected() == 0 {
                    return Err(ApiError::not_found("not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let existing = guard
                    .projects
                    .get_mut(&project.id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                existing.name = project.name.clone();
                existing.description = project.description.clone();
                existing.updated_at = project.updated_at;
                Ok(())
            }
        }
    }

    pub async fn create_member(&self, member: &ProjectMember) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO project_members (id, project_id, user_id, role) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(member.id)
                .bind(member.project_id)
                .bind(member.user_id)
                .bind(member.role.as_str())
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to insert project member", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let project = guard
                    .projects
                    .get_mut(&member.project_id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                if project.members.iter().any(|existing| existing.user_id == member.user_id) {
                    return Err(ApiError::duplicate_entry("duplicate entry"));
                }
                project.members.push(member.clone());
                Ok(())
            }
        }
    }
}
