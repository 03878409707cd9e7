use crate::AppState;
use crate::application::{
    ApiError, ApiJson, authz::load_owned_project, middleware::AuthenticatedUser,
    middleware::auth::project_key_cache_key, parse_id,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use kogase_core::{
    Cache, CommandHandler, CoreError, ProjectRepository,
    domain::project::{DeleteProject, Project, RegenerateApiKey, UpdateProject},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

async fn evict_project_key(cache: &dyn Cache, api_key: &str) {
    if let Err(e) = cache.delete(&project_key_cache_key(api_key)).await {
        warn!("Failed to evict cached project key: {}", e);
    }
}

pub struct UpdateProjectHandler {
    projects: Arc<dyn ProjectRepository>,
}

impl UpdateProjectHandler {
    pub fn new(projects: Arc<dyn ProjectRepository>) -> Self {
        Self { projects }
    }
}

impl CommandHandler<UpdateProject> for UpdateProjectHandler {
    type Output = Project;

    async fn handle(&self, command: UpdateProject) -> Result<Project, CoreError> {
        let mut project =
            load_owned_project(self.projects.as_ref(), command.project_id, command.actor_id)
                .await?;

        if let Some(name) = command.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            project.name = name.to_string();
        }
        project.updated_at = Utc::now();

        self.projects.update(&project).await?;
        info!("Updated project {}", project.id);
        Ok(project)
    }
}

pub struct DeleteProjectHandler {
    projects: Arc<dyn ProjectRepository>,
    cache: Arc<dyn Cache>,
}

impl DeleteProjectHandler {
    pub fn new(projects: Arc<dyn ProjectRepository>, cache: Arc<dyn Cache>) -> Self {
        Self { projects, cache }
    }
}

impl CommandHandler<DeleteProject> for DeleteProjectHandler {
    type Output = ();

    async fn handle(&self, command: DeleteProject) -> Result<(), CoreError> {
        let project =
            load_owned_project(self.projects.as_ref(), command.project_id, command.actor_id)
                .await?;

        if !self.projects.soft_delete(project.id).await? {
            return Err(CoreError::NotFound("Project".into()));
        }
        evict_project_key(self.cache.as_ref(), &project.api_key).await;

        info!("Deleted project {}", project.id);
        Ok(())
    }
}

pub struct RegenerateApiKeyHandler {
    projects: Arc<dyn ProjectRepository>,
    cache: Arc<dyn Cache>,
}

impl RegenerateApiKeyHandler {
    pub fn new(projects: Arc<dyn ProjectRepository>, cache: Arc<dyn Cache>) -> Self {
        Self { projects, cache }
    }
}

impl CommandHandler<RegenerateApiKey> for RegenerateApiKeyHandler {
    type Output = Project;

    async fn handle(&self, command: RegenerateApiKey) -> Result<Project, CoreError> {
        let mut project =
            load_owned_project(self.projects.as_ref(), command.project_id, command.actor_id)
                .await?;

        let previous_key = project.rotate_api_key(Utc::now());
        self.projects.update(&project).await?;
        evict_project_key(self.cache.as_ref(), &previous_key).await;

        info!("Regenerated API key for project {}", project.id);
        Ok(project)
    }
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
}

pub async fn handle_update_project_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(project_id): Path<String>,
    ApiJson(payload): ApiJson<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let project_id = parse_id(&project_id, "project")?;
    let handler = UpdateProjectHandler::new(state.projects.clone());
    let project = handler
        .handle(UpdateProject {
            actor_id: ctx.user_id,
            project_id,
            name: payload.name,
        })
        .await?;
    Ok(Json(project))
}

pub async fn handle_delete_project_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(project_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let project_id = parse_id(&project_id, "project")?;
    let handler = DeleteProjectHandler::new(state.projects.clone(), state.cache.clone());
    handler
        .handle(DeleteProject {
            actor_id: ctx.user_id,
            project_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_regenerate_api_key_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project_id = parse_id(&project_id, "project")?;
    let handler = RegenerateApiKeyHandler::new(state.projects.clone(), state.cache.clone());
    let project = handler
        .handle(RegenerateApiKey {
            actor_id: ctx.user_id,
            project_id,
        })
        .await?;
    Ok(Json(project))
}
