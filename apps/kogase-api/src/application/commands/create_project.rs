use crate::AppState;
use crate::application::{ApiError, ApiJson, middleware::AuthenticatedUser};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use kogase_core::{
    CommandHandler, CoreError, ProjectRepository,
    domain::project::{CreateProject, Project},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub struct CreateProjectHandler {
    projects: Arc<dyn ProjectRepository>,
}

impl CreateProjectHandler {
    pub fn new(projects: Arc<dyn ProjectRepository>) -> Self {
        Self { projects }
    }
}

impl CommandHandler<CreateProject> for CreateProjectHandler {
    type Output = Project;

    async fn handle(&self, command: CreateProject) -> Result<Project, CoreError> {
        command.validate()?;
        let project = Project::new(&command.name, command.owner_id, Utc::now());
        self.projects.create(&project).await?;
        info!("Created project {} for owner {}", project.id, project.owner_id);
        Ok(project)
    }
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub name: String,
}

pub async fn handle_create_project_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiJson(payload): ApiJson<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handler = CreateProjectHandler::new(state.projects.clone());
    let project = handler
        .handle(CreateProject {
            owner_id: ctx.user_id,
            name: payload.name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}
