use crate::AppState;
use crate::application::{ApiError, ApiJson, middleware::AuthenticatedProject, parse_id};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use kogase_core::{
    CommandHandler, CoreError, DeviceRepository, SessionRepository,
    domain::session::{BeginSession, EndSession, Session},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct BeginSessionHandler {
    devices: Arc<dyn DeviceRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl BeginSessionHandler {
    pub fn new(devices: Arc<dyn DeviceRepository>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { devices, sessions }
    }
}

impl CommandHandler<BeginSession> for BeginSessionHandler {
    type Output = Session;

    async fn handle(&self, command: BeginSession) -> Result<Session, CoreError> {
        command.validate()?;
        let identifier = command.identifier.trim();

        // Sessions never create devices; clients register first.
        let device = self
            .devices
            .find_by_identifier(command.project_id, identifier)
            .await?
            .ok_or_else(|| CoreError::DeviceNotFound(identifier.to_string()))?;

        let session = Session::open(command.project_id, device.id, Utc::now());
        self.sessions.create(&session).await?;
        debug!("Opened session {} for device {}", session.id, device.id);
        Ok(session)
    }
}

pub struct EndSessionHandler {
    devices: Arc<dyn DeviceRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl EndSessionHandler {
    pub fn new(devices: Arc<dyn DeviceRepository>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { devices, sessions }
    }
}

impl CommandHandler<EndSession> for EndSessionHandler {
    type Output = Session;

    async fn handle(&self, command: EndSession) -> Result<Session, CoreError> {
        let mut session = self
            .sessions
            .find_by_id(command.session_id)
            .await?
            .filter(|session| session.project_id == command.project_id)
            .ok_or_else(|| CoreError::NotFound("Session".into()))?;

        if let Some(identifier) = command
            .identifier
            .as_deref()
            .map(str::trim)
            .filter(|identifier| !identifier.is_empty())
        {
            let matches = self
                .devices
                .find_by_identifier(command.project_id, identifier)
                .await?
                .is_some_and(|device| device.id == session.device_id);
            if !matches {
                warn!(
                    "Session {} was not opened by device '{}'",
                    session.id, identifier
                );
                return Err(CoreError::NotFound("Session".into()));
            }
        }

        if !session.is_open() {
            debug!("Session {} ended again; recomputing its duration", session.id);
        }
        session.close(Utc::now());
        self.sessions.update(&session).await?;
        info!(
            "Closed session {} after {} ns",
            session.id,
            session.duration.unwrap_or_default()
        );
        Ok(session)
    }
}

#[derive(Deserialize)]
pub struct BeginSessionRequest {
    #[serde(default)]
    pub identifier: String,
}

#[derive(Deserialize)]
pub struct EndSessionRequest {
    #[serde(default)]
    pub session_id: String,
    pub identifier: Option<String>,
}

pub async fn handle_begin_session_request(
    State(state): State<AppState>,
    Extension(project): Extension<AuthenticatedProject>,
    ApiJson(payload): ApiJson<BeginSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handler = BeginSessionHandler::new(state.devices.clone(), state.sessions.clone());
    let session = handler
        .handle(BeginSession {
            project_id: project.project_id,
            identifier: payload.identifier,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Session started",
            "session_id": session.id,
        })),
    ))
}

pub async fn handle_end_session_request(
    State(state): State<AppState>,
    Extension(project): Extension<AuthenticatedProject>,
    ApiJson(payload): ApiJson<EndSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if payload.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id is required".into()));
    }
    let session_id = parse_id(&payload.session_id, "session")?;

    let handler = EndSessionHandler::new(state.devices.clone(), state.sessions.clone());
    let session = handler
        .handle(EndSession {
            project_id: project.project_id,
            session_id,
            identifier: payload.identifier,
        })
        .await?;
    Ok(Json(serde_json::json!({
        "message": "Session ended",
        "session_id": session.id,
        "duration": session.duration,
    })))
}
