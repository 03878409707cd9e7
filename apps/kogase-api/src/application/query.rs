use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use kogase_core::domain::{
    Page, ProjectScope,
    device::{Device, DeviceFilter, MAX_DEVICE_PAGE},
    event::{Event, EventFilter, MAX_EVENT_PAGE},
    project::{Project, PublicProject},
    session::{MAX_SESSION_PAGE, Session, SessionFilter},
    user::User,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::authz::{load_owned_project, owned_scope};
use super::middleware::{AuthenticatedProject, AuthenticatedUser, Caller};
use super::{ApiError, ApiQuery, parse_id};
use crate::AppState;

const MAX_USER_PAGE: i64 = 100;
const MAX_PROJECT_PAGE: i64 = 100;

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub returned: usize,
}

/// List envelope shared by every listing except devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    fn new(data: Vec<T>, page: Page) -> Self {
        let returned = data.len();
        Self {
            data,
            pagination: Pagination {
                limit: page.limit,
                offset: page.offset,
                returned,
            },
        }
    }
}

// GET /api/v1/health
pub async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /api/v1/health/apikey
pub async fn handle_health_api_key(
    Extension(project): Extension<AuthenticatedProject>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "project_id": project.project_id,
    }))
}

// --- Users ---

pub async fn handle_list_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Paginated<User>>, ApiError> {
    let page = Page::new(query.limit, query.offset, MAX_USER_PAGE);
    let users = state.users.list(page).await?;
    Ok(Json(Paginated::new(users, page)))
}

pub async fn handle_get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user_id = parse_id(&user_id, "user")?;
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user))
}

// --- Projects ---

pub async fn handle_list_projects(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Paginated<Project>>, ApiError> {
    let page = Page::new(query.limit, query.offset, MAX_PROJECT_PAGE);
    let projects = state.projects.list_by_owner(ctx.user_id, page).await?;
    Ok(Json(Paginated::new(projects, page)))
}

pub async fn handle_get_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project_id = parse_id(&project_id, "project")?;
    let project = load_owned_project(state.projects.as_ref(), project_id, ctx.user_id).await?;
    Ok(Json(project))
}

// GET /api/v1/projects/apikey: what an SDK may learn about its own project.
pub async fn handle_get_project_by_key(
    State(state): State<AppState>,
    Extension(project): Extension<AuthenticatedProject>,
) -> Result<Json<PublicProject>, ApiError> {
    let project = state
        .projects
        .find_by_id(project.project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".into()))?;
    Ok(Json(PublicProject::from(project)))
}

// --- Devices ---

#[derive(Debug, Deserialize, Default)]
pub struct DeviceQuery {
    pub project_id: Option<Uuid>,
    pub platform: Option<String>,
    #[serde(alias = "from_date")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "to_date")]
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<Device>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn handle_list_devices(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiQuery(query): ApiQuery<DeviceQuery>,
) -> Result<Json<DeviceListResponse>, ApiError> {
    let scope = owned_scope(state.projects.as_ref(), query.project_id, ctx.user_id).await?;
    let page = Page::new(query.limit, query.offset, MAX_DEVICE_PAGE);
    let result = state
        .devices
        .list(&DeviceFilter {
            scope,
            platform: non_blank(query.platform),
            from: query.from,
            to: query.to,
            page,
        })
        .await?;
    Ok(Json(DeviceListResponse {
        devices: result.devices,
        total_count: result.total_count,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Readable by the device's own project key, or by a bearer who owns the project.
pub async fn handle_get_device(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(device_id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let device_id = parse_id(&device_id, "device")?;
    let device = state
        .devices
        .find_by_id(device_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Device not found".into()))?;

    match caller {
        Caller::Project(project) if project.project_id != device.project_id => {
            debug!("Device {} requested with a foreign project key", device.id);
            Err(ApiError::NotFound("Device not found".into()))
        }
        Caller::Project(_) => Ok(Json(device)),
        Caller::User(user) => {
            load_owned_project(state.projects.as_ref(), device.project_id, user.user_id).await?;
            Ok(Json(device))
        }
    }
}

// --- Sessions ---

#[derive(Debug, Deserialize, Default)]
pub struct SessionQuery {
    pub project_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    #[serde(alias = "from_date")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "to_date")]
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// Session reads are not restricted to the caller's projects: any
// authenticated user can list and read every session.
pub async fn handle_list_sessions(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SessionQuery>,
) -> Result<Json<Paginated<Session>>, ApiError> {
    let page = Page::new(query.limit, query.offset, MAX_SESSION_PAGE);
    let sessions = state
        .sessions
        .list(&SessionFilter {
            scope: ProjectScope {
                project_id: query.project_id,
                owner_id: None,
            },
            device_id: query.device_id,
            from: query.from,
            to: query.to,
            page,
        })
        .await?;
    Ok(Json(Paginated::new(sessions, page)))
}

pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session_id = parse_id(&session_id, "session")?;
    let session = state
        .sessions
        .find_by_id(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".into()))?;
    Ok(Json(session))
}

// --- Events ---

#[derive(Debug, Deserialize, Default)]
pub struct EventQuery {
    pub project_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub event_name: Option<String>,
    pub platform: Option<String>,
    #[serde(alias = "from_date")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "to_date")]
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn handle_list_events(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiQuery(query): ApiQuery<EventQuery>,
) -> Result<Json<Paginated<Event>>, ApiError> {
    let scope = owned_scope(state.projects.as_ref(), query.project_id, ctx.user_id).await?;
    let page = Page::new(query.limit, query.offset, MAX_EVENT_PAGE);
    let events = state
        .events
        .list(&EventFilter {
            scope,
            device_id: query.device_id,
            event_type: non_blank(query.event_type),
            event_name: non_blank(query.event_name),
            platform: non_blank(query.platform),
            from: query.from,
            to: query.to,
            page,
        })
        .await?;
    Ok(Json(Paginated::new(events, page)))
}

pub async fn handle_get_event(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let event_id = parse_id(&event_id, "event")?;
    let event = state
        .events
        .find_by_id(event_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Event not found".into()))?;
    load_owned_project(state.projects.as_ref(), event.project_id, ctx.user_id)
        .await
        .inspect_err(|_| warn!("User {} denied access to event {}", ctx.user_id, event.id))?;
    Ok(Json(event))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
