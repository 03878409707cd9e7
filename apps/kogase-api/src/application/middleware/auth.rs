use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;
use crate::application::ApiError;

pub const API_KEY_HEADER: &str = "x-kogase-api-key";

const PROJECT_KEY_TTL_SECONDS: u64 = 60;

/// Dashboard user resolved from a bearer token.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

/// Project resolved from an `X-Kogase-API-Key` header.
#[derive(Clone, Copy, Debug)]
pub struct AuthenticatedProject {
    pub project_id: Uuid,
}

/// Whoever passed the combined gate.
#[derive(Clone, Debug)]
pub enum Caller {
    Project(AuthenticatedProject),
    User(AuthenticatedUser),
}

pub fn project_key_cache_key(api_key: &str) -> String {
    format!("project_key:{api_key}")
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

fn invalid_token() -> ApiError {
    ApiError::Unauthenticated("Invalid or expired token".into())
}

/// A token is accepted only when it verifies, has not expired, and its
/// server-side row is still live.
pub async fn verify_bearer(state: &AppState, token: &str) -> Result<AuthenticatedUser, ApiError> {
    let claims = state.token_issuer.decode(token).map_err(|e| {
        warn!("Bearer token rejected: {}", e);
        invalid_token()
    })?;
    let user_id = claims.user_id().map_err(|_| invalid_token())?;

    let now = Utc::now();
    let record = state
        .tokens
        .find_by_token(token)
        .await?
        .filter(|record| record.user_id == user_id && !record.is_expired(now))
        .ok_or_else(|| {
            warn!("Bearer token for user {} has no live session", user_id);
            invalid_token()
        })?;

    if state.users.find_by_id(user_id).await?.is_none() {
        warn!("Bearer token belongs to deleted user {}", user_id);
        return Err(invalid_token());
    }

    if let Err(e) = state.tokens.touch(record.id, now).await {
        warn!("Failed to record token use for user {}: {}", user_id, e);
    }

    Ok(AuthenticatedUser {
        user_id,
        email: claims.email,
        token: token.to_string(),
    })
}

async fn cached_project_id(state: &AppState, cache_key: &str) -> Option<Uuid> {
    match state.cache.get(cache_key).await {
        Ok(Some(bytes)) => Uuid::from_slice(&bytes).ok(),
        Ok(None) => None,
        Err(e) => {
            warn!("Cache error while reading project key: {}", e);
            None
        }
    }
}

/// Resolves a project key to its project id. A cache entry only names a
/// candidate project; the key is accepted when that project is live and
/// still carries it, so an entry written around a rotation never outlives it.
pub async fn verify_project_key(state: &AppState, key: &str) -> Result<Uuid, ApiError> {
    let cache_key = project_key_cache_key(key);
    if let Some(project_id) = cached_project_id(state, &cache_key).await {
        match state.projects.find_by_id(project_id).await? {
            Some(project) if project.api_key == key => {
                debug!("cache hit project key for project {}", project_id);
                return Ok(project_id);
            }
            _ => {
                debug!("Dropping stale project key entry for project {}", project_id);
                if let Err(e) = state.cache.delete(&cache_key).await {
                    warn!("Cache error while dropping project key: {}", e);
                }
            }
        }
    }

    let project = state.projects.find_by_api_key(key).await?.ok_or_else(|| {
        warn!("Provided project API key not found.");
        ApiError::Unauthenticated("Invalid API key".into())
    })?;

    if let Err(e) = state
        .cache
        .set(&cache_key, project.id.as_bytes(), Some(PROJECT_KEY_TTL_SECONDS))
        .await
    {
        warn!("Cache error while storing project key: {}", e);
    }
    Ok(project.id)
}

/// Bearer gate: injects [`AuthenticatedUser`].
pub async fn bearer_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| {
            warn!("Bearer authentication failed: missing or malformed Authorization header.");
            ApiError::Unauthenticated("Authorization header is required".into())
        })?
        .to_string();

    let user = verify_bearer(&state, &token).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Project-key gate: injects [`AuthenticatedProject`].
pub async fn project_key_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = api_key(req.headers())
        .ok_or_else(|| {
            warn!("Project key authentication failed: missing X-Kogase-API-Key header.");
            ApiError::Unauthenticated("API key is required".into())
        })?
        .to_string();

    let project_id = verify_project_key(&state, &key).await?;
    req.extensions_mut().insert(AuthenticatedProject { project_id });
    Ok(next.run(req).await)
}

/// Accepts either credential; a project key wins when both are present.
/// Injects [`Caller`].
pub async fn project_key_or_bearer_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = api_key(req.headers()).map(str::to_string);
    let token = bearer_token(req.headers()).map(str::to_string);

    let caller = if let Some(key) = key {
        let project_id = verify_project_key(&state, &key).await?;
        Caller::Project(AuthenticatedProject { project_id })
    } else if let Some(token) = token {
        Caller::User(verify_bearer(&state, &token).await?)
    } else {
        warn!("Request carried neither a project key nor a bearer token.");
        return Err(ApiError::Unauthenticated(
            "API key or bearer token is required".into(),
        ));
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
