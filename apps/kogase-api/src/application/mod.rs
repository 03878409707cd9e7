use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Query, Request, rejection::JsonRejection, rejection::QueryRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use kogase_core::CoreError;
use serde::de::DeserializeOwned;
use tracing::{error, warn};
use uuid::Uuid;

pub mod analytics;
pub mod authz;
pub mod commands;
pub mod middleware;
pub mod query;

/// Error surfaced to HTTP callers. Every variant renders as `{"message": ...}`.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Request timed out")]
    Timeout,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal() -> Self {
        Self::Internal("Internal server error".into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => Self::NotFound(err.to_string()),
            CoreError::DeviceNotFound(identifier) => {
                warn!("Unknown device identifier: {}", identifier);
                Self::NotFound("Device not found".into())
            }
            CoreError::Validation(message) => Self::BadRequest(message),
            CoreError::AlreadyExists(_) => Self::Conflict(err.to_string()),
            CoreError::InvalidCredentials => Self::Unauthenticated(err.to_string()),
            CoreError::Unauthorized(message) => Self::Unauthenticated(message),
            CoreError::Forbidden(message) => Self::Forbidden(message),
            CoreError::Infrastructure(_) | CoreError::Configuration(_) | CoreError::Internal(_) => {
                error!("CoreError occurred: {}", err);
                Self::internal()
            }
        }
    }
}

/// `axum::Json` with rejections rendered as a 400 `{"message"}` body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// `axum::extract::Query` with rejections rendered as a 400 `{"message"}` body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: QueryRejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Parses a path identifier; malformed ids are a client error, not a miss.
pub fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest(format!("Invalid {what} ID")))
}
