use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tracing::warn;

use super::ApiError;

pub mod auth;

pub use auth::{
    API_KEY_HEADER, AuthenticatedProject, AuthenticatedUser, Caller, bearer_auth,
    project_key_auth, project_key_or_bearer_auth,
};

/// Fails the request with 504 once `deadline` elapses. Dropping the handler
/// future also drops any transaction it holds open.
pub async fn request_deadline(State(deadline): State<Duration>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(deadline, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("Request to {} exceeded the {:?} deadline", path, deadline);
            ApiError::Timeout.into_response()
        }
    }
}

/// Best-effort client address: the first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer. Empty when none is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let ip = header("x-forwarded-for")
            .or_else(|| header("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();
        Ok(Self(ip))
    }
}
