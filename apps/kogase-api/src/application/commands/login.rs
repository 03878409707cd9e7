use crate::AppState;
use crate::application::{ApiError, ApiJson, middleware::AuthenticatedUser};
use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use kogase_core::{
    AuthTokenRepository, CommandHandler, CoreError, UserRepository,
    domain::{
        auth_token::{IssuedToken, TokenIssuer},
        user::{Login, User, UserProfile, hash_password, normalize_email, verify_password},
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

// Hash verified against when the email is unknown, so both paths cost the same.
static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

async fn dummy_hash() -> Result<String, CoreError> {
    DUMMY_HASH
        .get_or_try_init(|| hash_password("kogase-timing-equalizer".into()))
        .await
        .cloned()
}

pub struct LoginHandler {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn AuthTokenRepository>,
    issuer: Arc<TokenIssuer>,
}

impl LoginHandler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn AuthTokenRepository>,
        issuer: Arc<TokenIssuer>,
    ) -> Self {
        Self {
            users,
            tokens,
            issuer,
        }
    }
}

impl CommandHandler<Login> for LoginHandler {
    type Output = (IssuedToken, User);

    async fn handle(&self, command: Login) -> Result<Self::Output, CoreError> {
        let email = normalize_email(&command.email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            let _ = verify_password(command.password, dummy_hash().await?).await;
            warn!("Login attempt for unknown email");
            return Err(CoreError::InvalidCredentials);
        };

        if !verify_password(command.password, user.password_hash.clone()).await? {
            warn!("Login attempt with a wrong password for user {}", user.id);
            return Err(CoreError::InvalidCredentials);
        }

        let now = Utc::now();
        match self.tokens.delete_expired(user.id, now).await {
            Ok(0) => {}
            Ok(purged) => debug!("Purged {} expired tokens for user {}", purged, user.id),
            Err(e) => warn!("Failed to purge expired tokens for user {}: {}", user.id, e),
        }

        let issued = self.issuer.issue(user.id, &user.email, now)?;
        self.tokens.create(&issued.record).await?;

        info!("User {} logged in", user.id);
        Ok((issued, user))
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

pub async fn handle_login_request(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }

    let handler = LoginHandler::new(
        state.users.clone(),
        state.tokens.clone(),
        state.token_issuer.clone(),
    );
    let (issued, user) = handler
        .handle(Login {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserProfile::from(&user),
    }))
}

pub async fn handle_logout_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.tokens.delete_by_token(&ctx.token).await?;
    info!("User {} logged out", ctx.user_id);
    Ok(Json(serde_json::json!({ "message": "Logged out successfully" })))
}

pub async fn handle_me_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .users
        .find_by_id(ctx.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user))
}
