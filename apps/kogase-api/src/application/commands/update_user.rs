use crate::AppState;
use crate::application::{ApiError, ApiJson, authz::ensure_self, middleware::AuthenticatedUser, parse_id};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use kogase_core::{
    AuthTokenRepository, CommandHandler, CoreError, UserRepository,
    domain::user::{DeleteUser, UpdateUser, User, hash_password, validate_password},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub struct UpdateUserHandler {
    users: Arc<dyn UserRepository>,
}

impl UpdateUserHandler {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

impl CommandHandler<UpdateUser> for UpdateUserHandler {
    type Output = User;

    async fn handle(&self, command: UpdateUser) -> Result<User, CoreError> {
        ensure_self(command.actor_id, command.user_id)?;

        let mut user = self
            .users
            .find_by_id(command.user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("User".into()))?;

        if let Some(name) = command.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            user.name = name.to_string();
        }
        if let Some(password) = command.password.filter(|p| !p.is_empty()) {
            validate_password(&password)?;
            user.password_hash = hash_password(password).await?;
        }
        user.updated_at = Utc::now();

        self.users.update(&user).await?;
        info!("Updated user {}", user.id);
        Ok(user)
    }
}

pub struct DeleteUserHandler {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn AuthTokenRepository>,
}

impl DeleteUserHandler {
    pub fn new(users: Arc<dyn UserRepository>, tokens: Arc<dyn AuthTokenRepository>) -> Self {
        Self { users, tokens }
    }
}

impl CommandHandler<DeleteUser> for DeleteUserHandler {
    type Output = ();

    async fn handle(&self, command: DeleteUser) -> Result<(), CoreError> {
        ensure_self(command.actor_id, command.user_id)?;

        if !self.users.soft_delete(command.user_id).await? {
            return Err(CoreError::NotFound("User".into()));
        }
        match self.tokens.delete_for_user(command.user_id).await {
            Ok(revoked) => info!("Deleted user {} and revoked {} tokens", command.user_id, revoked),
            Err(e) => warn!("User {} deleted but token revocation failed: {}", command.user_id, e),
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub password: Option<String>,
}

pub async fn handle_update_user_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(user_id): Path<String>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let user_id = parse_id(&user_id, "user")?;
    let handler = UpdateUserHandler::new(state.users.clone());
    let user = handler
        .handle(UpdateUser {
            actor_id: ctx.user_id,
            user_id,
            name: payload.name,
            password: payload.password,
        })
        .await?;
    Ok(Json(user))
}

pub async fn handle_delete_user_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = parse_id(&user_id, "user")?;
    let handler = DeleteUserHandler::new(state.users.clone(), state.tokens.clone());
    handler
        .handle(DeleteUser {
            actor_id: ctx.user_id,
            user_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
