use crate::AppState;
use crate::application::{ApiError, ApiJson};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use kogase_core::{
    CommandHandler, CoreError, UserRepository,
    domain::user::{RegisterUser, User, hash_password, normalize_email},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub struct RegisterUserHandler {
    users: Arc<dyn UserRepository>,
}

impl RegisterUserHandler {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

impl CommandHandler<RegisterUser> for RegisterUserHandler {
    type Output = User;

    async fn handle(&self, command: RegisterUser) -> Result<User, CoreError> {
        command.validate()?;

        if self
            .users
            .find_by_email(&normalize_email(&command.email))
            .await?
            .is_some()
        {
            return Err(CoreError::AlreadyExists("Email".into()));
        }

        let password_hash = hash_password(command.password).await?;
        let user = User::new(&command.email, &command.name, password_hash, Utc::now());
        // A concurrent registration can still win; the store reports it as AlreadyExists.
        self.users.create(&user).await?;

        info!("Registered user {}", user.id);
        Ok(user)
    }
}

/// Creates the administrator account when the store has no users at all.
/// Returns the account only when it was created by this call.
pub async fn bootstrap_admin(
    users: Arc<dyn UserRepository>,
    email: &str,
    password: &str,
) -> Result<Option<User>, CoreError> {
    if users.count().await? > 0 {
        return Ok(None);
    }

    let handler = RegisterUserHandler::new(users);
    let admin = handler
        .handle(RegisterUser {
            email: email.to_string(),
            name: "Admin".to_string(),
            password: password.to_string(),
        })
        .await?;
    info!("Created default administrator {}", admin.email);
    Ok(Some(admin))
}

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
}

pub async fn handle_register_user_request(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handler = RegisterUserHandler::new(state.users.clone());
    let user = handler
        .handle(RegisterUser {
            email: payload.email,
            name: payload.name,
            password: payload.password,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kogase_core::adapters::InMemoryStore;

    #[tokio::test]
    async fn admin_is_created_only_into_an_empty_store() {
        let users: Arc<dyn UserRepository> = Arc::new(InMemoryStore::new());

        let created = bootstrap_admin(users.clone(), "admin@kogase.io", "Admin@123")
            .await
            .unwrap();
        assert_eq!(created.map(|u| u.email), Some("admin@kogase.io".to_string()));

        let again = bootstrap_admin(users.clone(), "other@kogase.io", "Admin@123")
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict_regardless_of_case() {
        let handler = RegisterUserHandler::new(Arc::new(InMemoryStore::new()));
        let command = RegisterUser {
            email: "dev@studio.io".into(),
            name: "Dev".into(),
            password: "hunter22".into(),
        };
        handler.handle(command.clone()).await.unwrap();

        let shouting = RegisterUser {
            email: "DEV@Studio.io".into(),
            ..command
        };
        assert!(matches!(
            handler.handle(shouting).await,
            Err(CoreError::AlreadyExists(_))
        ));
    }
}
