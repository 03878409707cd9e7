use crate::{Command, CoreError, domain::require_non_empty};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, name: &str, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            name: name.trim().to_string(),
            password_hash,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public projection of a user, as embedded in login responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}

// --- Commands ---

#[derive(Debug, Clone)]
pub struct RegisterUser {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
    pub actor_id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteUser {
    pub actor_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct Login {
    pub email: String,
    pub password: String,
}

impl Command for RegisterUser {}
impl Command for UpdateUser {}
impl Command for DeleteUser {}
impl Command for Login {}

impl RegisterUser {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_email(&self.email)?;
        require_non_empty("name", &self.name)?;
        validate_password(&self.password)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), CoreError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(CoreError::Validation("A valid email is required".into())),
    }
}

pub fn validate_password(password: &str) -> Result<(), CoreError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Hashes on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password(password: String) -> Result<String, CoreError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| CoreError::Internal(format!("password hashing task failed: {e}")))?
}

/// Constant-time comparison of `password` against a PHC hash string.
pub async fn verify_password(password: String, password_hash: String) -> Result<bool, CoreError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|e| CoreError::Internal(format!("stored password hash is invalid: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| CoreError::Internal(format!("password verification task failed: {e}")))?
}
