use crate::{Command, CoreError, domain::require_non_empty};
use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const API_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str, owner_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            api_key: generate_api_key(),
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    /// Swaps in a fresh key and returns the one it replaced.
    pub fn rotate_api_key(&mut self, now: DateTime<Utc>) -> String {
        self.updated_at = now;
        std::mem::replace(&mut self.api_key, generate_api_key())
    }
}

/// What an SDK sees when it reads its own project by key: no key, no owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProject {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Project> for PublicProject {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            name: project.name,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

pub fn generate_api_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}

// --- Commands ---

#[derive(Debug, Clone)]
pub struct CreateProject {
    pub owner_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct UpdateProject {
    pub actor_id: Uuid,
    pub project_id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteProject {
    pub actor_id: Uuid,
    pub project_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RegenerateApiKey {
    pub actor_id: Uuid,
    pub project_id: Uuid,
}

impl Command for CreateProject {}
impl Command for UpdateProject {}
impl Command for DeleteProject {}
impl Command for RegenerateApiKey {}

impl CreateProject {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_non_empty("name", &self.name)
    }
}

/// Owner check shared by every project-level operation.
pub fn ensure_owner(project: &Project, actor_id: Uuid) -> Result<(), CoreError> {
    if project.is_owned_by(actor_id) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(
            "You do not have access to this project".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_alphanumeric_and_distinct() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), API_KEY_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn rotate_returns_previous_key() {
        let mut project = Project::new("Space Miner", Uuid::new_v4(), Utc::now());
        let before = project.api_key.clone();
        let replaced = project.rotate_api_key(Utc::now());
        assert_eq!(replaced, before);
        assert_ne!(project.api_key, before);
    }

    #[test]
    fn owner_check() {
        let owner = Uuid::new_v4();
        let project = Project::new("Space Miner", owner, Utc::now());
        assert!(ensure_owner(&project, owner).is_ok());
        assert!(matches!(
            ensure_owner(&project, Uuid::new_v4()),
            Err(CoreError::Forbidden(_))
        ));
    }

    #[test]
    fn blank_name_is_rejected() {
        let cmd = CreateProject {
            owner_id: Uuid::new_v4(),
            name: "   ".into(),
        };
        assert!(matches!(cmd.validate(), Err(CoreError::Validation(_))));
    }
}
