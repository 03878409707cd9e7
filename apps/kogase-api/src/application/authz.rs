use kogase_core::{
    CoreError, ProjectRepository,
    domain::{
        ProjectScope,
        project::{Project, ensure_owner},
    },
};
use uuid::Uuid;

/// Loads a live project and checks that `actor_id` owns it.
pub async fn load_owned_project(
    projects: &dyn ProjectRepository,
    project_id: Uuid,
    actor_id: Uuid,
) -> Result<Project, CoreError> {
    let project = projects
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("Project".into()))?;
    ensure_owner(&project, actor_id)?;
    Ok(project)
}

/// Scope for owner-restricted reads. An explicit project must be owned by the
/// actor; without one the scope spans every project the actor owns.
pub async fn owned_scope(
    projects: &dyn ProjectRepository,
    project_id: Option<Uuid>,
    actor_id: Uuid,
) -> Result<ProjectScope, CoreError> {
    match project_id {
        Some(project_id) => {
            load_owned_project(projects, project_id, actor_id).await?;
            Ok(ProjectScope::project(project_id, actor_id))
        }
        None => Ok(ProjectScope::owned_by(actor_id)),
    }
}

pub fn ensure_self(actor_id: Uuid, target_id: Uuid) -> Result<(), CoreError> {
    if actor_id == target_id {
        Ok(())
    } else {
        Err(CoreError::Forbidden(
            "You can only modify your own account".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kogase_core::adapters::InMemoryStore;

    #[tokio::test]
    async fn ownership_gates_project_access() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let project = Project::new("Space Miner", owner, Utc::now());
        ProjectRepository::create(&store, &project).await.unwrap();

        let loaded = load_owned_project(&store, project.id, owner).await.unwrap();
        assert_eq!(loaded.id, project.id);

        assert!(matches!(
            load_owned_project(&store, project.id, Uuid::new_v4()).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            load_owned_project(&store, Uuid::new_v4(), owner).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn scope_defaults_to_all_owned_projects() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        assert_eq!(
            owned_scope(&store, None, owner).await.unwrap(),
            ProjectScope::owned_by(owner)
        );

        let project = Project::new("Space Miner", owner, Utc::now());
        ProjectRepository::create(&store, &project).await.unwrap();
        assert_eq!(
            owned_scope(&store, Some(project.id), owner).await.unwrap(),
            ProjectScope::project(project.id, owner)
        );
    }

    #[test]
    fn only_self_may_modify_account() {
        let me = Uuid::new_v4();
        assert!(ensure_self(me, me).is_ok());
        assert!(matches!(ensure_self(me, Uuid::new_v4()), Err(CoreError::Forbidden(_))));
    }
}
