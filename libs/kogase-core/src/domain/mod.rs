use uuid::Uuid;

pub mod analytics;
pub mod auth_token;
pub mod device;
pub mod event;
pub mod project;
pub mod session;
pub mod user;

/// Restricts a read to one project, to the projects of one owner, or both.
/// An empty scope spans every project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectScope {
    pub project_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
}

impl ProjectScope {
    pub fn owned_by(owner_id: Uuid) -> Self {
        Self {
            project_id: None,
            owner_id: Some(owner_id),
        }
    }

    pub fn project(project_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            owner_id: Some(owner_id),
        }
    }

    /// In-process counterpart of the SQL scope filter. `owner_of` resolves a
    /// project id to its live owner.
    pub fn admits(&self, project_id: Uuid, owner_of: impl Fn(Uuid) -> Option<Uuid>) -> bool {
        if self.project_id.is_some_and(|id| id != project_id) {
            return false;
        }
        match self.owner_id {
            Some(owner_id) => owner_of(project_id) == Some(owner_id),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 20;

    /// Non-positive limits fall back to the default; larger ones are capped.
    pub fn new(limit: Option<i64>, offset: Option<i64>, max_limit: i64) -> Self {
        let limit = match limit {
            Some(limit) if limit > 0 => limit.min(max_limit),
            _ => Self::DEFAULT_LIMIT.min(max_limit),
        };
        let offset = offset.unwrap_or(0).max(0);
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), crate::CoreError> {
    if value.trim().is_empty() {
        return Err(crate::CoreError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_caps() {
        assert_eq!(Page::new(None, None, 100), Page { limit: 20, offset: 0 });
        assert_eq!(Page::new(Some(0), Some(5), 100), Page { limit: 20, offset: 5 });
        assert_eq!(Page::new(Some(-3), Some(-1), 100), Page { limit: 20, offset: 0 });
        assert_eq!(Page::new(Some(5000), None, 1000).limit, 1000);
        assert_eq!(Page::new(Some(150), None, 100).limit, 100);
    }

    #[test]
    fn scope_admits_by_project_and_owner() {
        let owner = Uuid::new_v4();
        let project = Uuid::new_v4();
        let other_project = Uuid::new_v4();
        let owner_of = |id: Uuid| if id == project { Some(owner) } else { Some(Uuid::nil()) };

        assert!(ProjectScope::default().admits(other_project, owner_of));
        assert!(ProjectScope::owned_by(owner).admits(project, owner_of));
        assert!(!ProjectScope::owned_by(owner).admits(other_project, owner_of));
        assert!(!ProjectScope::project(other_project, owner).admits(project, owner_of));
    }
}
