use crate::{
    AnalyticsRepository, AuthTokenRepository, CoreError, DeviceRepository, EventRepository,
    ProjectRepository, SessionRepository, UserRepository,
    domain::{
        Page, ProjectScope,
        analytics::{AnalyticsSummary, SummaryWindow},
        auth_token::AuthToken,
        device::{Device, DeviceFilter, DeviceInsert, DevicePage},
        event::{Event, EventFilter, EventRecord},
        project::Project,
        session::{Session, SessionFilter},
        user::User,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A row plus its soft-delete marker.
#[derive(Debug, Clone)]
struct Row<T> {
    value: T,
    deleted_at: Option<DateTime<Utc>>,
}

impl<T> Row<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            deleted_at: None,
        }
    }

    fn live(&self) -> Option<&T> {
        self.deleted_at.is_none().then_some(&self.value)
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, Row<User>>,
    projects: HashMap<Uuid, Row<Project>>,
    tokens: HashMap<Uuid, Row<AuthToken>>,
    devices: HashMap<Uuid, Row<Device>>,
    sessions: HashMap<Uuid, Row<Session>>,
    events: Vec<Row<Event>>,
}

impl Tables {
    fn owner_of(&self, project_id: Uuid) -> Option<Uuid> {
        self.projects
            .get(&project_id)
            .and_then(Row::live)
            .map(|project| project.owner_id)
    }

    fn in_scope(&self, scope: &ProjectScope, project_id: Uuid) -> bool {
        scope.admits(project_id, |id| self.owner_of(id))
    }

    fn live_device(&self, project_id: Uuid, identifier: &str) -> Option<&Device> {
        self.devices
            .values()
            .filter_map(Row::live)
            .find(|d| d.project_id == project_id && d.identifier == identifier)
    }

    fn live_device_mut(&mut self, project_id: Uuid, identifier: &str) -> Option<&mut Device> {
        self.devices
            .values_mut()
            .filter(|row| row.deleted_at.is_none())
            .map(|row| &mut row.value)
            .find(|d| d.project_id == project_id && d.identifier == identifier)
    }

    fn platform_of(&self, device_id: Uuid) -> Option<&str> {
        self.devices
            .get(&device_id)
            .map(|row| row.value.platform.as_str())
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

/// In-memory implementation of every repository port, for tests and the
/// `KOGASE_STORAGE=memory` development mode. A single lock over all tables
/// gives each operation the atomicity a database transaction would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: &User) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .filter_map(Row::live)
            .any(|u| u.email == user.email)
        {
            return Err(CoreError::AlreadyExists("Email".into()));
        }
        tables.users.insert(user.id, Row::new(user.clone()));
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).and_then(Row::live).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter_map(Row::live)
            .find(|u| u.email == email)
            .cloned())
    }

    async fn list(&self, page: Page) -> Result<Vec<User>, CoreError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().filter_map(Row::live).cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(users, page))
    }

    async fn count(&self) -> Result<i64, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().filter_map(Row::live).count() as i64)
    }

    async fn update(&self, user: &User) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&user.id) {
            Some(row) if row.deleted_at.is_none() => {
                row.value = user.clone();
                Ok(())
            }
            _ => Err(CoreError::NotFound("User".into())),
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.deleted_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn create(&self, project: &Project) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .projects
            .values()
            .filter_map(Row::live)
            .any(|p| p.api_key == project.api_key)
        {
            return Err(CoreError::AlreadyExists("API key".into()));
        }
        tables.projects.insert(project.id, Row::new(project.clone()));
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.projects.get(&id).and_then(Row::live).cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Project>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .projects
            .values()
            .filter_map(Row::live)
            .find(|p| p.api_key == api_key)
            .cloned())
    }

    async fn list_by_owner(&self, owner_id: Uuid, page: Page) -> Result<Vec<Project>, CoreError> {
        let tables = self.tables.read().await;
        let mut projects: Vec<Project> = tables
            .projects
            .values()
            .filter_map(Row::live)
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(projects, page))
    }

    async fn update(&self, project: &Project) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        match tables.projects.get_mut(&project.id) {
            Some(row) if row.deleted_at.is_none() => {
                row.value = project.clone();
                Ok(())
            }
            _ => Err(CoreError::NotFound("Project".into())),
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.projects.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.deleted_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl AuthTokenRepository for InMemoryStore {
    async fn create(&self, token: &AuthToken) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables.tokens.insert(token.id, Row::new(token.clone()));
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<AuthToken>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .values()
            .filter_map(Row::live)
            .find(|t| t.token == token)
            .cloned())
    }

    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        if let Some(row) = tables.tokens.get_mut(&id) {
            row.value.last_used_at = Some(used_at);
            row.value.updated_at = used_at;
        }
        Ok(())
    }

    async fn delete_by_token(&self, token: &str) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables.tokens.retain(|_, row| row.value.token != token);
        Ok(())
    }

    async fn delete_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables
            .tokens
            .retain(|_, row| !(row.value.user_id == user_id && row.value.is_expired(now)));
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, CoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, row| row.value.user_id != user_id);
        Ok((before - tables.tokens.len()) as u64)
    }
}

#[async_trait]
impl DeviceRepository for InMemoryStore {
    async fn find_by_identifier(
        &self,
        project_id: Uuid,
        identifier: &str,
    ) -> Result<Option<Device>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.live_device(project_id, identifier).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Device>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.devices.get(&id).and_then(Row::live).cloned())
    }

    async fn insert_with_install(
        &self,
        device: &Device,
        install: &Event,
    ) -> Result<DeviceInsert, CoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.live_device(device.project_id, &device.identifier) {
            return Ok(DeviceInsert::Existing(existing.clone()));
        }
        tables.devices.insert(device.id, Row::new(device.clone()));
        tables.events.push(Row::new(install.clone()));
        Ok(DeviceInsert::Created)
    }

    async fn update(&self, device: &Device) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        match tables.devices.get_mut(&device.id) {
            Some(row) if row.deleted_at.is_none() => {
                let last_seen = row.value.last_seen.max(device.last_seen);
                row.value = device.clone();
                row.value.last_seen = last_seen;
                Ok(())
            }
            _ => Err(CoreError::NotFound("Device".into())),
        }
    }

    async fn list(&self, filter: &DeviceFilter) -> Result<DevicePage, CoreError> {
        let tables = self.tables.read().await;
        let mut devices: Vec<Device> = tables
            .devices
            .values()
            .filter_map(Row::live)
            .filter(|d| tables.in_scope(&filter.scope, d.project_id))
            .filter(|d| filter.platform.as_deref().is_none_or(|p| d.platform == p))
            .filter(|d| filter.from.is_none_or(|from| d.first_seen >= from))
            .filter(|d| filter.to.is_none_or(|to| d.last_seen <= to))
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        let total_count = devices.len() as i64;
        Ok(DevicePage {
            devices: paginate(devices, filter.page),
            total_count,
        })
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.devices.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.deleted_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create(&self, session: &Session) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        let consistent = tables
            .devices
            .get(&session.device_id)
            .is_some_and(|row| row.value.project_id == session.project_id);
        if !consistent {
            return Err(CoreError::DeviceNotFound(session.device_id.to_string()));
        }
        tables.sessions.insert(session.id, Row::new(session.clone()));
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(&id).and_then(Row::live).cloned())
    }

    async fn update(&self, session: &Session) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(&session.id) {
            Some(row) if row.deleted_at.is_none() => {
                row.value = session.clone();
                Ok(())
            }
            _ => Err(CoreError::NotFound("Session".into())),
        }
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, CoreError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter_map(Row::live)
            .filter(|s| tables.in_scope(&filter.scope, s.project_id))
            .filter(|s| filter.device_id.is_none_or(|id| s.device_id == id))
            .filter(|s| filter.from.is_none_or(|from| s.begin_at >= from))
            .filter(|s| filter.to.is_none_or(|to| s.begin_at <= to))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.begin_at.cmp(&a.begin_at).then(a.id.cmp(&b.id)));
        Ok(paginate(sessions, filter.page))
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn record(
        &self,
        project_id: Uuid,
        record: &EventRecord,
        received_at: DateTime<Utc>,
    ) -> Result<Event, CoreError> {
        let mut tables = self.tables.write().await;
        let device = tables
            .live_device_mut(project_id, record.device_identifier())
            .ok_or_else(|| CoreError::DeviceNotFound(record.device_identifier().to_string()))?;
        device.last_seen = device.last_seen.max(received_at);
        device.updated_at = received_at;
        let event = Event::from_record(project_id, device.id, record, received_at);
        tables.events.push(Row::new(event.clone()));
        Ok(event)
    }

    async fn record_batch(
        &self,
        project_id: Uuid,
        records: &[EventRecord],
        received_at: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let mut tables = self.tables.write().await;

        // Resolve everything before mutating so a bad identifier leaves no trace.
        let mut resolved: HashMap<&str, Uuid> = HashMap::new();
        for record in records {
            let identifier = record.device_identifier();
            if resolved.contains_key(identifier) {
                continue;
            }
            let device = tables
                .live_device(project_id, identifier)
                .ok_or_else(|| CoreError::DeviceNotFound(identifier.to_string()))?;
            resolved.insert(identifier, device.id);
        }

        for device_id in resolved.values() {
            if let Some(row) = tables.devices.get_mut(device_id) {
                row.value.last_seen = row.value.last_seen.max(received_at);
                row.value.updated_at = received_at;
            }
        }
        for record in records {
            let device_id = resolved[record.device_identifier()];
            let event = Event::from_record(project_id, device_id, record, received_at);
            tables.events.push(Row::new(event));
        }
        Ok(records.len())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter_map(Row::live)
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, CoreError> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .iter()
            .filter_map(Row::live)
            .filter(|e| tables.in_scope(&filter.scope, e.project_id))
            .filter(|e| filter.device_id.is_none_or(|id| e.device_id == id))
            .filter(|e| filter.event_type.as_deref().is_none_or(|t| e.event_type == t))
            .filter(|e| filter.event_name.as_deref().is_none_or(|n| e.event_name == n))
            .filter(|e| {
                filter
                    .platform
                    .as_deref()
                    .is_none_or(|p| tables.platform_of(e.device_id) == Some(p))
            })
            .filter(|e| filter.from.is_none_or(|from| e.timestamp >= from))
            .filter(|e| filter.to.is_none_or(|to| e.timestamp <= to))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        Ok(paginate(events, filter.page))
    }
}

#[async_trait]
impl AnalyticsRepository for InMemoryStore {
    async fn summary(
        &self,
        scope: &ProjectScope,
        window: &SummaryWindow,
    ) -> Result<AnalyticsSummary, CoreError> {
        let tables = self.tables.read().await;
        let sessions: Vec<&Session> = tables
            .sessions
            .values()
            .filter_map(Row::live)
            .filter(|s| tables.in_scope(scope, s.project_id))
            .filter(|s| window.contains(s.begin_at))
            .collect();

        let dau = sessions
            .iter()
            .filter(|s| s.begin_at >= window.dau_since())
            .count() as i64;
        let mau = sessions
            .iter()
            .filter(|s| s.begin_at >= window.mau_since())
            .count() as i64;
        let total_duration = sessions
            .iter()
            .filter_map(|s| s.duration)
            .fold(0i64, |acc, d| acc.saturating_add(d));
        let total_installs = tables
            .events
            .iter()
            .filter_map(Row::live)
            .filter(|e| tables.in_scope(scope, e.project_id))
            .filter(|e| e.is_install() && window.contains(e.received_at))
            .count() as i64;

        Ok(AnalyticsSummary {
            dau,
            mau,
            total_duration,
            total_installs,
        })
    }

    async fn devices_first_seen_between(
        &self,
        scope: &ProjectScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .devices
            .values()
            .filter_map(Row::live)
            .filter(|d| tables.in_scope(scope, d.project_id))
            .filter(|d| d.first_seen >= start && d.first_seen < end)
            .map(|d| d.id)
            .collect())
    }

    async fn count_active_devices(
        &self,
        scope: &ProjectScope,
        cohort: Option<&[Uuid]>,
        platform: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let tables = self.tables.read().await;
        let active: HashSet<Uuid> = tables
            .events
            .iter()
            .filter_map(Row::live)
            .filter(|e| tables.in_scope(scope, e.project_id))
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .filter(|e| cohort.is_none_or(|ids| ids.contains(&e.device_id)))
            .filter(|e| platform.is_none_or(|p| tables.platform_of(e.device_id) == Some(p)))
            .map(|e| e.device_id)
            .collect();
        Ok(active.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::RegisterDevice;
    use chrono::TimeDelta;

    async fn seed_project(store: &InMemoryStore) -> Project {
        let now = Utc::now();
        let owner = User::new("owner@studio.io", "Owner", "hash".into(), now);
        UserRepository::create(store, &owner).await.unwrap();
        let project = Project::new("Space Miner", owner.id, now);
        ProjectRepository::create(store, &project).await.unwrap();
        project
    }

    fn sighting(project_id: Uuid, identifier: &str) -> RegisterDevice {
        RegisterDevice {
            project_id,
            identifier: identifier.into(),
            platform: "iOS".into(),
            platform_version: "17.0".into(),
            app_version: "1.0.3".into(),
            client_ip: String::new(),
        }
    }

    async fn seed_device(store: &InMemoryStore, project_id: Uuid, identifier: &str) -> Device {
        let device = Device::first_sighting(&sighting(project_id, identifier), "Unknown".into(), Utc::now());
        let install = Event::install(&device);
        store.insert_with_install(&device, &install).await.unwrap();
        device
    }

    fn record(identifier: &str) -> EventRecord {
        EventRecord {
            identifier: identifier.into(),
            event_type: "progression".into(),
            event_name: "level_up".into(),
            payloads: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        UserRepository::create(&store, &User::new("a@b.io", "A", "h".into(), now))
            .await
            .unwrap();
        let err = UserRepository::create(&store, &User::new("a@b.io", "B", "h".into(), now))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn second_insert_returns_existing_device() {
        let store = InMemoryStore::new();
        let project = seed_project(&store).await;
        let first = seed_device(&store, project.id, "abc").await;

        let twin = Device::first_sighting(&sighting(project.id, "abc"), "Unknown".into(), Utc::now());
        let outcome = store
            .insert_with_install(&twin, &Event::install(&twin))
            .await
            .unwrap();
        match outcome {
            DeviceInsert::Existing(existing) => assert_eq!(existing.id, first.id),
            DeviceInsert::Created => panic!("expected the existing device"),
        }

        let installs = EventRepository::list(&store, &EventFilter::default()).await.unwrap();
        assert_eq!(installs.len(), 1);
    }

    #[tokio::test]
    async fn batch_with_unknown_device_writes_nothing() {
        let store = InMemoryStore::new();
        let project = seed_project(&store).await;
        let device = seed_device(&store, project.id, "abc").await;

        let bad = vec![record("abc"), record("abc"), record("zzz")];
        let err = store
            .record_batch(project.id, &bad, Utc::now() + TimeDelta::seconds(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound(id) if id == "zzz"));

        let events = EventRepository::list(&store, &EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1, "only the install event remains");
        let unchanged = DeviceRepository::find_by_id(&store, device.id).await.unwrap().unwrap();
        assert_eq!(unchanged.last_seen, device.last_seen);

        let good = vec![record("abc"), record("abc"), record("abc")];
        assert_eq!(store.record_batch(project.id, &good, Utc::now()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn record_rejects_device_of_another_project() {
        let store = InMemoryStore::new();
        let project = seed_project(&store).await;
        seed_device(&store, project.id, "abc").await;

        let err = store
            .record(Uuid::new_v4(), &record("abc"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_invisible() {
        let store = InMemoryStore::new();
        let project = seed_project(&store).await;
        let device = seed_device(&store, project.id, "abc").await;

        assert!(DeviceRepository::soft_delete(&store, device.id).await.unwrap());
        assert!(!DeviceRepository::soft_delete(&store, device.id).await.unwrap());
        assert!(DeviceRepository::find_by_id(&store, device.id).await.unwrap().is_none());
        assert!(store.find_by_identifier(project.id, "abc").await.unwrap().is_none());

        // The identifier is free again once the old device is gone.
        let again = seed_device(&store, project.id, "abc").await;
        assert_ne!(again.id, device.id);
    }

    #[tokio::test]
    async fn summary_counts_sessions_in_now_windows() {
        let store = InMemoryStore::new();
        let project = seed_project(&store).await;
        let device = seed_device(&store, project.id, "abc").await;
        let now = Utc::now();

        for hours_ago in [1, 10, 48, 24 * 20, 24 * 45] {
            let mut session = Session::open(project.id, device.id, now - TimeDelta::hours(hours_ago));
            session.close(session.begin_at + TimeDelta::seconds(60));
            SessionRepository::create(&store, &session).await.unwrap();
        }
        SessionRepository::create(&store, &Session::open(project.id, device.id, now))
            .await
            .unwrap();

        let window = SummaryWindow {
            from: None,
            to: None,
            now: now + TimeDelta::seconds(1),
        };
        let summary = store
            .summary(&ProjectScope::owned_by(project.owner_id), &window)
            .await
            .unwrap();
        assert_eq!(summary.dau, 3);
        assert_eq!(summary.mau, 5);
        assert_eq!(summary.total_duration, 5 * 60_000_000_000);
        assert_eq!(summary.total_installs, 1);

        let stranger = store
            .summary(&ProjectScope::owned_by(Uuid::new_v4()), &window)
            .await
            .unwrap();
        assert_eq!(stranger, AnalyticsSummary::default());
    }

    #[tokio::test]
    async fn total_duration_saturates() {
        let store = InMemoryStore::new();
        let project = seed_project(&store).await;
        let device = seed_device(&store, project.id, "abc").await;
        let now = Utc::now();

        // Spans too long for i64 nanoseconds are stored as i64::MAX.
        for _ in 0..2 {
            let mut session = Session::open(project.id, device.id, now - TimeDelta::hours(1));
            session.close(now + TimeDelta::days(365 * 400));
            assert_eq!(session.duration, Some(i64::MAX));
            SessionRepository::create(&store, &session).await.unwrap();
        }

        let window = SummaryWindow {
            from: None,
            to: None,
            now,
        };
        let summary = store
            .summary(&ProjectScope::owned_by(project.owner_id), &window)
            .await
            .unwrap();
        assert_eq!(summary.total_duration, i64::MAX);
        assert_eq!(summary.dau, 2);
    }
}
