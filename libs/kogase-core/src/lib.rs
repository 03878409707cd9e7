use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{error::Error as StdError, future::Future};
use uuid::Uuid;

pub mod adapters;
pub mod domain;

use domain::{
    ProjectScope,
    analytics::{AnalyticsSummary, SummaryWindow},
    auth_token::AuthToken,
    device::{Device, DeviceFilter, DeviceInsert, DevicePage},
    event::{Event, EventFilter, EventRecord},
    project::Project,
    session::{Session, SessionFilter},
    user::User,
    Page,
};

/// Embedded schema migrations, applied by the binary on start-up and by the
/// Postgres-backed tests.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

// Common error type for the core library
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] Box<dyn StdError + Send + Sync>),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Infrastructure(Box::new(err))
    }
}

// Marker trait for commands
pub trait Command: Send + Sync + 'static {}

// Port for handling commands
pub trait CommandHandler<C: Command>: Send + Sync {
    type Output: Send;

    fn handle(&self, command: C) -> impl Future<Output = Result<Self::Output, CoreError>> + Send;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `AlreadyExists` when a live user holds the same email.
    async fn create(&self, user: &User) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CoreError>;
    async fn list(&self, page: Page) -> Result<Vec<User>, CoreError>;
    async fn count(&self) -> Result<i64, CoreError>;
    async fn update(&self, user: &User) -> Result<(), CoreError>;
    /// Returns `false` when there was no live row to delete.
    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create(&self, project: &Project) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, CoreError>;
    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Project>, CoreError>;
    async fn list_by_owner(&self, owner_id: Uuid, page: Page) -> Result<Vec<Project>, CoreError>;
    async fn update(&self, project: &Project) -> Result<(), CoreError>;
    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait AuthTokenRepository: Send + Sync {
    async fn create(&self, token: &AuthToken) -> Result<(), CoreError>;
    /// Looks up a live token row regardless of expiry; callers compare `expires_at`.
    async fn find_by_token(&self, token: &str) -> Result<Option<AuthToken>, CoreError>;
    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), CoreError>;
    async fn delete_by_token(&self, token: &str) -> Result<(), CoreError>;
    async fn delete_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64, CoreError>;
    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, CoreError>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_by_identifier(
        &self,
        project_id: Uuid,
        identifier: &str,
    ) -> Result<Option<Device>, CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Device>, CoreError>;
    /// Inserts the device together with its install event, atomically. When a
    /// live device with the same `(project_id, identifier)` already exists
    /// nothing is written and the existing row is returned.
    async fn insert_with_install(
        &self,
        device: &Device,
        install: &Event,
    ) -> Result<DeviceInsert, CoreError>;
    /// Persists mutable attributes. `last_seen` never moves backwards.
    async fn update(&self, device: &Device) -> Result<(), CoreError>;
    async fn list(&self, filter: &DeviceFilter) -> Result<DevicePage, CoreError>;
    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, CoreError>;
    async fn update(&self, session: &Session) -> Result<(), CoreError>;
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, CoreError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Touches the device's `last_seen` and inserts the event in one unit.
    async fn record(
        &self,
        project_id: Uuid,
        record: &EventRecord,
        received_at: DateTime<Utc>,
    ) -> Result<Event, CoreError>;
    /// All or nothing. Device lookups are memoized per identifier and each
    /// distinct device is touched once; an unknown identifier aborts the batch
    /// with `DeviceNotFound`.
    async fn record_batch(
        &self,
        project_id: Uuid,
        records: &[EventRecord],
        received_at: DateTime<Utc>,
    ) -> Result<usize, CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, CoreError>;
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, CoreError>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn summary(
        &self,
        scope: &ProjectScope,
        window: &SummaryWindow,
    ) -> Result<AnalyticsSummary, CoreError>;
    /// Ids of devices whose `first_seen` lies in `[start, end)`.
    async fn devices_first_seen_between(
        &self,
        scope: &ProjectScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, CoreError>;
    /// Distinct devices with at least one event whose `timestamp` lies in
    /// `[start, end)`, optionally restricted to a cohort and a platform.
    async fn count_active_devices(
        &self,
        scope: &ProjectScope,
        cohort: Option<&[Uuid]>,
        platform: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, CoreError>;
}

// Port for resolving a client address to a country; never fails
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn country_of(&self, ip: &str) -> String;
}

// Port for caching data
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>)
    -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
}
