use crate::{
    AnalyticsRepository, AuthTokenRepository, CoreError, DeviceRepository, EventRepository,
    ProjectRepository, SessionRepository, UserRepository,
    domain::{
        Page, ProjectScope,
        analytics::{AnalyticsSummary, SummaryWindow},
        auth_token::AuthToken,
        device::{Device, DeviceFilter, DeviceInsert, DevicePage},
        event::{
            Event, EventFilter, EventRecord, INSTALL_EVENT_NAME, PREDEFINED_EVENT_TYPE, Payloads,
        },
        project::Project,
        session::{Session, SessionFilter},
        user::User,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, types::Json};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, password_hash, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, name, api_key, owner_id, created_at, updated_at";
const TOKEN_COLUMNS: &str = "id, user_id, token, expires_at, last_used_at, created_at, updated_at";
const DEVICE_COLUMNS: &str = "id, project_id, identifier, platform, platform_version, app_version, \
     first_seen, last_seen, ip_address, country, created_at, updated_at";
const SESSION_COLUMNS: &str =
    "id, project_id, device_id, begin_at, end_at, duration, created_at, updated_at";
const EVENT_COLUMNS: &str = r#"id, project_id, device_id, event_type, event_name, payloads, "timestamp", received_at, created_at, updated_at"#;

// Keeps each multi-row insert well under the bind parameter limit.
const EVENT_INSERT_CHUNK: usize = 1000;

#[derive(sqlx::FromRow, Debug)]
struct EventRow {
    id: Uuid,
    project_id: Uuid,
    device_id: Uuid,
    event_type: String,
    event_name: String,
    payloads: Json<Payloads>,
    timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            device_id: row.device_id,
            event_type: row.event_type,
            event_name: row.event_name,
            payloads: row.payloads.0,
            timestamp: row.timestamp,
            received_at: row.received_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Appends the project restriction; every query using it selects from a
/// single table carrying a `project_id` column.
fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: &ProjectScope) {
    if let Some(project_id) = scope.project_id {
        qb.push(" AND project_id = ").push_bind(project_id);
    }
    if let Some(owner_id) = scope.owner_id {
        qb.push(" AND project_id IN (SELECT id FROM projects WHERE deleted_at IS NULL AND owner_id = ")
            .push_bind(owner_id)
            .push(")");
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: Page) {
    qb.push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
}

fn push_device_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &DeviceFilter) {
    qb.push(" WHERE deleted_at IS NULL");
    push_scope(qb, &filter.scope);
    if let Some(platform) = &filter.platform {
        qb.push(" AND platform = ").push_bind(platform.clone());
    }
    if let Some(from) = filter.from {
        qb.push(" AND first_seen >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND last_seen <= ").push_bind(to);
    }
}

async fn insert_event(conn: &mut PgConnection, event: &Event) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO events ({EVENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    ))
    .bind(event.id)
    .bind(event.project_id)
    .bind(event.device_id)
    .bind(&event.event_type)
    .bind(&event.event_name)
    .bind(Json(event.payloads.clone()))
    .bind(event.timestamp)
    .bind(event.received_at)
    .bind(event.created_at)
    .bind(event.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Advances `last_seen` of the live device and returns its id.
async fn touch_device(
    conn: &mut PgConnection,
    project_id: Uuid,
    identifier: &str,
    seen_at: DateTime<Utc>,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE devices
        SET last_seen = GREATEST(last_seen, $3), updated_at = $3
        WHERE project_id = $1 AND identifier = $2 AND deleted_at IS NULL
        RETURNING id
        "#,
    )
    .bind(project_id)
    .bind(identifier)
    .bind(seen_at)
    .fetch_optional(conn)
    .await
}

/// PostgreSQL implementation of every repository port using sqlx.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    async fn create(&self, user: &User) -> Result<(), CoreError> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                CoreError::AlreadyExists("Email".into())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list(&self, page: Page) -> Result<Vec<User>, CoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL \
             ORDER BY created_at DESC, id LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn count(&self) -> Result<i64, CoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn update(&self, user: &User) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE users SET name = $2, password_hash = $3, updated_at = $4 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("User".into()));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProjectRepository for PostgresStore {
    async fn create(&self, project: &Project) -> Result<(), CoreError> {
        sqlx::query(&format!(
            "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.api_key)
        .bind(project.owner_id)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                CoreError::AlreadyExists("API key".into())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, CoreError> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Project>, CoreError> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE api_key = $1 AND deleted_at IS NULL"
        ))
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(project)
    }

    async fn list_by_owner(&self, owner_id: Uuid, page: Page) -> Result<Vec<Project>, CoreError> {
        let projects = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        ))
        .bind(owner_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    async fn update(&self, project: &Project) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE projects SET name = $2, api_key = $3, updated_at = $4 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.api_key)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("Project".into()));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE projects SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuthTokenRepository for PostgresStore {
    async fn create(&self, token: &AuthToken) -> Result<(), CoreError> {
        sqlx::query(&format!(
            "INSERT INTO auth_tokens ({TOKEN_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(token.last_used_at)
        .bind(token.created_at)
        .bind(token.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<AuthToken>, CoreError> {
        let row = sqlx::query_as::<_, AuthToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM auth_tokens WHERE token = $1 AND deleted_at IS NULL"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query("UPDATE auth_tokens SET last_used_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(used_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_token(&self, token: &str) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE auth_tokens SET deleted_at = NOW() WHERE token = $1 AND deleted_at IS NULL",
        )
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "UPDATE auth_tokens SET deleted_at = $2 \
             WHERE user_id = $1 AND expires_at <= $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "UPDATE auth_tokens SET deleted_at = NOW() WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DeviceRepository for PostgresStore {
    async fn find_by_identifier(
        &self,
        project_id: Uuid,
        identifier: &str,
    ) -> Result<Option<Device>, CoreError> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices \
             WHERE project_id = $1 AND identifier = $2 AND deleted_at IS NULL"
        ))
        .bind(project_id)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Device>, CoreError> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn insert_with_install(
        &self,
        device: &Device,
        install: &Event,
    ) -> Result<DeviceInsert, CoreError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent insert of the same key blocks here until the other
        // transaction settles, then falls through to DO NOTHING.
        let inserted: Option<Uuid> = sqlx::query_scalar(&format!(
            "INSERT INTO devices ({DEVICE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (project_id, identifier) WHERE deleted_at IS NULL DO NOTHING \
             RETURNING id"
        ))
        .bind(device.id)
        .bind(device.project_id)
        .bind(&device.identifier)
        .bind(&device.platform)
        .bind(&device.platform_version)
        .bind(&device.app_version)
        .bind(device.first_seen)
        .bind(device.last_seen)
        .bind(&device.ip_address)
        .bind(&device.country)
        .bind(device.created_at)
        .bind(device.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            debug!(
                "Device {} already registered in project {}",
                device.identifier, device.project_id
            );
            let existing = self
                .find_by_identifier(device.project_id, &device.identifier)
                .await?
                .ok_or_else(|| {
                    CoreError::Internal("conflicting device disappeared before it could be read".into())
                })?;
            return Ok(DeviceInsert::Existing(existing));
        }

        insert_event(&mut tx, install).await?;
        tx.commit().await?;
        Ok(DeviceInsert::Created)
    }

    async fn update(&self, device: &Device) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE devices
            SET platform = $2, platform_version = $3, app_version = $4,
                last_seen = GREATEST(last_seen, $5), ip_address = $6, country = $7, updated_at = $8
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(device.id)
        .bind(&device.platform)
        .bind(&device.platform_version)
        .bind(&device.app_version)
        .bind(device.last_seen)
        .bind(&device.ip_address)
        .bind(&device.country)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("Device".into()));
        }
        Ok(())
    }

    async fn list(&self, filter: &DeviceFilter) -> Result<DevicePage, CoreError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM devices");
        push_device_filters(&mut count_query, filter);
        let total_count: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {DEVICE_COLUMNS} FROM devices"));
        push_device_filters(&mut query, filter);
        query.push(" ORDER BY last_seen DESC, id");
        push_page(&mut query, filter.page);
        let devices = query
            .build_query_as::<Device>()
            .fetch_all(&self.pool)
            .await?;

        Ok(DevicePage {
            devices,
            total_count,
        })
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE devices SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionRepository for PostgresStore {
    async fn create(&self, session: &Session) -> Result<(), CoreError> {
        sqlx::query(&format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(session.id)
        .bind(session.project_id)
        .bind(session.device_id)
        .bind(session.begin_at)
        .bind(session.end_at)
        .bind(session.duration)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, CoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn update(&self, session: &Session) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET end_at = $2, duration = $3, updated_at = $4 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(session.id)
        .bind(session.end_at)
        .bind(session.duration)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound("Session".into()));
        }
        Ok(())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, CoreError> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE deleted_at IS NULL"
        ));
        push_scope(&mut query, &filter.scope);
        if let Some(device_id) = filter.device_id {
            query.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(from) = filter.from {
            query.push(" AND begin_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND begin_at <= ").push_bind(to);
        }
        query.push(" ORDER BY begin_at DESC, id");
        push_page(&mut query, filter.page);

        let sessions = query
            .build_query_as::<Session>()
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }
}

#[async_trait]
impl EventRepository for PostgresStore {
    async fn record(
        &self,
        project_id: Uuid,
        record: &EventRecord,
        received_at: DateTime<Utc>,
    ) -> Result<Event, CoreError> {
        let mut tx = self.pool.begin().await?;
        let identifier = record.device_identifier();
        let device_id = touch_device(&mut tx, project_id, identifier, received_at)
            .await?
            .ok_or_else(|| CoreError::DeviceNotFound(identifier.to_string()))?;
        let event = Event::from_record(project_id, device_id, record, received_at);
        insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn record_batch(
        &self,
        project_id: Uuid,
        records: &[EventRecord],
        received_at: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Dropping the transaction on any early return rolls everything back.
        let mut tx = self.pool.begin().await?;
        let mut devices: HashMap<&str, Uuid> = HashMap::new();
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            let identifier = record.device_identifier();
            let device_id = match devices.get(identifier) {
                Some(id) => *id,
                None => {
                    let id = touch_device(&mut tx, project_id, identifier, received_at)
                        .await?
                        .ok_or_else(|| CoreError::DeviceNotFound(identifier.to_string()))?;
                    devices.insert(identifier, id);
                    id
                }
            };
            events.push(Event::from_record(project_id, device_id, record, received_at));
        }

        for chunk in events.chunks(EVENT_INSERT_CHUNK) {
            let mut insert = QueryBuilder::<Postgres>::new(format!("INSERT INTO events ({EVENT_COLUMNS}) "));
            insert.push_values(chunk, |mut row, event| {
                row.push_bind(event.id)
                    .push_bind(event.project_id)
                    .push_bind(event.device_id)
                    .push_bind(event.event_type.clone())
                    .push_bind(event.event_name.clone())
                    .push_bind(Json(event.payloads.clone()))
                    .push_bind(event.timestamp)
                    .push_bind(event.received_at)
                    .push_bind(event.created_at)
                    .push_bind(event.updated_at);
            });
            insert.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(events.len())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Event>, CoreError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Event::from))
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, CoreError> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE deleted_at IS NULL"
        ));
        push_scope(&mut query, &filter.scope);
        if let Some(device_id) = filter.device_id {
            query.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(event_type) = &filter.event_type {
            query.push(" AND event_type = ").push_bind(event_type.clone());
        }
        if let Some(event_name) = &filter.event_name {
            query.push(" AND event_name = ").push_bind(event_name.clone());
        }
        if let Some(platform) = &filter.platform {
            query
                .push(" AND device_id IN (SELECT id FROM devices WHERE platform = ")
                .push_bind(platform.clone())
                .push(")");
        }
        if let Some(from) = filter.from {
            query.push(r#" AND "timestamp" >= "#).push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(r#" AND "timestamp" <= "#).push_bind(to);
        }
        query.push(r#" ORDER BY "timestamp" DESC, id"#);
        push_page(&mut query, filter.page);

        let rows = query
            .build_query_as::<EventRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[async_trait]
impl AnalyticsRepository for PostgresStore {
    async fn summary(
        &self,
        scope: &ProjectScope,
        window: &SummaryWindow,
    ) -> Result<AnalyticsSummary, CoreError> {
        let mut sessions = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FILTER (WHERE begin_at >= ");
        sessions
            .push_bind(window.dau_since())
            .push("), COUNT(*) FILTER (WHERE begin_at >= ")
            .push_bind(window.mau_since())
            .push("), LEAST(COALESCE(SUM(duration), 0), 9223372036854775807)::BIGINT FROM sessions WHERE deleted_at IS NULL");
        push_scope(&mut sessions, scope);
        if let Some(from) = window.from {
            sessions.push(" AND begin_at >= ").push_bind(from);
        }
        if let Some(to) = window.to {
            sessions.push(" AND begin_at <= ").push_bind(to);
        }
        let (dau, mau, total_duration): (i64, i64, i64) = sessions
            .build_query_as()
            .fetch_one(&self.pool)
            .await?;

        let mut installs =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events WHERE deleted_at IS NULL");
        installs
            .push(" AND event_type = ")
            .push_bind(PREDEFINED_EVENT_TYPE)
            .push(" AND event_name = ")
            .push_bind(INSTALL_EVENT_NAME);
        push_scope(&mut installs, scope);
        if let Some(from) = window.from {
            installs.push(" AND received_at >= ").push_bind(from);
        }
        if let Some(to) = window.to {
            installs.push(" AND received_at <= ").push_bind(to);
        }
        let total_installs: i64 = installs
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

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
        let mut query = QueryBuilder::<Postgres>::new("SELECT id FROM devices WHERE deleted_at IS NULL");
        push_scope(&mut query, scope);
        query
            .push(" AND first_seen >= ")
            .push_bind(start)
            .push(" AND first_seen < ")
            .push_bind(end);
        let ids = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn count_active_devices(
        &self,
        scope: &ProjectScope,
        cohort: Option<&[Uuid]>,
        platform: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(DISTINCT device_id) FROM events WHERE deleted_at IS NULL",
        );
        push_scope(&mut query, scope);
        query
            .push(r#" AND "timestamp" >= "#)
            .push_bind(start)
            .push(r#" AND "timestamp" < "#)
            .push_bind(end);
        if let Some(ids) = cohort {
            query.push(" AND device_id = ANY(").push_bind(ids.to_vec()).push(")");
        }
        if let Some(platform) = platform {
            query
                .push(" AND device_id IN (SELECT id FROM devices WHERE platform = ")
                .push_bind(platform.to_string())
                .push(")");
        }
        let count = query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
