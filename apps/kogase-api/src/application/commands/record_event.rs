use crate::AppState;
use crate::application::{ApiError, ApiJson, middleware::AuthenticatedProject};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use kogase_core::{
    CommandHandler, CoreError, EventRepository,
    domain::event::{Event, EventRecord, RecordEvent, RecordEventBatch},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct RecordEventHandler {
    events: Arc<dyn EventRepository>,
}

impl RecordEventHandler {
    pub fn new(events: Arc<dyn EventRepository>) -> Self {
        Self { events }
    }
}

impl CommandHandler<RecordEvent> for RecordEventHandler {
    type Output = Event;

    async fn handle(&self, command: RecordEvent) -> Result<Event, CoreError> {
        command.record.validate()?;
        let event = self
            .events
            .record(command.project_id, &command.record, Utc::now())
            .await?;
        debug!(
            "Recorded {}/{} for device {}",
            event.event_type, event.event_name, event.device_id
        );
        Ok(event)
    }
}

pub struct RecordEventBatchHandler {
    events: Arc<dyn EventRepository>,
}

impl RecordEventBatchHandler {
    pub fn new(events: Arc<dyn EventRepository>) -> Self {
        Self { events }
    }
}

impl CommandHandler<RecordEventBatch> for RecordEventBatchHandler {
    type Output = usize;

    async fn handle(&self, command: RecordEventBatch) -> Result<usize, CoreError> {
        for (index, record) in command.records.iter().enumerate() {
            record.validate().map_err(|e| match e {
                CoreError::Validation(message) => {
                    CoreError::Validation(format!("events[{index}]: {message}"))
                }
                other => other,
            })?;
        }
        if command.records.is_empty() {
            return Ok(0);
        }

        let count = self
            .events
            .record_batch(command.project_id, &command.records, Utc::now())
            .await?;
        info!("Recorded batch of {} events for project {}", count, command.project_id);
        Ok(count)
    }
}

#[derive(Deserialize)]
pub struct RecordEventBatchRequest {
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

pub async fn handle_record_event_request(
    State(state): State<AppState>,
    Extension(project): Extension<AuthenticatedProject>,
    ApiJson(record): ApiJson<EventRecord>,
) -> Result<impl IntoResponse, ApiError> {
    let handler = RecordEventHandler::new(state.events.clone());
    let event = handler
        .handle(RecordEvent {
            project_id: project.project_id,
            record,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Event recorded successfully",
            "event_id": event.id,
        })),
    ))
}

/// Any storage-side failure, including an unknown device, fails the whole
/// batch with 500 and leaves nothing behind.
pub async fn handle_record_event_batch_request(
    State(state): State<AppState>,
    Extension(project): Extension<AuthenticatedProject>,
    ApiJson(payload): ApiJson<RecordEventBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handler = RecordEventBatchHandler::new(state.events.clone());
    let count = handler
        .handle(RecordEventBatch {
            project_id: project.project_id,
            records: payload.events,
        })
        .await
        .map_err(|e| match e {
            CoreError::Validation(message) => ApiError::BadRequest(message),
            other => {
                error!("Batch for project {} rolled back: {}", project.project_id, other);
                ApiError::Internal("Failed to record events".into())
            }
        })?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Events recorded successfully",
            "count": count,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kogase_core::{
        DeviceRepository,
        adapters::InMemoryStore,
        domain::device::{Device, RegisterDevice},
    };
    use uuid::Uuid;

    fn record(identifier: &str, name: &str) -> EventRecord {
        EventRecord {
            identifier: identifier.into(),
            event_type: "custom".into(),
            event_name: name.into(),
            payloads: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn blank_fields_are_reported_with_their_position() {
        let handler = RecordEventBatchHandler::new(Arc::new(InMemoryStore::new()));
        let err = handler
            .handle(RecordEventBatch {
                project_id: Uuid::new_v4(),
                records: vec![record("abc", "level_up"), record("abc", " ")],
            })
            .await
            .unwrap_err();
        match err {
            CoreError::Validation(message) => assert!(message.starts_with("events[1]")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_accepted() {
        let handler = RecordEventBatchHandler::new(Arc::new(InMemoryStore::new()));
        let count = handler
            .handle(RecordEventBatch {
                project_id: Uuid::new_v4(),
                records: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn single_event_touches_its_device() {
        let store = Arc::new(InMemoryStore::new());
        let project_id = Uuid::new_v4();
        let device = Device::first_sighting(
            &RegisterDevice {
                project_id,
                identifier: "abc".into(),
                platform: "Android".into(),
                platform_version: "14".into(),
                app_version: "2.0.0".into(),
                client_ip: String::new(),
            },
            "Unknown".into(),
            Utc::now() - chrono::TimeDelta::minutes(5),
        );
        store
            .insert_with_install(&device, &Event::install(&device))
            .await
            .unwrap();

        let handler = RecordEventHandler::new(store.clone());
        let event = handler
            .handle(RecordEvent {
                project_id,
                record: record("abc", "level_up"),
            })
            .await
            .unwrap();
        assert_eq!(event.device_id, device.id);

        let touched = DeviceRepository::find_by_id(store.as_ref(), device.id)
            .await
            .unwrap()
            .unwrap();
        assert!(touched.last_seen > device.last_seen);
    }
}
