use crate::{
    Command, CoreError,
    domain::{Page, ProjectScope, device::Device, require_non_empty},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const PREDEFINED_EVENT_TYPE: &str = "predefined";
pub const INSTALL_EVENT_NAME: &str = "install";

pub const MAX_EVENT_PAGE: i64 = 1000;

/// Opaque key to value mapping attached to an event.
pub type Payloads = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub project_id: Uuid,
    pub device_id: Uuid,
    pub event_type: String,
    pub event_name: String,
    pub payloads: Payloads,
    /// When the client says the event happened.
    pub timestamp: DateTime<Utc>,
    /// When the server accepted it.
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One event as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub identifier: String,
    pub event_type: String,
    pub event_name: String,
    #[serde(default)]
    pub payloads: Option<Payloads>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// The identifier as devices are keyed: surrounding whitespace is not significant.
    pub fn device_identifier(&self) -> &str {
        self.identifier.trim()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        require_non_empty("identifier", &self.identifier)?;
        require_non_empty("event_type", &self.event_type)?;
        require_non_empty("event_name", &self.event_name)
    }
}

impl Event {
    pub fn from_record(
        project_id: Uuid,
        device_id: Uuid,
        record: &EventRecord,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            device_id,
            event_type: record.event_type.clone(),
            event_name: record.event_name.clone(),
            payloads: record.payloads.clone().unwrap_or_default(),
            timestamp: record.timestamp.unwrap_or(received_at),
            received_at,
            created_at: received_at,
            updated_at: received_at,
        }
    }

    /// The predefined install event emitted alongside a newly created device.
    pub fn install(device: &Device) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: device.project_id,
            device_id: device.id,
            event_type: PREDEFINED_EVENT_TYPE.to_string(),
            event_name: INSTALL_EVENT_NAME.to_string(),
            payloads: Payloads::new(),
            timestamp: device.first_seen,
            received_at: device.first_seen,
            created_at: device.first_seen,
            updated_at: device.first_seen,
        }
    }

    pub fn is_install(&self) -> bool {
        self.event_type == PREDEFINED_EVENT_TYPE && self.event_name == INSTALL_EVENT_NAME
    }
}

#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub project_id: Uuid,
    pub record: EventRecord,
}

#[derive(Debug, Clone)]
pub struct RecordEventBatch {
    pub project_id: Uuid,
    pub records: Vec<EventRecord>,
}

impl Command for RecordEvent {}
impl Command for RecordEventBatch {}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub scope: ProjectScope,
    pub device_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub event_name: Option<String>,
    /// Matches the platform of the emitting device.
    pub platform: Option<String>,
    /// Bounds on `timestamp`, inclusive.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::RegisterDevice;
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn timestamp_defaults_to_receive_time() {
        let record: EventRecord = serde_json::from_value(json!({
            "identifier": "abc",
            "event_type": "progression",
            "event_name": "level_up"
        }))
        .unwrap();
        let now = Utc::now();
        let event = Event::from_record(Uuid::new_v4(), Uuid::new_v4(), &record, now);
        assert_eq!(event.timestamp, now);
        assert_eq!(event.received_at, now);
        assert!(event.payloads.is_empty());
    }

    #[test]
    fn client_timestamp_is_preserved_even_when_ahead() {
        let now = Utc::now();
        let ahead = now + TimeDelta::minutes(3);
        let record = EventRecord {
            identifier: "abc".into(),
            event_type: "economy".into(),
            event_name: "purchase".into(),
            payloads: Some(json!({"sku": "gems_100", "price": 0.99}).as_object().unwrap().clone()),
            timestamp: Some(ahead),
        };
        let event = Event::from_record(Uuid::new_v4(), Uuid::new_v4(), &record, now);
        assert_eq!(event.timestamp, ahead);
        assert_eq!(event.payloads["sku"], "gems_100");
    }

    #[test]
    fn null_payloads_are_empty() {
        let record: EventRecord = serde_json::from_value(json!({
            "identifier": "abc",
            "event_type": "t",
            "event_name": "n",
            "payloads": null
        }))
        .unwrap();
        let event = Event::from_record(Uuid::new_v4(), Uuid::new_v4(), &record, Utc::now());
        assert!(event.payloads.is_empty());
    }

    #[test]
    fn install_event_mirrors_device_creation() {
        let report = RegisterDevice {
            project_id: Uuid::new_v4(),
            identifier: "abc".into(),
            platform: "Android".into(),
            platform_version: "14".into(),
            app_version: "2.0".into(),
            client_ip: String::new(),
        };
        let device = Device::first_sighting(&report, "Unknown".into(), Utc::now());
        let install = Event::install(&device);
        assert!(install.is_install());
        assert_eq!(install.device_id, device.id);
        assert_eq!(install.project_id, device.project_id);
        assert_eq!(install.timestamp, device.first_seen);
    }

    #[test]
    fn blank_names_fail_validation() {
        let record = EventRecord {
            identifier: "abc".into(),
            event_type: "".into(),
            event_name: "n".into(),
            payloads: None,
            timestamp: None,
        };
        assert!(matches!(record.validate(), Err(CoreError::Validation(_))));
    }
}
