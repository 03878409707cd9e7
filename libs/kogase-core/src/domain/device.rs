use crate::{
    Command, CoreError,
    domain::{Page, ProjectScope, require_non_empty},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Country value used whenever geolocation cannot say anything better.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

pub const MAX_DEVICE_PAGE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub project_id: Uuid,
    pub identifier: String,
    pub platform: String,
    pub platform_version: String,
    pub app_version: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ip_address: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A device report from a client SDK.
#[derive(Debug, Clone)]
pub struct RegisterDevice {
    pub project_id: Uuid,
    pub identifier: String,
    pub platform: String,
    pub platform_version: String,
    pub app_version: String,
    pub client_ip: String,
}

#[derive(Debug, Clone)]
pub struct DeleteDevice {
    pub actor_id: Uuid,
    pub device_id: Uuid,
}

impl Command for RegisterDevice {}
impl Command for DeleteDevice {}

impl RegisterDevice {
    /// A repeat sighting only needs the identifier.
    pub fn validate_identity(&self) -> Result<(), CoreError> {
        require_non_empty("identifier", &self.identifier)
    }

    /// Creating a device needs every descriptive field.
    pub fn validate_for_create(&self) -> Result<(), CoreError> {
        require_non_empty("identifier", &self.identifier)?;
        require_non_empty("platform", &self.platform)?;
        require_non_empty("platform_version", &self.platform_version)?;
        require_non_empty("app_version", &self.app_version)
    }
}

/// Outcome of resolving a sighting into a device row.
#[derive(Debug, Clone)]
pub struct DeviceResolution {
    pub device: Device,
    pub created: bool,
}

/// Result of the conditional insert used for first sightings.
#[derive(Debug, Clone)]
pub enum DeviceInsert {
    Created,
    Existing(Device),
}

impl Device {
    pub fn first_sighting(report: &RegisterDevice, country: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: report.project_id,
            identifier: report.identifier.trim().to_string(),
            platform: report.platform.trim().to_string(),
            platform_version: report.platform_version.trim().to_string(),
            app_version: report.app_version.trim().to_string(),
            first_seen: now,
            last_seen: now,
            ip_address: report.client_ip.clone(),
            country,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a repeat sighting. Returns `true` when the client address moved
    /// and the country should be resolved again.
    pub fn observe(&mut self, report: &RegisterDevice, now: DateTime<Utc>) -> bool {
        self.last_seen = self.last_seen.max(now);
        self.updated_at = now;

        let app_version = report.app_version.trim();
        if !app_version.is_empty() {
            self.app_version = app_version.to_string();
        }
        let platform_version = report.platform_version.trim();
        if !platform_version.is_empty() {
            self.platform_version = platform_version.to_string();
        }

        if !report.client_ip.is_empty() && report.client_ip != self.ip_address {
            self.ip_address = report.client_ip.clone();
            return true;
        }
        false
    }

    /// An unknown lookup never overwrites a known country.
    pub fn relocate(&mut self, country: String) {
        if !country.is_empty() && country != UNKNOWN_COUNTRY {
            self.country = country;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub scope: ProjectScope,
    pub platform: Option<String>,
    /// Lower bound on `first_seen`.
    pub from: Option<DateTime<Utc>>,
    /// Upper bound on `last_seen`.
    pub to: Option<DateTime<Utc>>,
    pub page: Page,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePage {
    pub devices: Vec<Device>,
    pub total_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn report(ip: &str) -> RegisterDevice {
        RegisterDevice {
            project_id: Uuid::new_v4(),
            identifier: "abc".into(),
            platform: "iOS".into(),
            platform_version: "17.0".into(),
            app_version: "1.0.3".into(),
            client_ip: ip.into(),
        }
    }

    #[test]
    fn first_sighting_sets_both_seen_stamps() {
        let now = Utc::now();
        let device = Device::first_sighting(&report("203.0.113.7"), "SE".into(), now);
        assert_eq!(device.first_seen, now);
        assert_eq!(device.last_seen, now);
        assert_eq!(device.country, "SE");
    }

    #[test]
    fn observe_keeps_versions_when_blank_and_never_rewinds() {
        let now = Utc::now();
        let mut device = Device::first_sighting(&report("203.0.113.7"), "SE".into(), now);

        let mut repeat = report("203.0.113.7");
        repeat.app_version = String::new();
        repeat.platform_version = "17.1".into();
        let moved = device.observe(&repeat, now - TimeDelta::seconds(30));

        assert!(!moved);
        assert_eq!(device.app_version, "1.0.3");
        assert_eq!(device.platform_version, "17.1");
        assert_eq!(device.last_seen, now);
        assert!(device.first_seen <= device.last_seen);
    }

    #[test]
    fn address_change_requests_relocation() {
        let now = Utc::now();
        let mut device = Device::first_sighting(&report("203.0.113.7"), "SE".into(), now);
        assert!(device.observe(&report("198.51.100.1"), now + TimeDelta::seconds(1)));
        assert_eq!(device.ip_address, "198.51.100.1");

        device.relocate(UNKNOWN_COUNTRY.into());
        assert_eq!(device.country, "SE");
        device.relocate("NO".into());
        assert_eq!(device.country, "NO");
    }

    #[test]
    fn create_requires_every_field() {
        let mut cmd = report("");
        assert!(cmd.validate_for_create().is_ok());
        cmd.platform_version = " ".into();
        assert!(cmd.validate_identity().is_ok());
        assert!(matches!(cmd.validate_for_create(), Err(CoreError::Validation(_))));
    }
}
