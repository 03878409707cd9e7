use crate::AppState;
use crate::application::{
    ApiError, ApiJson,
    authz::load_owned_project,
    middleware::{AuthenticatedProject, AuthenticatedUser, ClientIp},
    parse_id,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use kogase_core::{
    CommandHandler, CoreError, DeviceRepository, GeoLocator, ProjectRepository,
    domain::{
        device::{DeleteDevice, Device, DeviceInsert, DeviceResolution, RegisterDevice},
        event::Event,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Turns a client sighting into a device row, creating it together with its
/// install event on first contact.
pub struct DeviceResolver {
    devices: Arc<dyn DeviceRepository>,
    geo: Arc<dyn GeoLocator>,
}

impl DeviceResolver {
    pub fn new(devices: Arc<dyn DeviceRepository>, geo: Arc<dyn GeoLocator>) -> Self {
        Self { devices, geo }
    }

    async fn refresh(&self, mut device: Device, report: &RegisterDevice) -> Result<Device, CoreError> {
        if device.observe(report, Utc::now()) {
            let country = self.geo.country_of(&report.client_ip).await;
            device.relocate(country);
        }
        self.devices.update(&device).await?;
        Ok(device)
    }
}

impl CommandHandler<RegisterDevice> for DeviceResolver {
    type Output = DeviceResolution;

    async fn handle(&self, command: RegisterDevice) -> Result<DeviceResolution, CoreError> {
        command.validate_identity()?;
        let identifier = command.identifier.trim();

        if let Some(existing) = self
            .devices
            .find_by_identifier(command.project_id, identifier)
            .await?
        {
            let device = self.refresh(existing, &command).await?;
            return Ok(DeviceResolution {
                device,
                created: false,
            });
        }

        command.validate_for_create()?;
        let country = self.geo.country_of(&command.client_ip).await;
        let device = Device::first_sighting(&command, country, Utc::now());
        let install = Event::install(&device);

        match self.devices.insert_with_install(&device, &install).await? {
            DeviceInsert::Created => {
                info!(
                    "Registered device {} for project {} ({})",
                    device.id, device.project_id, device.country
                );
                Ok(DeviceResolution {
                    device,
                    created: true,
                })
            }
            DeviceInsert::Existing(existing) => {
                debug!(
                    "Device '{}' was created concurrently; treating as a repeat sighting",
                    existing.identifier
                );
                let device = self.refresh(existing, &command).await?;
                Ok(DeviceResolution {
                    device,
                    created: false,
                })
            }
        }
    }
}

pub struct DeleteDeviceHandler {
    devices: Arc<dyn DeviceRepository>,
    projects: Arc<dyn ProjectRepository>,
}

impl DeleteDeviceHandler {
    pub fn new(devices: Arc<dyn DeviceRepository>, projects: Arc<dyn ProjectRepository>) -> Self {
        Self { devices, projects }
    }
}

impl CommandHandler<DeleteDevice> for DeleteDeviceHandler {
    type Output = ();

    async fn handle(&self, command: DeleteDevice) -> Result<(), CoreError> {
        let device = self
            .devices
            .find_by_id(command.device_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Device".into()))?;
        load_owned_project(self.projects.as_ref(), device.project_id, command.actor_id).await?;

        if !self.devices.soft_delete(device.id).await? {
            return Err(CoreError::NotFound("Device".into()));
        }
        info!("Deleted device {}", device.id);
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct RegisterDeviceRequest {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub app_version: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RegisterDeviceResponse {
    pub device_id: Uuid,
    pub created: bool,
    #[serde(flatten)]
    pub device: Device,
}

pub async fn handle_register_device_request(
    State(state): State<AppState>,
    Extension(project): Extension<AuthenticatedProject>,
    ClientIp(client_ip): ClientIp,
    ApiJson(payload): ApiJson<RegisterDeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolver = DeviceResolver::new(state.devices.clone(), state.geo.clone());
    let resolution = resolver
        .handle(RegisterDevice {
            project_id: project.project_id,
            identifier: payload.identifier,
            platform: payload.platform,
            platform_version: payload.platform_version,
            app_version: payload.app_version,
            client_ip,
        })
        .await?;

    let status = if resolution.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RegisterDeviceResponse {
            device_id: resolution.device.id,
            created: resolution.created,
            device: resolution.device,
        }),
    ))
}

pub async fn handle_delete_device_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let device_id = parse_id(&device_id, "device")?;
    let handler = DeleteDeviceHandler::new(state.devices.clone(), state.projects.clone());
    handler
        .handle(DeleteDevice {
            actor_id: ctx.user_id,
            device_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
