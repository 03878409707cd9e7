pub mod create_project;
pub mod login;
pub mod manage_project;
pub mod record_event;
pub mod register_device;
pub mod register_user;
pub mod session;
pub mod update_user;

pub use create_project::CreateProjectHandler;
pub use login::LoginHandler;
pub use manage_project::{DeleteProjectHandler, RegenerateApiKeyHandler, UpdateProjectHandler};
pub use record_event::{RecordEventBatchHandler, RecordEventHandler};
pub use register_device::{DeleteDeviceHandler, DeviceResolver};
pub use register_user::{RegisterUserHandler, bootstrap_admin};
pub use session::{BeginSessionHandler, EndSessionHandler};
pub use update_user::{DeleteUserHandler, UpdateUserHandler};
