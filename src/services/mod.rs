//! Services module

mod admin_service;
mod backup_service;
mod collection_service;
mod crud_service;
mod file_service;
mod health_service;
mod log_service;
mod realtime_service;
mod record_service;
mod settings_service;

pub use admin_service::AdminService;
pub use backup_service::BackupService;
pub use collection_service::CollectionService;
pub use crud_service::CrudService;
pub use file_service::FileService;
pub use health_service::HealthService;
pub use log_service::LogService;
pub use realtime_service::{ListenerFunc, RealtimeMessage, RealtimeService, Subscription};
pub use record_service::{OAuth2AuthConfig, RecordService, UrlCallbackFunc};
pub use settings_service::{Settings, SettingsService};
