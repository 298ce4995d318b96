pub mod config;
pub mod error;
pub mod registry;
pub mod shortcut;

pub use config::{default_config_path, DriverKind, RclConfig, ServerConfig};
pub use error::CoreError;
pub use registry::{Registry, ReleaseOutcome};
pub use shortcut::{ConnectionId, ShortcutTable};
