//! Configuration loading and validation

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use types::{Config, LoggingConfig, ServerConfig};
