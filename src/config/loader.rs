//! Configuration loader

use std::path::Path;

use super::Config;
use crate::error::{RconError, Result};

/// Load configuration from a YAML file
///
/// Also applies RCON_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: Config = serde_yaml::from_str(&contents)?;
    apply_env_overrides(&mut config);
    config.validate().map_err(RconError::Config)?;
    Ok(config)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies RCON_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    apply_env_overrides(&mut config);
    config.validate().map_err(RconError::Config)?;
    Ok(config)
}

/// Apply RCON_* environment variable overrides to a config.
///
/// Any set env var overrides the corresponding config value:
/// - `RCON_HOST` - Override listen host
/// - `RCON_PORT` - Override listen port
/// - `RCON_MAX_CONNECTIONS` - Override concurrent connection cap
/// - `RCON_MAX_FRAME_SIZE` - Override frame limit
/// - `RCON_READ_TIMEOUT_MS` - Override read/idle timeout
/// - `RCON_ACCEPT_TIMEOUT_MS` - Override acceptor wakeup interval
/// - `RCON_CREDENTIAL` - Override stored credential record
/// - `RCON_LOG_LEVEL` - Override log level
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("RCON_HOST") {
        debug!("Overriding host from RCON_HOST");
        config.server.host = val;
    }
    if let Ok(val) = std::env::var("RCON_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding port from RCON_PORT");
            config.server.port = port;
        }
    }
    if let Ok(val) = std::env::var("RCON_MAX_CONNECTIONS") {
        if let Ok(max) = val.parse::<usize>() {
            debug!("Overriding max_connections from RCON_MAX_CONNECTIONS");
            config.server.max_connections = max;
        }
    }
    if let Ok(val) = std::env::var("RCON_MAX_FRAME_SIZE") {
        if let Ok(size) = val.parse::<usize>() {
            debug!("Overriding max_frame_size from RCON_MAX_FRAME_SIZE");
            config.server.max_frame_size = size;
        }
    }
    if let Ok(val) = std::env::var("RCON_READ_TIMEOUT_MS") {
        if let Ok(ms) = val.parse::<u64>() {
            debug!("Overriding read_timeout_ms from RCON_READ_TIMEOUT_MS");
            config.server.read_timeout_ms = ms;
        }
    }
    if let Ok(val) = std::env::var("RCON_ACCEPT_TIMEOUT_MS") {
        if let Ok(ms) = val.parse::<u64>() {
            debug!("Overriding accept_timeout_ms from RCON_ACCEPT_TIMEOUT_MS");
            config.server.accept_timeout_ms = ms;
        }
    }
    if let Ok(val) = std::env::var("RCON_CREDENTIAL") {
        debug!("Overriding credential from RCON_CREDENTIAL");
        config.credential = Some(val);
    }
    if let Ok(val) = std::env::var("RCON_LOG_LEVEL") {
        debug!("Overriding log level from RCON_LOG_LEVEL");
        config.logging.level = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordRecord;
    use std::sync::Mutex;

    // load_* reads process env; serialize the tests that touch it.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn load_minimal_config() {
        let _guard = ENV_GUARD.lock().unwrap();
        let yaml = r#"
server:
  port: 25580
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.server.port, 25580);
        assert_eq!(config.server.host, "127.0.0.1"); // default
        assert_eq!(config.server.max_connections, 10); // default
        assert!(config.credential.is_none());
    }

    #[test]
    fn load_full_config() {
        let _guard = ENV_GUARD.lock().unwrap();
        let record = PasswordRecord::generate("hunter2").encode();
        let yaml = format!(
            r#"
server:
  host: "0.0.0.0"
  port: 25570
  max_connections: 4
  max_frame_size: 8192
  read_timeout_ms: 10000
  accept_timeout_ms: 1000

credential: "{record}"

logging:
  level: debug
"#
        );
        let config = load_config_from_str(&yaml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_connections, 4);
        assert_eq!(config.server.max_frame_size, 8192);
        assert_eq!(config.logging.level, "debug");
        assert!(config.credential_record().unwrap().verify("hunter2"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        let config = load_config_from_str("server: {}").unwrap();
        assert_eq!(config.server.port, 25575);
    }

    #[test]
    fn invalid_values_rejected_at_load() {
        let _guard = ENV_GUARD.lock().unwrap();
        let yaml = r#"
server:
  read_timeout_ms: 0
"#;
        assert!(load_config_from_str(yaml).is_err());

        let yaml = r#"
credential: "missing-the-separator"
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var("RCON_PORT", "26000");
        std::env::set_var("RCON_MAX_CONNECTIONS", "3");

        let config = load_config_from_str("server: {}").unwrap();
        assert_eq!(config.server.port, 26000);
        assert_eq!(config.server.max_connections, 3);

        std::env::remove_var("RCON_PORT");
        std::env::remove_var("RCON_MAX_CONNECTIONS");
    }
}
