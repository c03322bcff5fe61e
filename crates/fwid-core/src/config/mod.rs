//! Configuration management for the identity agent

mod agent;
pub mod serde_utils;

pub use agent::{AgentConfig, TndConfig, TndServer};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fwid-agent")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("fwid-agent/config.toml"));
    }

    #[test]
    fn test_load_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<AgentConfig>(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AgentConfig {
            service_url: "https://fw.example.com".to_string(),
            realm: "EXAMPLE.COM".to_string(),
            ..AgentConfig::default()
        };
        config.keep_alive = Duration::from_secs(42 * 60);
        config.tnd.https_servers.push(TndServer {
            url: "https://tnd.example.com".to_string(),
            hash: "abcd".to_string(),
        });

        save_config(&path, &config).unwrap();
        let loaded: AgentConfig = load_config(&path).unwrap();

        assert_eq!(loaded, config);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("keep_alive = 42"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "service_url = [").unwrap();
        assert!(matches!(
            load_config::<AgentConfig>(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
