//! Link configuration: WebSocket listen address, optional bearer token,
//! and the correlation timeouts. Loaded from TOML with a home-directory
//! fallback so a front end and its daemon can share one file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Address the WebSocket server binds, e.g. "127.0.0.1:8765".
    /// Port 0 picks an ephemeral port.
    pub listen: String,
    /// Bearer token required at the WebSocket handshake. `None` disables
    /// the check (loopback deployments, tests).
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Seconds a correlated generate call waits for its response.
    pub request_timeout_secs: u64,
    /// Seconds the tool proxy waits for a tool execution response.
    pub tool_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8765".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
            tool_timeout_secs: 30,
        }
    }
}

impl LinkConfig {
    fn default_path() -> PathBuf {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_dir.join(".agentlink").join("config.toml")
    }

    /// Load configuration from file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: LinkConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(LinkConfig::default())
        }
    }

    /// Save configuration to file, creating parent directories.
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = path.unwrap_or_else(Self::default_path);

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = LinkConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.tool_timeout(), Duration::from_secs(30));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = LinkConfig::default();
        config.listen = "127.0.0.1:9001".to_string();
        config.auth_token = Some("s3cret".to_string());
        config.tool_timeout_secs = 5;
        config.save(Some(path.clone())).unwrap();

        let loaded = LinkConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.listen, "127.0.0.1:9001");
        assert_eq!(loaded.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(loaded.tool_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LinkConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loaded.listen, LinkConfig::default().listen);
    }
}
