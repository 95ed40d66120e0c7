use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths;
use crate::sigil::DEFAULT_MAX_DEPTH;

/// Root configuration structure for datacenter.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatacenterConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via datacenter.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub ssh: SshDefaults,

    #[serde(default)]
    pub interpolation: InterpolationDefaults,

    #[serde(default)]
    pub application: ApplicationDefaults,

    #[serde(default)]
    pub database: DatabaseDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDefaults {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Deadline for a whole remote exec, connect included.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_strict_host_key_checking")]
    pub strict_host_key_checking: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolationDefaults {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDefaults {
    #[serde(default = "default_status_pattern")]
    pub status_pattern: String,

    /// Parent directory for application installs. Falls back to the host base path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDefaults {
    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl SshDefaults {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

impl DatabaseDefaults {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            strict_host_key_checking: default_strict_host_key_checking(),
        }
    }
}

impl Default for InterpolationDefaults {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl Default for ApplicationDefaults {
    fn default() -> Self {
        Self {
            status_pattern: default_status_pattern(),
            base_dir: None,
        }
    }
}

impl Default for DatabaseDefaults {
    fn default() -> Self {
        Self {
            port: default_db_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_strict_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_status_pattern() -> String {
    "active (running)".to_string()
}

fn default_db_port() -> u16 {
    5432
}

/// Load datacenter.json under `root`. A missing file yields built-in defaults.
pub fn load_config(root: &Path) -> Result<DatacenterConfig> {
    let path = paths::settings(root);
    if !path.exists() {
        return Ok(DatacenterConfig::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.defaults.ssh.connect_timeout_secs, 10);
        assert_eq!(config.defaults.interpolation.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.defaults.application.status_pattern, "active (running)");
        assert_eq!(config.defaults.database.port, 5432);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            paths::settings(dir.path()),
            r#"{"defaults": {"interpolation": {"maxDepth": 3}, "ssh": {"commandTimeoutSecs": 30}}}"#,
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.defaults.interpolation.max_depth, 3);
        assert_eq!(config.defaults.ssh.command_timeout_secs, 30);
        assert_eq!(config.defaults.ssh.connect_timeout_secs, 10);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let dir = tempdir().unwrap();
        std::fs::write(paths::settings(dir.path()), "{not json").unwrap();

        let err = load_config(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
    }
}
