//! Operator Configuration
//!
//! Loaded from a YAML file mounted into the operator pod. Every section is
//! optional; a missing file or section falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that overrides `watchNamespace` from the file
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// Main operator configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Restrict the operator to a single namespace. Unset watches all namespaces.
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Requeue delays handed back to the controller runtime
    #[serde(default)]
    pub requeue: RequeueConfig,

    /// Status reporting on `BenthosPipeline` objects
    #[serde(default)]
    pub status: StatusConfig,

    /// Health endpoint listener
    #[serde(default)]
    pub server: ServerConfig,
}

/// Requeue configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequeueConfig {
    /// Delay before re-checking a pipeline whose Deployment was just created.
    /// Gives the config volume time to reach the node before pods mount it.
    #[serde(default = "default_deployment_created_seconds")]
    pub deployment_created_seconds: u64,

    /// Delay before retrying a pass that returned an error
    #[serde(default = "default_error_seconds")]
    pub error_seconds: u64,
}

/// Status configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_deployment_created_seconds() -> u64 {
    10
}

fn default_error_seconds() -> u64 {
    15
}

fn default_status_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for RequeueConfig {
    fn default() -> Self {
        RequeueConfig {
            deployment_created_seconds: default_deployment_created_seconds(),
            error_seconds: default_error_seconds(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        StatusConfig {
            enabled: default_status_enabled(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind_address(),
        }
    }
}

impl RequeueConfig {
    #[must_use]
    pub fn deployment_created_delay(&self) -> Duration {
        Duration::from_secs(self.deployment_created_seconds)
    }

    #[must_use]
    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_seconds)
    }
}

impl ControllerConfig {
    /// Validate that configuration values are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.requeue.deployment_created_seconds == 0 {
            return Err(anyhow::anyhow!(
                "requeue.deploymentCreatedSeconds must be greater than zero"
            ));
        }

        if self.requeue.error_seconds == 0 {
            return Err(anyhow::anyhow!(
                "requeue.errorSeconds must be greater than zero"
            ));
        }

        if let Some(namespace) = &self.watch_namespace {
            if namespace.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "watchNamespace must not be blank; omit it to watch all namespaces"
                ));
            }
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "server.bindAddress '{}' is not a valid socket address",
                self.server.bind_address
            ));
        }

        Ok(())
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(namespace) = std::env::var(WATCH_NAMESPACE_ENV) {
            let namespace = namespace.trim();
            self.watch_namespace = if namespace.is_empty() {
                None
            } else {
                Some(namespace.to_string())
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ControllerConfig::from_yaml("{}").unwrap();

        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.requeue.deployment_created_delay(), Duration::from_secs(10));
        assert_eq!(config.requeue.error_delay(), Duration::from_secs(15));
        assert!(config.status.enabled);
        assert!(config.watch_namespace.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn parses_camel_case_sections() {
        let config = ControllerConfig::from_yaml(
            r"
watchNamespace: streams
requeue:
  deploymentCreatedSeconds: 30
status:
  enabled: false
server:
  bindAddress: 127.0.0.1:9090
",
        )
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("streams"));
        assert_eq!(config.requeue.deployment_created_seconds, 30);
        assert_eq!(config.requeue.error_seconds, 15);
        assert!(!config.status.enabled);
        assert_eq!(config.server.bind_address, "127.0.0.1:9090");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_delays() {
        let mut config = ControllerConfig::default();
        config.requeue.deployment_created_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.requeue.error_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_blank_namespace_and_bad_address() {
        let mut config = ControllerConfig::default();
        config.watch_namespace = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.server.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ControllerConfig::from_mounted_file("/nonexistent/config.yaml").is_err());
    }

    #[test]
    #[serial]
    fn env_override_replaces_namespace() {
        let mut config = ControllerConfig {
            watch_namespace: Some("from-file".to_string()),
            ..Default::default()
        };

        std::env::set_var(WATCH_NAMESPACE_ENV, "from-env");
        config.apply_env_overrides();
        assert_eq!(config.watch_namespace.as_deref(), Some("from-env"));

        std::env::set_var(WATCH_NAMESPACE_ENV, "");
        config.apply_env_overrides();
        assert!(config.watch_namespace.is_none());

        std::env::remove_var(WATCH_NAMESPACE_ENV);
    }

    #[test]
    #[serial]
    fn env_override_is_noop_when_unset() {
        std::env::remove_var(WATCH_NAMESPACE_ENV);
        let mut config = ControllerConfig {
            watch_namespace: Some("from-file".to_string()),
            ..Default::default()
        };

        config.apply_env_overrides();
        assert_eq!(config.watch_namespace.as_deref(), Some("from-file"));
    }
}
