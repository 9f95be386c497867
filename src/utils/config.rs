use crate::core::constants::{
    DEFAULT_ALIGNMENT_ROOT_NAME, DEFAULT_ANCHOR_REQUEST_INTERVAL_MS, DEFAULT_READY_TIMEOUT_MS,
    DEFAULT_REFERENCE_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Session configuration, validated when a session is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the physical reference to align against; empty accepts any
    pub image_target_name: String,
    /// Scene node that receives the alignment frame
    pub alignment_root_name: String,
    /// Gate gameplay on every participant reporting alignment
    pub wait_for_all_clients: bool,
    /// Publish the anchor automatically when this device holds authority
    pub publish_if_authority: bool,
    /// Start waiting for the reference as soon as the session is created
    pub auto_acquire_on_start: bool,
    /// How long to wait for the first detection (milliseconds)
    pub reference_timeout_ms: u64,
    /// How long to wait for everyone to be ready; `None` waits forever
    pub everyone_ready_timeout_ms: Option<u64>,
    /// Interval between anchor requests while no anchor is known (milliseconds)
    pub anchor_request_interval_ms: u64,
    /// Re-run the content sweep whenever the alignment frame changes
    pub reapply_on_alignment_updates: bool,
    /// Keep bound content at its world pose when re-parenting it
    pub keep_world_position: bool,
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image_target_name: String::new(),
            alignment_root_name: DEFAULT_ALIGNMENT_ROOT_NAME.to_string(),
            wait_for_all_clients: true,
            publish_if_authority: true,
            auto_acquire_on_start: true,
            reference_timeout_ms: DEFAULT_REFERENCE_TIMEOUT_MS,
            everyone_ready_timeout_ms: Some(DEFAULT_READY_TIMEOUT_MS),
            anchor_request_interval_ms: DEFAULT_ANCHOR_REQUEST_INTERVAL_MS,
            reapply_on_alignment_updates: true,
            keep_world_position: true,
            debug_logging: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Invalid parameter value
    #[error("invalid parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    /// Configuration file I/O error
    #[error("I/O error: {message}")]
    IoError { message: String },
    /// JSON serialization/deserialization error
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Outcome of validating a configuration
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigError>,
    /// Accepted, but probably not what was meant
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl SessionConfig {
    /// Check every parameter and collect errors and warnings
    pub fn check(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.alignment_root_name.trim().is_empty() {
            report.errors.push(ConfigError::InvalidParameter {
                parameter: "alignment_root_name".to_string(),
                value: self.alignment_root_name.clone(),
                reason: "Alignment root needs a name".to_string(),
            });
        }

        if self.reference_timeout_ms == 0 {
            report.errors.push(ConfigError::InvalidParameter {
                parameter: "reference_timeout_ms".to_string(),
                value: self.reference_timeout_ms.to_string(),
                reason: "Reference timeout must be positive".to_string(),
            });
        } else if self.reference_timeout_ms > 120_000 {
            report
                .warnings
                .push("Very long reference timeout delays the un-aligned fallback".to_string());
        }

        match self.everyone_ready_timeout_ms {
            Some(0) => report.errors.push(ConfigError::InvalidParameter {
                parameter: "everyone_ready_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "Use no timeout instead of a zero timeout".to_string(),
            }),
            None if self.wait_for_all_clients => report
                .warnings
                .push("Without a ready timeout gameplay may wait forever".to_string()),
            _ => {}
        }

        if self.anchor_request_interval_ms < 100 {
            report.errors.push(ConfigError::InvalidParameter {
                parameter: "anchor_request_interval_ms".to_string(),
                value: self.anchor_request_interval_ms.to_string(),
                reason: "Anchor request interval too short, would flood the session".to_string(),
            });
        }

        if !self.wait_for_all_clients && self.everyone_ready_timeout_ms.is_some() {
            report
                .warnings
                .push("Ready timeout has no effect while the barrier is disabled".to_string());
        }

        report
    }

    /// Validate, logging warnings. Fails with the first error found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let report = self.check();
        for warning in &report.warnings {
            warn!(%warning, "session configuration");
        }
        match report.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: SessionConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to serialize config: {}", e),
            })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })
    }

    pub fn with_image_target(mut self, name: &str) -> Self {
        self.image_target_name = name.to_string();
        self
    }

    pub fn with_alignment_root(mut self, name: &str) -> Self {
        self.alignment_root_name = name.to_string();
        self
    }

    pub fn with_wait_for_all_clients(mut self, wait: bool) -> Self {
        self.wait_for_all_clients = wait;
        self
    }

    pub fn with_publish_if_authority(mut self, publish: bool) -> Self {
        self.publish_if_authority = publish;
        self
    }

    pub fn with_auto_acquire(mut self, auto_acquire: bool) -> Self {
        self.auto_acquire_on_start = auto_acquire;
        self
    }

    pub fn with_reference_timeout(mut self, timeout_ms: u64) -> Self {
        self.reference_timeout_ms = timeout_ms;
        self
    }

    pub fn with_ready_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.everyone_ready_timeout_ms = timeout_ms;
        self
    }

    pub fn with_anchor_request_interval(mut self, interval_ms: u64) -> Self {
        self.anchor_request_interval_ms = interval_ms;
        self
    }

    pub fn with_keep_world_position(mut self, keep: bool) -> Self {
        self.keep_world_position = keep;
        self
    }

    pub fn with_reapply_on_alignment_updates(mut self, reapply: bool) -> Self {
        self.reapply_on_alignment_updates = reapply;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_session_config() {
        let config = SessionConfig::default();
        assert_eq!(config.alignment_root_name, "AnchorRoot");
        assert_eq!(config.reference_timeout_ms, 10_000);
        assert_eq!(config.everyone_ready_timeout_ms, Some(60_000));
        assert!(config.wait_for_all_clients);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let config = SessionConfig::default().with_reference_timeout(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "reference_timeout_ms"
        ));

        let config = SessionConfig::default().with_alignment_root("  ");
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_anchor_request_interval(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_warnings_do_not_fail_validation() {
        let config = SessionConfig::default().with_ready_timeout(None);
        let report = config.check();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "image_target_name": "ARMascot" }"#).unwrap();
        assert_eq!(config.image_target_name, "ARMascot");
        assert_eq!(config.alignment_root_name, "AnchorRoot");
    }

    #[test]
    fn test_config_file_round_trip() {
        let config = SessionConfig::default()
            .with_image_target("Poster")
            .with_wait_for_all_clients(false);

        let temp_path = PathBuf::from("test_session_config.json");
        config.save_to_file(&temp_path).unwrap();
        let loaded = SessionConfig::from_file(&temp_path).unwrap();
        let _ = fs::remove_file(&temp_path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            SessionConfig::from_file("does/not/exist.json"),
            Err(ConfigError::IoError { .. })
        ));
    }
}
