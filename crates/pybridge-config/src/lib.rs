// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the pybridge execution engine.
//!
//! This crate provides [`BridgeConfig`] — pool sizing, deadlines, the
//! default security mode, and the script-store signing secret — together
//! with TOML file loading and semantic validation that separates hard
//! [`ConfigError`]s from advisory [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use pybridge_protocol::SecurityMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard bounds on the worker pool size.
pub const MIN_POOL_SIZE: usize = 1;
/// Upper bound on the worker pool size.
pub const MAX_POOL_SIZE: usize = 20;

/// Serde helper for `Duration` as milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize a duration as integer milliseconds.
    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        (val.as_millis() as u64).serialize(ser)
    }

    /// Deserialize integer milliseconds into a duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Errors that fail configuration loading or validation outright.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No signing secret was configured; a host-derived default will be used.
    MissingSigningSecret,
    /// A deadline is unusually large.
    LargeTimeout {
        /// Which deadline field.
        field: &'static str,
        /// Its value in seconds.
        secs: u64,
    },
    /// The health sweep is disabled or very slow.
    SlowHealthSweep {
        /// Sweep period in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingSigningSecret => f.write_str(
                "no signing secret configured; scripts will be signed with a host-derived key",
            ),
            ConfigWarning::LargeTimeout { field, secs } => {
                write!(f, "'{field}' is unusually large ({secs}s)")
            }
            ConfigWarning::SlowHealthSweep { secs } => {
                write!(f, "health sweep period is {secs}s; unhealthy workers will linger")
            }
        }
    }
}

/// Runtime configuration for the bridge: pool sizing, deadlines, security,
/// and persistence locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Number of warm workers the pool maintains (1–20).
    pub pool_size: usize,

    /// Per-request reply deadline.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    /// How long a caller waits for a free worker.
    #[serde(with = "duration_millis")]
    pub borrow_timeout: Duration,

    /// How long a freshly spawned worker may take to report ready.
    #[serde(with = "duration_millis")]
    pub ready_timeout: Duration,

    /// Grace window for a worker to exit after a shutdown request.
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,

    /// Interval between health sweeps over the pool roster.
    #[serde(with = "duration_millis")]
    pub health_sweep_period: Duration,

    /// Security mode applied when a caller does not specify one.
    pub default_security_mode: SecurityMode,

    /// Secret for script signing. Required for production; when unset a
    /// host-derived key is used and loudly warned about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    /// Python interpreter to spawn workers with.
    pub python_path: String,

    /// Directory holding the script repository index.
    pub scripts_dir: PathBuf,

    /// Override for where the worker shim is materialized. Defaults to a
    /// versioned directory under the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shim_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            request_timeout: Duration::from_millis(30_000),
            borrow_timeout: Duration::from_millis(30_000),
            ready_timeout: Duration::from_millis(5_000),
            shutdown_grace: Duration::from_millis(5_000),
            health_sweep_period: Duration::from_millis(30_000),
            default_security_mode: SecurityMode::Admin,
            signing_secret: None,
            python_path: "python3".into(),
            scripts_dir: PathBuf::from("scripts"),
            shim_dir: None,
        }
    }
}

impl BridgeConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileNotFound`] when the path does not exist,
    /// [`ConfigError::ParseError`] on malformed TOML,
    /// [`ConfigError::ValidationError`] when values are out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check hard constraints; returns all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&self.pool_size) {
            reasons.push(format!(
                "pool_size must be between {MIN_POOL_SIZE} and {MAX_POOL_SIZE}, got {}",
                self.pool_size
            ));
        }
        if self.request_timeout.is_zero() {
            reasons.push("request_timeout must be greater than zero".into());
        }
        if self.ready_timeout.is_zero() {
            reasons.push("ready_timeout must be greater than zero".into());
        }
        if self.python_path.trim().is_empty() {
            reasons.push("python_path must not be empty".into());
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Collect advisory warnings for this configuration.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        if self.signing_secret.as_deref().is_none_or(str::is_empty) {
            out.push(ConfigWarning::MissingSigningSecret);
        }
        if self.request_timeout > Duration::from_secs(300) {
            out.push(ConfigWarning::LargeTimeout {
                field: "request_timeout",
                secs: self.request_timeout.as_secs(),
            });
        }
        if self.borrow_timeout > Duration::from_secs(300) {
            out.push(ConfigWarning::LargeTimeout {
                field: "borrow_timeout",
                secs: self.borrow_timeout.as_secs(),
            });
        }
        if self.health_sweep_period > Duration::from_secs(600) {
            out.push(ConfigWarning::SlowHealthSweep {
                secs: self.health_sweep_period.as_secs(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.request_timeout, Duration::from_millis(30_000));
        assert_eq!(cfg.borrow_timeout, Duration::from_millis(30_000));
        assert_eq!(cfg.ready_timeout, Duration::from_millis(5_000));
        assert_eq!(cfg.shutdown_grace, Duration::from_millis(5_000));
        assert_eq!(cfg.health_sweep_period, Duration::from_millis(30_000));
        assert_eq!(cfg.default_security_mode, SecurityMode::Admin);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pool_size_out_of_range_is_rejected() {
        let mut cfg = BridgeConfig::default();
        cfg.pool_size = 0;
        assert!(cfg.validate().is_err());
        cfg.pool_size = 21;
        assert!(cfg.validate().is_err());
        cfg.pool_size = 20;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn durations_serialize_as_millis() {
        let cfg = BridgeConfig {
            request_timeout: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"request_timeout\":1500"), "json: {json}");
    }

    #[test]
    fn missing_secret_warns() {
        let cfg = BridgeConfig::default();
        assert!(cfg.warnings().contains(&ConfigWarning::MissingSigningSecret));

        let cfg = BridgeConfig {
            signing_secret: Some("s3cret".into()),
            ..Default::default()
        };
        assert!(!cfg.warnings().contains(&ConfigWarning::MissingSigningSecret));
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
pool_size = 5
request_timeout = 10000
default_security_mode = "RESTRICTED"
python_path = "python3"
"#,
        )
        .unwrap();

        let cfg = BridgeConfig::load(&path).unwrap();
        assert_eq!(cfg.pool_size, 5);
        assert_eq!(cfg.request_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.default_security_mode, SecurityMode::Restricted);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.borrow_timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn load_missing_file_fails() {
        let err = BridgeConfig::load("/nonexistent/bridge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_rejects_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "pool_size = 50\n").unwrap();
        let err = BridgeConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }
}
