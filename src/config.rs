//! Engine configuration using Figment.
//!
//! Configuration is loaded from a TOML file, then from environment variables with
//! the `TETHER_` prefix. Nested keys are separated by a double underscore:
//!
//! ```text
//! TETHER_RETRY__MAX_ATTEMPTS=3
//! TETHER_DISPATCH__COMMAND_TIMEOUT_MS=10000
//! TETHER_LIVE_VIEW__FPS=15
//! ```
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration.
//!
//! ```no_run
//! use eos_tether::config::EngineConfig;
//!
//! let config = EngineConfig::load("tether.toml")?;
//! println!("retry bound: {}", config.retry.max_attempts);
//! # Ok::<(), eos_tether::config::ConfigError>(())
//! ```

use crate::command::OperationKind;
use crate::error_recovery::{Backoff, RetryOn, RetryPolicies, RetryPolicy};
use crate::hardware::Capacity;
use crate::live_view::{frame_interval_for, MAX_FRAME_INTERVAL, MIN_FRAME_INTERVAL};
use crate::session::SessionSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File unreadable, malformed, or of the wrong shape
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Well-formed but out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// `[retry]`
    #[serde(default)]
    pub retry: RetryConfig,
    /// `[dispatch]`
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// `[session]`
    #[serde(default)]
    pub session: SessionConfig,
    /// `[live_view]`
    #[serde(default)]
    pub live_view: LiveViewConfig,
    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Shape of the delay between busy retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Always `backoff_ms`
    #[default]
    Fixed,
    /// `backoff_ms` doubling per attempt, capped at `max_backoff_ms`
    Exponential,
}

/// Busy-retry settings applied to every command kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per command, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first busy response, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Fixed or exponential delays
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Upper bound for exponential backoff, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-operation overrides keyed by operation name (`open_session`, `drive_lens`, ...)
    #[serde(default)]
    pub overrides: BTreeMap<String, RetryOverride>,
}

/// Fields left out inherit from the base retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RetryOverride {
    /// Total attempts, at least 1
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// First retry delay, in milliseconds
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    /// Which failures to retry. `drive_lens` may not use `busy`.
    #[serde(default)]
    pub retry_on: Option<RetryOn>,
}

/// Command queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long a caller waits for its command, retries included
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Idle interval between native event pumps
    #[serde(default = "default_event_pump_interval_ms")]
    pub event_pump_interval_ms: u64,
    /// Jobs that may wait in the queue before submitters block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Settings applied when a session opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Free clusters reported to the camera
    #[serde(default = "default_free_clusters")]
    pub free_clusters: i32,
    /// Cluster size reported to the camera
    #[serde(default = "default_bytes_per_sector")]
    pub bytes_per_sector: i32,
    /// Route captures to the host so transfer requests are raised
    #[serde(default = "default_true")]
    pub save_to_host: bool,
}

/// Live-view pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveViewConfig {
    /// Frame rate for frame pumps; non-positive values mean 1 fps. Positive rates
    /// must fall between one frame per hour and 1000 fps.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Pause after a failed frame download, in milliseconds
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

/// Tracing output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_event_pump_interval_ms() -> u64 {
    50
}

fn default_queue_capacity() -> usize {
    64
}

fn default_free_clusters() -> i32 {
    0x7FFF_FFFF
}

fn default_bytes_per_sector() -> i32 {
    0x1000
}

fn default_true() -> bool {
    true
}

fn default_fps() -> f64 {
    10.0
}

fn default_error_backoff_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff: BackoffKind::default(),
            max_backoff_ms: default_max_backoff_ms(),
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            event_pump_interval_ms: default_event_pump_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            free_clusters: default_free_clusters(),
            bytes_per_sector: default_bytes_per_sector(),
            save_to_host: default_true(),
        }
    }
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl EngineConfig {
    /// Load from `path` (missing file is fine) and `TETHER_` environment variables,
    /// then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(EngineConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("TETHER_").split("__")),
        )
    }

    /// Extract and validate from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(ConfigError::LoadError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and names that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid logging level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.backoff == BackoffKind::Exponential
            && self.retry.max_backoff_ms < self.retry.backoff_ms
        {
            return Err(ConfigError::ValidationError(format!(
                "retry.max_backoff_ms ({}) is below retry.backoff_ms ({})",
                self.retry.max_backoff_ms, self.retry.backoff_ms
            )));
        }

        for (name, retry) in &self.retry.overrides {
            if OperationKind::from_name(name).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown operation '{}' in retry overrides",
                    name
                )));
            }
            if retry.max_attempts == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "retry.overrides.{}.max_attempts must be at least 1",
                    name
                )));
            }
            // A busy reply from the camera itself may follow a lens step that already ran.
            if OperationKind::from_name(name) == Some(OperationKind::DriveLens)
                && retry.retry_on == Some(RetryOn::Busy)
            {
                return Err(ConfigError::ValidationError(
                    "retry.overrides.drive_lens.retry_on must be 'never' or 'busy_not_accepted'"
                        .to_string(),
                ));
            }
        }

        if self.dispatch.command_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.command_timeout_ms must be positive".to_string(),
            ));
        }
        if self.dispatch.event_pump_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.event_pump_interval_ms must be positive".to_string(),
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.queue_capacity must be positive".to_string(),
            ));
        }

        let fps = self.live_view.fps;
        let max_fps = 1e9 / MIN_FRAME_INTERVAL.as_nanos() as f64;
        let min_fps = 1.0 / MAX_FRAME_INTERVAL.as_secs_f64();
        if !fps.is_finite() || (fps > 0.0 && !(min_fps..=max_fps).contains(&fps)) {
            return Err(ConfigError::ValidationError(format!(
                "live_view.fps ({}) must be at most {} and at least one frame per hour",
                fps, max_fps
            )));
        }

        Ok(())
    }

    fn base_backoff(&self, delay_ms: u64) -> Backoff {
        let delay = Duration::from_millis(delay_ms);
        match self.retry.backoff {
            BackoffKind::Fixed => Backoff::fixed(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: delay,
                max: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }

    /// Per-kind retry policies described by the `retry` section.
    pub fn retry_policies(&self) -> RetryPolicies {
        let base = RetryPolicy::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_backoff(self.base_backoff(self.retry.backoff_ms));

        let mut policies = RetryPolicies::new().with_base(base);
        for (name, retry) in &self.retry.overrides {
            let Some(kind) = OperationKind::from_name(name) else {
                continue;
            };
            let inherited = policies.for_kind(kind);
            let policy = RetryPolicy {
                max_attempts: retry.max_attempts.unwrap_or(inherited.max_attempts).max(1),
                backoff: retry
                    .backoff_ms
                    .map_or(inherited.backoff, |ms| self.base_backoff(ms)),
                retry_on: retry.retry_on.unwrap_or(inherited.retry_on),
            };
            policies = policies.with_override(kind, policy);
        }
        policies
    }

    /// Settings the session manager applies on connect.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            capacity: Capacity {
                free_clusters: self.session.free_clusters,
                bytes_per_sector: self.session.bytes_per_sector,
                reset: true,
            },
            save_to_host: self.session.save_to_host,
        }
    }

    /// `dispatch.command_timeout_ms` as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.command_timeout_ms)
    }

    /// `dispatch.event_pump_interval_ms` as a duration
    pub fn event_pump_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch.event_pump_interval_ms)
    }

    /// Frame pump pacing for `live_view.fps`
    pub fn frame_interval(&self) -> Duration {
        frame_interval_for(self.live_view.fps)
    }

    /// `live_view.error_backoff_ms` as a duration
    pub fn live_view_error_backoff(&self) -> Duration {
        Duration::from_millis(self.live_view.error_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_settings(), SessionSettings::default());
        assert_eq!(config.frame_interval(), frame_interval_for(10.0));
    }

    #[test]
    fn test_overrides_keep_unset_fields() {
        let mut config = EngineConfig::default();
        config.retry.backoff_ms = 20;
        config.retry.overrides.insert(
            "drive_lens".to_string(),
            RetryOverride {
                max_attempts: Some(2),
                ..Default::default()
            },
        );

        let policies = config.retry_policies();
        let lens = policies.for_kind(OperationKind::DriveLens);
        assert_eq!(lens.max_attempts, 2);
        assert_eq!(lens.retry_on, RetryOn::BusyNotAccepted);
        assert_eq!(lens.delay_after(1), Duration::from_millis(20));

        let open = policies.for_kind(OperationKind::OpenSession);
        assert_eq!(open.max_attempts, 5);
    }

    #[test]
    fn test_unknown_override_rejected() {
        let mut config = EngineConfig::default();
        config
            .retry
            .overrides
            .insert("warp_drive".to_string(), RetryOverride::default());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_drive_lens_cannot_drop_not_accepted_retries() {
        let mut config = EngineConfig::default();
        config.retry.overrides.insert(
            "drive_lens".to_string(),
            RetryOverride {
                retry_on: Some(RetryOn::Busy),
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("drive_lens"));

        // The same setting is fine for other operations.
        config.retry.overrides.clear();
        config.retry.overrides.insert(
            "take_picture".to_string(),
            RetryOverride {
                retry_on: Some(RetryOn::Busy),
                ..Default::default()
            },
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_frame_rate_bounds() {
        let mut config = EngineConfig::default();
        for fps in [0.0, -3.0, 1000.0, 1.0 / 3600.0, 30.0] {
            config.live_view.fps = fps;
            assert!(config.validate().is_ok(), "fps {} rejected", fps);
        }
        for fps in [f64::NAN, f64::INFINITY, 1e12, 1e-30] {
            config.live_view.fps = fps;
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "fps {} accepted",
                fps
            );
        }
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = EngineConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
