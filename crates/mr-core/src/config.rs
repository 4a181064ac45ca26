//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, tool, job and health sections. Every section defaults sensibly so
//! a completely empty `{}` file is valid. The `PORT` environment variable
//! overrides `server.port` (see [`Config::apply_env`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variable holding the listen port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable holding an optional config file path.
pub const CONFIG_ENV: &str = "MEDIARELAY_CONFIG";

/// Upper bound for `health.heartbeat_interval_secs` (one day).
const MAX_HEARTBEAT_SECS: u64 = 86_400;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub jobs: JobsConfig,
    pub health: HealthConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file, failing if it cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_port(std::env::var(PORT_ENV).ok().as_deref());
    }

    fn apply_port(&mut self, value: Option<&str>) {
        let Some(raw) = value else {
            return;
        };
        match raw.trim().parse::<u16>() {
            Ok(port) => self.server.port = port,
            Err(_) => tracing::warn!("Ignoring invalid {PORT_ENV} value {raw:?}"),
        }
    }

    /// Hard errors that make the configuration unusable.
    pub fn check(&self) -> Result<()> {
        if self.jobs.capacity == 0 {
            return Err(Error::Validation("jobs.capacity must be at least 1".into()));
        }
        if self.tools.transcoder.trim().is_empty() {
            return Err(Error::Validation("tools.transcoder must not be empty".into()));
        }
        if !(1..=MAX_HEARTBEAT_SECS).contains(&self.health.heartbeat_interval_secs) {
            return Err(Error::Validation(format!(
                "health.heartbeat_interval_secs must be between 1 and {MAX_HEARTBEAT_SECS}"
            )));
        }
        if self.jobs.default_timeout_secs == 0 {
            return Err(Error::Validation(
                "jobs.default_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.jobs.default_timeout_secs > self.jobs.max_timeout_secs {
            warnings.push(format!(
                "jobs.default_timeout_secs ({}) exceeds jobs.max_timeout_secs ({}); the maximum wins",
                self.jobs.default_timeout_secs, self.jobs.max_timeout_secs
            ));
        }

        if self.jobs.max_retained < self.jobs.capacity + self.jobs.max_queue {
            warnings.push(
                "jobs.max_retained is smaller than capacity + max_queue; finished jobs may be evicted before they are polled".into(),
            );
        }

        if self.jobs.unhealthy_after_spawn_failures == 0 {
            warnings.push(
                "jobs.unhealthy_after_spawn_failures is 0; spawn failures never mark the service unhealthy".into(),
            );
        }

        if let Some(ref p) = self.tools.transcoder_path {
            if !p.exists() {
                warnings.push(format!(
                    "tools.transcoder_path {} does not exist; falling back to PATH lookup",
                    p.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Exit with a non-zero status when the startup dependency check fails.
    pub exit_on_fatal: bool,
    /// How long `/health` keeps reporting the failure before that exit.
    pub fatal_exit_delay_secs: u64,
    /// How long in-flight jobs may keep running after a shutdown signal.
    pub drain_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            exit_on_fatal: true,
            fatal_exit_delay_secs: 5,
            drain_grace_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }

    pub fn fatal_exit_delay(&self) -> Duration {
        Duration::from_secs(self.fatal_exit_delay_secs)
    }
}

/// The external transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool name, used for PATH lookup and in error messages.
    pub transcoder: String,
    /// Explicit path to the executable; PATH is searched when unset.
    pub transcoder_path: Option<PathBuf>,
    /// Timeout for the `-version` self-check.
    pub self_check_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            transcoder: "ffmpeg".into(),
            transcoder_path: None,
            self_check_timeout_secs: 10,
        }
    }
}

/// Admission control and job execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Number of execution slots (concurrently running subprocesses).
    pub capacity: usize,
    /// Admitted jobs allowed to wait for a slot. 0 rejects as soon as every
    /// slot is taken.
    pub max_queue: usize,
    pub default_timeout_secs: u64,
    /// Upper bound for a per-request `timeout_secs`.
    pub max_timeout_secs: u64,
    /// Finished jobs kept for polling before the oldest are evicted.
    pub max_retained: usize,
    /// Consecutive spawn failures that mark the service unhealthy.
    pub unhealthy_after_spawn_failures: u32,
    /// Maximum number of operation arguments per request.
    pub max_args: usize,
    /// Accepted input prefixes (e.g. `https://`, `/media/`). Empty accepts any.
    pub allowed_input_prefixes: Vec<String>,
    /// Where finished artifacts are kept; a temporary directory when unset.
    pub artifact_dir: Option<PathBuf>,
    /// Parent of the per-job working directories; the system temp dir when unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            max_queue: 0,
            default_timeout_secs: 600,
            max_timeout_secs: 3600,
            max_retained: 1000,
            unhealthy_after_spawn_failures: 3,
            max_args: 256,
            allowed_input_prefixes: Vec::new(),
            artifact_dir: None,
            work_dir: None,
        }
    }
}

impl JobsConfig {
    /// Resolve the deadline for a request, clamped to `max_timeout_secs`.
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs
            .filter(|s| *s > 0)
            .unwrap_or(self.default_timeout_secs)
            .min(self.max_timeout_secs.max(1));
        Duration::from_secs(secs)
    }
}

/// Liveness heartbeat and dependency re-check cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub heartbeat_interval_secs: u64,
    /// 0 disables the periodic transcoder re-check.
    pub recheck_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            recheck_interval_secs: 30,
        }
    }
}

impl HealthConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.server.exit_on_fatal);
        assert_eq!(cfg.tools.transcoder, "ffmpeg");
        assert_eq!(cfg.jobs.capacity, 2);
        assert_eq!(cfg.jobs.max_queue, 0);
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"server": {"port": 9090}, "jobs": {"capacity": 4, "max_queue": 8}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.jobs.capacity, 4);
        assert_eq!(cfg.jobs.max_queue, 8);
        assert_eq!(cfg.jobs.default_timeout_secs, 600);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.health.heartbeat_interval_secs, 5);
    }

    #[test]
    fn malformed_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/config.json")));
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn port_override() {
        let mut cfg = Config::default();
        cfg.apply_port(Some("3000"));
        assert_eq!(cfg.server.port, 3000);

        cfg.apply_port(Some("not-a-port"));
        assert_eq!(cfg.server.port, 3000);

        cfg.apply_port(None);
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut cfg = Config::default();
        cfg.jobs.capacity = 0;
        assert!(cfg.check().is_err());
    }

    #[test]
    fn heartbeat_interval_is_bounded() {
        let mut cfg = Config::default();
        cfg.health.heartbeat_interval_secs = 0;
        assert!(cfg.check().is_err());
        cfg.health.heartbeat_interval_secs = u64::MAX;
        assert!(cfg.check().is_err());
        cfg.health.heartbeat_interval_secs = MAX_HEARTBEAT_SECS;
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn timeout_is_clamped() {
        let jobs = JobsConfig {
            default_timeout_secs: 60,
            max_timeout_secs: 120,
            ..JobsConfig::default()
        };
        assert_eq!(jobs.effective_timeout(None), Duration::from_secs(60));
        assert_eq!(jobs.effective_timeout(Some(0)), Duration::from_secs(60));
        assert_eq!(jobs.effective_timeout(Some(30)), Duration::from_secs(30));
        assert_eq!(jobs.effective_timeout(Some(9999)), Duration::from_secs(120));
    }

    #[test]
    fn default_timeout_above_max_warns() {
        let mut cfg = Config::default();
        cfg.jobs.default_timeout_secs = 7200;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("max_timeout_secs")));
    }
}
