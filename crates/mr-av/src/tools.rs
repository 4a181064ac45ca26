//! External tool detection and the startup self-check.
//!
//! The [`ToolRegistry`] resolves the configured transcoder (an explicit path
//! or a `PATH` lookup) and can verify that it actually runs. Resolution is
//! repeatable via [`ToolRegistry::rediscover`] so that a binary installed
//! after startup is picked up by the periodic re-check.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use mr_core::config::ToolsConfig;

use crate::command::ToolCommand;

/// A resolved external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found and answered its version probe.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding the discovered transcoder.
#[derive(Debug)]
pub struct ToolRegistry {
    config: ToolsConfig,
    transcoder: RwLock<Option<ToolConfig>>,
    version: RwLock<Option<String>>,
}

impl ToolRegistry {
    /// Discover the transcoder.
    ///
    /// If [`ToolsConfig::transcoder_path`] is set **and** exists it is used
    /// directly; otherwise [`which::which`] searches `PATH` for
    /// [`ToolsConfig::transcoder`]. A missing tool is not an error here; it
    /// surfaces through [`ToolRegistry::require_transcoder`] and
    /// [`ToolRegistry::self_check`].
    pub fn discover(config: &ToolsConfig) -> Self {
        let registry = Self {
            config: config.clone(),
            transcoder: RwLock::new(None),
            version: RwLock::new(None),
        };
        registry.rediscover();
        registry
    }

    /// Re-run resolution against the current filesystem.
    pub fn rediscover(&self) -> bool {
        let resolved = resolve(&self.config);
        let found = resolved.is_some();
        *self.transcoder.write() = resolved;
        found
    }

    /// Configured transcoder name.
    pub fn transcoder_name(&self) -> &str {
        &self.config.transcoder
    }

    /// The resolved transcoder, or [`mr_core::Error::Dependency`] if it was
    /// not found.
    pub fn require_transcoder(&self) -> mr_core::Result<ToolConfig> {
        self.transcoder.read().clone().ok_or_else(|| {
            mr_core::Error::Dependency(format!(
                "{} not found; is it installed and in PATH?",
                self.config.transcoder
            ))
        })
    }

    /// Version reported by the last successful [`ToolRegistry::self_check`].
    pub fn version(&self) -> Option<String> {
        self.version.read().clone()
    }

    /// Verify the transcoder can be executed by running `<tool> -version`
    /// against the configured self-check timeout.
    ///
    /// Returns the first line of the version output.
    pub async fn self_check(&self) -> mr_core::Result<String> {
        let tool = match self.require_transcoder() {
            Ok(tool) => tool,
            Err(_) if self.rediscover() => self.require_transcoder()?,
            Err(e) => return Err(e),
        };

        let timeout = Duration::from_secs(self.config.self_check_timeout_secs.max(1));
        let version = probe_version(&tool, timeout).await.map_err(|e| {
            mr_core::Error::Dependency(format!("{} self-check failed: {e}", tool.name))
        })?;

        *self.version.write() = Some(version.clone());
        Ok(version)
    }

    /// Check the transcoder and return availability information.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let name = self.config.transcoder.clone();
        let info = match self.require_transcoder() {
            Ok(tool) => {
                let timeout = Duration::from_secs(self.config.self_check_timeout_secs.max(1));
                let version = probe_version(&tool, timeout).await.ok();
                ToolInfo {
                    name,
                    available: version.is_some(),
                    version,
                    path: Some(tool.path),
                }
            }
            Err(_) => ToolInfo {
                name,
                available: false,
                version: None,
                path: None,
            },
        };
        vec![info]
    }
}

fn resolve(config: &ToolsConfig) -> Option<ToolConfig> {
    let path = match config.transcoder_path.as_deref() {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => {
            tracing::warn!(
                "Configured transcoder path {} does not exist; searching PATH",
                p.display()
            );
            which::which(&config.transcoder).ok()
        }
        None => which::which(&config.transcoder).ok(),
    }?;

    Some(ToolConfig {
        name: config.transcoder.clone(),
        path,
    })
}

/// Run `<tool> -version` and return the first non-empty output line.
async fn probe_version(tool: &ToolConfig, timeout: Duration) -> mr_core::Result<String> {
    let output = ToolCommand::new(tool.path.clone())
        .arg("-version")
        .timeout(timeout)
        .execute()
        .await?;

    let text = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };

    Ok(text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown")
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_for(name: &str, path: Option<&Path>) -> ToolsConfig {
        ToolsConfig {
            transcoder: name.to_string(),
            transcoder_path: path.map(Path::to_path_buf),
            ..ToolsConfig::default()
        }
    }

    #[test]
    fn missing_tool_is_a_dependency_error() {
        let registry = ToolRegistry::discover(&config_for("nonexistent_tool_xyz_12345", None));
        let err = registry.require_transcoder().unwrap_err();
        assert!(matches!(err, mr_core::Error::Dependency(_)));
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn explicit_path_wins_over_path_lookup() {
        let sh = which::which("sh").unwrap();
        let registry = ToolRegistry::discover(&config_for("ffmpeg", Some(&sh)));
        assert_eq!(registry.require_transcoder().unwrap().path, sh);
    }

    #[tokio::test]
    async fn self_check_fails_for_missing_tool() {
        let registry = ToolRegistry::discover(&config_for("nonexistent_tool_xyz_12345", None));
        assert!(registry.self_check().await.is_err());
        assert!(registry.version().is_none());

        let info = registry.check_all().await;
        assert_eq!(info.len(), 1);
        assert!(!info[0].available);
    }

    #[tokio::test]
    async fn self_check_fails_when_tool_exits_non_zero() {
        // `false` ignores its arguments and exits 1.
        let registry = ToolRegistry::discover(&config_for("false", None));
        let err = registry.self_check().await.unwrap_err();
        assert!(err.to_string().contains("self-check failed"), "{err}");
    }

    #[tokio::test]
    async fn self_check_records_version() {
        // `echo -version` prints "-version" and exits 0.
        let registry = ToolRegistry::discover(&config_for("echo", None));
        let version = registry.self_check().await.unwrap();
        assert_eq!(version, "-version");
        assert_eq!(registry.version().as_deref(), Some("-version"));
    }

    #[test]
    fn tool_info_serializes() {
        let info = ToolInfo {
            name: "ffmpeg".into(),
            available: false,
            version: None,
            path: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["available"], false);
    }
}
