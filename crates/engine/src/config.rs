use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Engine tuning knobs. Everything has a default, so an absent or empty
/// config file yields a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempt budget for pointer/content commits.
    #[serde(default = "default_commit_attempts")]
    pub commit_attempts: u32,
    #[serde(default = "default_commit_backoff_secs")]
    pub commit_backoff_secs: u64,

    /// Attempt budget for tracking-manifest read-modify-write cycles. The
    /// manifest is a shared resource, so this is deliberately generous.
    #[serde(default = "default_manifest_attempts")]
    pub manifest_attempts: u32,
    #[serde(default = "default_manifest_backoff_secs")]
    pub manifest_backoff_secs: u64,

    /// Full negotiate→transfer→commit→verify cycles before an LFS upload is
    /// declared failed.
    #[serde(default = "default_lfs_attempts")]
    pub lfs_attempts: u32,

    /// Per-call attempt budget for negotiation, raw transfer, and the
    /// existence probe.
    #[serde(default = "default_network_attempts")]
    pub network_attempts: u32,
    #[serde(default = "default_network_backoff_secs")]
    pub network_backoff_secs: u64,

    /// Per-attempt timeout applied by the HTTP client; no outbound call may
    /// block indefinitely.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Root directory for filesystem chunk storage.
    #[serde(default = "default_chunk_root")]
    pub chunk_root: PathBuf,

    /// Abandoned sessions older than this are reaped.
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Recommended size above which callers should choose LFS. Informational
    /// only — the mode on each request is the caller's decision.
    #[serde(default = "default_lfs_threshold_bytes")]
    pub lfs_threshold_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_attempts: default_commit_attempts(),
            commit_backoff_secs: default_commit_backoff_secs(),
            manifest_attempts: default_manifest_attempts(),
            manifest_backoff_secs: default_manifest_backoff_secs(),
            lfs_attempts: default_lfs_attempts(),
            network_attempts: default_network_attempts(),
            network_backoff_secs: default_network_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            chunk_root: default_chunk_root(),
            session_max_age_secs: default_session_max_age_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            lfs_threshold_bytes: default_lfs_threshold_bytes(),
        }
    }
}

impl EngineConfig {
    pub fn commit_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.commit_attempts,
            Duration::from_secs(self.commit_backoff_secs),
        )
    }

    pub fn manifest_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.manifest_attempts,
            Duration::from_secs(self.manifest_backoff_secs),
        )
    }

    pub fn network_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.network_attempts,
            Duration::from_secs(self.network_backoff_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

fn default_commit_attempts() -> u32 {
    5
}

fn default_commit_backoff_secs() -> u64 {
    1
}

fn default_manifest_attempts() -> u32 {
    5
}

fn default_manifest_backoff_secs() -> u64 {
    1
}

fn default_lfs_attempts() -> u32 {
    4
}

fn default_network_attempts() -> u32 {
    3
}

fn default_network_backoff_secs() -> u64 {
    2
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_session_max_age_secs() -> u64 {
    86_400
}

fn default_reap_interval_secs() -> u64 {
    3_600
}

fn default_lfs_threshold_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_chunk_root() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .map(|home| {
            home.join(".local")
                .join("share")
                .join("githaul")
                .join("chunks")
        })
        .unwrap_or_else(|_| PathBuf::from("githaul-chunks"))
}

/// Load engine config from a TOML file; an absent file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read engine config at {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse engine config at {}", path.display()))?;
    Ok(config)
}
