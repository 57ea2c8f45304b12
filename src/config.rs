//! Configuration loading and persistence.
//!
//! Reads `config.json` from the relay's config directory, then applies
//! environment variable overrides. A missing or unreadable file means
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::constants;
use crate::socket::{HostSettings, LivenessPolicy, LivenessSettings, SessionOptions};

const CONFIG_FILE: &str = "config.json";

/// Configuration for a relay process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// TCP port the host listens on and peers dial by default.
    pub port: u16,
    /// Seconds between liveness sweeps.
    pub liveness_interval_secs: u64,
    /// Readiness probe window in milliseconds.
    pub probe_timeout_ms: u64,
    /// How dead connections are detected.
    pub liveness_policy: LivenessPolicy,
    /// Milliseconds between outbound queue drains.
    pub drain_interval_ms: u64,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Upper bound in milliseconds on flushing a closing connection.
    pub close_flush_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_PORT,
            liveness_interval_secs: constants::LIVENESS_INTERVAL.as_secs(),
            probe_timeout_ms: duration_ms(constants::PROBE_TIMEOUT),
            liveness_policy: LivenessPolicy::default(),
            drain_interval_ms: duration_ms(constants::DRAIN_INTERVAL),
            read_chunk_size: constants::READ_CHUNK_SIZE,
            close_flush_timeout_ms: duration_ms(constants::CLOSE_FLUSH_TIMEOUT),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl RelayConfig {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `SYNC_RELAY_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SYNC_RELAY_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("sync-relay")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_dir() {
            Ok(dir) => Self::load_from(&dir),
            Err(e) => {
                log::warn!("[Config] {e:#}, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`, falling back to defaults.
    pub fn load_from(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::read_file(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("[Config] Ignoring {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup` (normally the process environment).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = parse_override(&lookup, "SYNC_RELAY_PORT") {
            self.port = port;
        }
        if let Some(secs) = parse_override::<u64>(&lookup, "SYNC_RELAY_LIVENESS_SECS") {
            if secs == 0 {
                log::warn!("[Config] Ignoring SYNC_RELAY_LIVENESS_SECS=0");
            } else {
                self.liveness_interval_secs = secs;
            }
        }
        if let Some(policy) = parse_override(&lookup, "SYNC_RELAY_LIVENESS_POLICY") {
            self.liveness_policy = policy;
        }
        if let Some(ms) = parse_override(&lookup, "SYNC_RELAY_DRAIN_MS") {
            self.drain_interval_ms = ms;
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the current configuration to `dir/config.json`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Liveness supervisor settings.
    pub fn liveness_settings(&self) -> LivenessSettings {
        LivenessSettings {
            interval: Duration::from_secs(self.liveness_interval_secs.max(1)),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            policy: self.liveness_policy,
        }
    }

    /// Per-session settings.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            read_chunk_size: self.read_chunk_size.max(1),
            close_flush_timeout: Duration::from_millis(self.close_flush_timeout_ms),
        }
    }

    /// Settings for the host role.
    pub fn host_settings(&self) -> HostSettings {
        HostSettings {
            session: self.session_options(),
            liveness: self.liveness_settings(),
        }
    }

    /// Period of the outbound drain loop.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("[Config] Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
