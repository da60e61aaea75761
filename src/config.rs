//! Runtime configuration.
//!
//! Values come from defaults, an optional YAML file and `SOULBROWSER_DOM_*` environment
//! overrides, in that order.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_UTILITY_WORLD: &str = "__soulbrowser_utility_world__";
pub const DEFAULT_SOURCE_URL: &str = "__soulbrowser_evaluation_script__";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Wait budget used when a call does not supply one. `0` waits forever.
    pub default_timeout_ms: u64,
    /// Name of the isolated world reserved for runtime-internal evaluation.
    pub utility_world_name: String,
    /// Synthetic script origin appended to evaluated sources.
    pub evaluation_source_url: String,
    /// Capacity of the frame event broadcast channel.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            utility_world_name: DEFAULT_UTILITY_WORLD.to_string(),
            evaluation_source_url: DEFAULT_SOURCE_URL.to_string(),
            event_buffer: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_yaml::from_str(raw).context("Failed to parse runtime config")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, falling back to defaults otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                target: "dom-runtime",
                path = %path.display(),
                "runtime config not found, using defaults"
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runtime config {}", path.display()))?;
        let config = Self::from_yaml_str(&raw)?;
        info!(target: "dom-runtime", path = %path.display(), "loaded runtime config");
        Ok(config)
    }

    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = env::var("SOULBROWSER_DOM_TIMEOUT") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                let timeout = humantime::parse_duration(trimmed)
                    .with_context(|| format!("invalid SOULBROWSER_DOM_TIMEOUT: {trimmed}"))?;
                self.default_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
            }
        }
        if let Ok(raw) = env::var("SOULBROWSER_DOM_UTILITY_WORLD") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.utility_world_name = trimmed.to_string();
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.utility_world_name.trim().is_empty() {
            bail!("utility_world_name must not be empty");
        }
        if self.evaluation_source_url.trim().is_empty() {
            bail!("evaluation_source_url must not be empty");
        }
        Ok(())
    }
}
