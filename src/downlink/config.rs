use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::Diagnostic;
use crate::recon;
use crate::structure::Value;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid recon: {0}")]
    Parse(#[from] Diagnostic),
    #[error("config has the wrong shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Exponential backoff between relink attempts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction
    pub jitter: f64,
    /// 0 retries forever
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 500, max_delay_ms: 30_000, multiplier: 2.0, jitter: 0.1, max_attempts: 0 }
    }
}

impl ReconnectPolicy {
    /// Relink immediately, forever
    pub fn immediate() -> Self {
        Self { base_delay_ms: 0, max_delay_ms: 0, multiplier: 1.0, jitter: 0.0, max_attempts: 0 }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Delay before the zero-based `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let scale = if jitter > 0.0 {
            1.0 + jitter * (2.0 * rand::thread_rng().gen::<f64>() - 1.0)
        } else {
            1.0
        };
        Duration::from_millis((capped * scale).max(0.0) as u64)
    }
}

/// Per-downlink behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownlinkOptions {
    /// Relink after `@unlinked` or a dropped connection
    pub keep_linked: bool,
    /// Request `@sync` rather than `@link`
    pub keep_synced: bool,
    pub prio: f64,
    pub rate: f64,
}

impl Default for DownlinkOptions {
    fn default() -> Self {
        Self { keep_linked: true, keep_synced: true, prio: 0.0, rate: 0.0 }
    }
}

impl DownlinkOptions {
    pub fn keep_linked(mut self, keep: bool) -> Self {
        self.keep_linked = keep;
        self
    }

    pub fn keep_synced(mut self, keep: bool) -> Self {
        self.keep_synced = keep;
        self
    }

    pub fn with_prio(mut self, prio: f64, rate: f64) -> Self {
        self.prio = prio;
        self.rate = rate;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Resolved node uris remembered per host
    pub uri_cache_size: usize,
    pub reconnect: ReconnectPolicy,
    /// Defaults for downlinks opened without explicit options
    pub downlink: DownlinkOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { uri_cache_size: 64, reconnect: ReconnectPolicy::default(), downlink: DownlinkOptions::default() }
    }
}

impl ClientConfig {
    /// Loads a config written in Recon, such as
    /// `{uri_cache_size: 16, reconnect: {base_delay_ms: 250}}`.
    pub fn from_recon(text: &str) -> Result<Self, ConfigError> {
        match recon::parse(text)? {
            Value::Absent => Ok(Self::default()),
            value => Ok(serde_json::from_value(value.to_json())?),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}
