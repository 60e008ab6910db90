//! Sync configuration for client apps.
//!
//! Shells provision a `SyncConfig` at build time (JSON) and may override the
//! endpoint and replica location from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::{Retention, RetryPolicy};
use crate::util::{is_http_url, normalize_text_option};

const TOKEN_ENDPOINT_ENV: &str = "TALLY_SYNC_TOKEN_ENDPOINT";
const REPLICA_DIR_ENV: &str = "TALLY_SYNC_REPLICA_DIR";

/// Tunables for the sync orchestrator and merge engine.
///
/// Secret credentials must never be stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Delay before the first retry (seconds)
    pub retry_delay_secs: u64,
    /// Growth factor between consecutive retries; `1.0` keeps the delay fixed
    pub backoff_multiplier: f64,
    pub max_retry_delay_secs: u64,
    /// Give up after this many consecutive failures; absent retries forever
    pub max_attempts: Option<u32>,
    /// Consecutive failures before the UI shows sync as stalled; `0` never does
    pub stalled_after: u32,
    /// Pause between passes once synced (seconds); `0` disables background passes
    pub background_interval_secs: u64,
    /// Records fetched from the local store per page
    pub batch_size: usize,
    /// What happens to local rows once merged
    pub retention: Retention,
    pub sync_token_endpoint: Option<String>,
    /// Directory holding one embedded replica per partition
    pub replica_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 30,
            backoff_multiplier: 1.0,
            max_retry_delay_secs: 300,
            max_attempts: None,
            stalled_after: 10,
            background_interval_secs: 60,
            batch_size: 200,
            retention: Retention::default(),
            sync_token_endpoint: None,
            replica_dir: None,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| format!("invalid sync config JSON: {error}"))?;
        config.validated()
    }

    /// Overlay environment overrides, then re-validate.
    pub fn apply_env(self) -> Result<Self, String> {
        self.apply_overrides(
            std::env::var(TOKEN_ENDPOINT_ENV).ok(),
            std::env::var(REPLICA_DIR_ENV).ok(),
        )
    }

    fn apply_overrides(
        mut self,
        endpoint: Option<String>,
        replica_dir: Option<String>,
    ) -> Result<Self, String> {
        if let Some(endpoint) = normalize_text_option(endpoint) {
            self.sync_token_endpoint = Some(endpoint);
        }
        if let Some(dir) = normalize_text_option(replica_dir) {
            self.replica_dir = Some(PathBuf::from(dir));
        }
        self.validated()
    }

    fn validated(mut self) -> Result<Self, String> {
        if self.batch_size == 0 {
            return Err("sync config 'batch_size' must be greater than zero".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("sync config 'backoff_multiplier' must be at least 1.0".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("sync config 'max_attempts' must be greater than zero".to_string());
        }

        self.sync_token_endpoint = match normalize_text_option(self.sync_token_endpoint) {
            Some(endpoint) if is_http_url(&endpoint) => {
                Some(endpoint.trim_end_matches('/').to_string())
            }
            Some(_) => {
                return Err(
                    "sync config 'sync_token_endpoint' must include http:// or https://"
                        .to_string(),
                )
            }
            None => None,
        };
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry_delay_secs),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
            max_attempts: self.max_attempts,
            stalled_after: self.stalled_after,
        }
    }

    /// Pause between background passes, `None` when disabled.
    pub const fn background_interval(&self) -> Option<Duration> {
        match self.background_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
