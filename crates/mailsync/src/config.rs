//! Sync engine tunables
//!
//! Loaded from (in order of priority):
//! 1. JSON file (~/.config/courier/sync.json)
//! 2. Environment variable overrides
//! 3. Built-in defaults

use anyhow::Result;
use serde::Deserialize;

/// Config filename in the Courier config directory
const SYNC_CONFIG_FILE: &str = "sync.json";

/// Tunable parameters for the sync engines
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Message IDs requested per listing page
    pub page_size: usize,
    /// Concurrent fetches per chunk in the batch fetcher
    pub fetch_chunk_size: usize,
    /// Safety cap on messages mirrored by one full sync. History beyond
    /// the cap is a known gap; incremental sync picks up anything that
    /// changes afterwards.
    pub full_sync_cap: u64,
    /// Global timeout for every provider HTTP call, in seconds
    pub http_timeout_secs: u64,
    /// Age after which a held run lease is considered crashed and
    /// reclaimable, in seconds
    pub run_lease_secs: i64,
    /// Minimum seconds between user-triggered incremental syncs
    pub sync_cooldown_secs: u64,
    /// Advisory age limit for stored checkpoints, in days
    pub checkpoint_max_age_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            fetch_chunk_size: 10,
            full_sync_cap: 1000,
            http_timeout_secs: 30,
            run_lease_secs: 900,
            sync_cooldown_secs: 30,
            checkpoint_max_age_days: 7,
        }
    }
}

impl SyncConfig {
    /// Load config from file if present, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = if config::config_exists(SYNC_CONFIG_FILE) {
            config::load_json(SYNC_CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `COURIER_SYNC_*` environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("COURIER_SYNC_PAGE_SIZE") {
            self.page_size = v;
        }
        if let Some(v) = env_parse("COURIER_SYNC_CHUNK_SIZE") {
            self.fetch_chunk_size = v;
        }
        if let Some(v) = env_parse("COURIER_SYNC_FULL_CAP") {
            self.full_sync_cap = v;
        }
        if let Some(v) = env_parse("COURIER_SYNC_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = v;
        }
    }

    /// HTTP timeout as a std Duration
    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }

    /// Run-lease staleness window as a chrono Duration
    pub fn run_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.run_lease_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.fetch_chunk_size, 10);
        assert_eq!(config.full_sync_cap, 1000);
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "full_sync_cap": 50 }"#).unwrap();
        assert_eq!(config.full_sync_cap, 50);
        assert_eq!(config.fetch_chunk_size, 10);
    }
}
