//! Worker configuration (§6 of the spec). Loading this from a file or environment is the excluded
//! "application configuration loading" collaborator; this struct is the shape that collaborator
//! hands to `BrokerWorker::spawn`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::SslOptions;

/// `client_id` sent on every request header.
pub const DEFAULT_CLIENT_ID: &str = "kafka_ex";
/// Default metadata-refresh retry budget (§4.4).
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Backoff between `LeaderNotAvailable` retries (§4.4).
pub const RETRY_BACKOFF: Duration = Duration::from_millis(300);
/// Default per-socket round-trip timeout (§5).
pub const DEFAULT_SYNC_TIMEOUT_MILLIS: u64 = 1_000;
/// Default outer caller timeout (§5), raised to `sync_timeout` when that is larger.
pub const DEFAULT_CALLER_TIMEOUT_MILLIS: u64 = 5_000;
/// Default interval between periodic metadata refreshes (§6).
pub const DEFAULT_METADATA_UPDATE_INTERVAL_MILLIS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ordered bootstrap broker addresses.
    pub uris: Vec<(String, i32)>,

    #[serde(default)]
    pub use_ssl: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_options: Option<SslOptionsConfig>,

    #[serde(default = "default_metadata_update_interval")]
    pub metadata_update_interval_millis: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_group: Option<String>,

    #[serde(default = "default_consumer_group_update_interval")]
    pub consumer_group_update_interval_millis: u64,

    #[serde(default = "default_worker_name")]
    pub worker_name: String,

    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_millis: u64,
}

fn default_metadata_update_interval() -> u64 {
    DEFAULT_METADATA_UPDATE_INTERVAL_MILLIS
}

fn default_consumer_group_update_interval() -> u64 {
    30_000
}

fn default_worker_name() -> String {
    "kafka_ex".to_owned()
}

fn default_sync_timeout() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MILLIS
}

/// A serializable mirror of `network::SslOptions`; `ssl_options` in `WorkerState` is the opaque
/// form this resolves to once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslOptionsConfig {
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

impl From<SslOptionsConfig> for SslOptions {
    fn from(config: SslOptionsConfig) -> Self {
        SslOptions {
            danger_accept_invalid_certs: config.danger_accept_invalid_certs,
        }
    }
}

impl ClientConfig {
    pub fn new(uris: Vec<(String, i32)>) -> ClientConfig {
        ClientConfig {
            uris,
            use_ssl: false,
            ssl_options: None,
            metadata_update_interval_millis: DEFAULT_METADATA_UPDATE_INTERVAL_MILLIS,
            consumer_group: None,
            consumer_group_update_interval_millis: 30_000,
            worker_name: default_worker_name(),
            sync_timeout_millis: DEFAULT_SYNC_TIMEOUT_MILLIS,
        }
    }

    pub fn metadata_update_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_update_interval_millis)
    }

    pub fn consumer_group_update_interval(&self) -> Duration {
        Duration::from_millis(self.consumer_group_update_interval_millis)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_millis)
    }

    /// Outer caller timeout (§5): bounds how long a `BrokerWorkerHandle` method waits on its reply,
    /// independent of the inner per-socket `sync_timeout`. Defaults to `DEFAULT_CALLER_TIMEOUT_MILLIS`,
    /// but a `sync_timeout` configured larger than that wins, since waiting less than the timeout a
    /// single socket round trip is allowed to take would make every slow-but-healthy call spuriously
    /// cancel itself.
    pub fn caller_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_millis.max(DEFAULT_CALLER_TIMEOUT_MILLIS))
    }

    pub fn ssl_options(&self) -> SslOptions {
        self.ssl_options.clone().unwrap_or_default().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_documented_defaults() {
        let config = ClientConfig::new(vec![("localhost".to_owned(), 9092)]);
        assert_eq!(config.metadata_update_interval_millis, 30_000);
        assert_eq!(config.sync_timeout_millis, 1_000);
        assert!(!config.use_ssl);
        assert!(config.consumer_group.is_none());
    }

    #[test]
    fn caller_timeout_defaults_to_five_seconds() {
        let config = ClientConfig::new(vec![("localhost".to_owned(), 9092)]);
        assert_eq!(config.caller_timeout(), Duration::from_millis(DEFAULT_CALLER_TIMEOUT_MILLIS));
    }

    #[test]
    fn caller_timeout_is_raised_when_sync_timeout_is_larger() {
        let mut config = ClientConfig::new(vec![("localhost".to_owned(), 9092)]);
        config.sync_timeout_millis = 9_000;
        assert_eq!(config.caller_timeout(), Duration::from_millis(9_000));
    }
}
