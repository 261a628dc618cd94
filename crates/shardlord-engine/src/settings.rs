//! Copy-engine tunables: retry and backoff timings.
//!
//! Deliberately a standalone struct rather than a dependency on
//! `shardlord-config`: the engine only needs four scalars, and keeping it
//! decoupled from config-file loading means `shardlord-engine` has no
//! opinion on TOML, XDG paths, or environment variables. `shardlord-cli`
//! builds one of these from a loaded `shardlord_config::EngineConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay before retrying after a transport/remote-execution failure.
    /// Defaults to 10s.
    pub cmd_retry_naptime_ms: u64,
    /// Delay before re-polling a not-ready condition. Defaults to 10s.
    pub poll_interval_ms: u64,
    /// Whether reconfiguration should enroll new replicas as synchronous
    /// standbys.
    pub sync_replicas: bool,
    /// The well-known meta-subscription name polled by the
    /// catalog-freshness barrier.
    pub meta_subscription_name: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cmd_retry_naptime_ms: 10_000,
            poll_interval_ms: 10_000,
            sync_replicas: false,
            meta_subscription_name: "shardman_meta_sub".to_string(),
        }
    }
}
