use crate::transport::{GITHUB_GRAPHQL_URL, GITHUB_REST_URL};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Gleaner
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    pub output: OutputConfig,
}

/// Harvesting engine behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of targets harvested concurrently
    #[serde(rename = "max-concurrent-targets")]
    pub max_concurrent_targets: u32,

    /// Fixed pause before each retry (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Page size requested from the remote source
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Whether falling back to the secondary protocol is allowed
    #[serde(rename = "fallback-enabled", default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// API credential configuration
///
/// When `tokens` is empty, the loader falls back to the `GITHUB_TOKEN`
/// environment variable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Remote endpoint configuration; defaults target the real service
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(rename = "graphql-url", default = "default_graphql_url")]
    pub graphql_url: String,

    #[serde(rename = "rest-url", default = "default_rest_url")]
    pub rest_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            rest_url: default_rest_url(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory where harvest result files are written
    #[serde(rename = "data-dir")]
    pub data_dir: String,

    /// Directory holding per-target checkpoint blobs
    #[serde(rename = "checkpoint-dir")]
    pub checkpoint_dir: String,
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_page_size() -> u32 {
    100
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("Gleaner/{}", env!("CARGO_PKG_VERSION"))
}

fn default_graphql_url() -> String {
    GITHUB_GRAPHQL_URL.to_string()
}

fn default_rest_url() -> String {
    GITHUB_REST_URL.to_string()
}
