//! Gleaner: a resilient GitHub expertise harvester
//!
//! This crate implements the harvesting engine that collects ranked
//! domain-expert profiles and their code-review comments from GitHub,
//! surviving rate limits and partial failures through credential rotation,
//! protocol fallback, and per-target checkpointing.

pub mod checkpoint;
pub mod config;
pub mod credentials;
pub mod filter;
pub mod harvest;
pub mod merge;
pub mod policy;
pub mod transport;

use thiserror::Error;

/// Main error type for Gleaner operations
#[derive(Debug, Error)]
pub enum GleanerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Gleaner operations
pub type Result<T> = std::result::Result<T, GleanerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{Credential, CredentialPool};
pub use harvest::{
    HarvestResult, HarvestTarget, HarvestedItem, TargetKind, TerminationReason,
};
pub use transport::{FetchOutcome, Protocol, Transport};
