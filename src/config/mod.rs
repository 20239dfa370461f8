//! Configuration module for Gleaner
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, including the environment fallback for API tokens.
//!
//! # Example
//!
//! ```no_run
//! use gleaner::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Concurrency: {}", config.engine.max_concurrent_targets);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CredentialsConfig, EndpointsConfig, EngineConfig, OutputConfig};

// Re-export parser functions
pub use parser::load_config;
