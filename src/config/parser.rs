use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use std::path::Path;

/// Loads, resolves, and validates a configuration file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let mut config: Config = toml::from_str(&content)?;

    // Credentials may come from the environment instead of the file, so
    // tokens never have to be committed alongside the config
    if config.credentials.tokens.is_empty() {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.trim().is_empty() {
                tracing::debug!("Using API token from GITHUB_TOKEN");
                config.credentials.tokens.push(token);
            }
        }
    }

    validate(&config)?;

    Ok(config)
}
