use crate::config::types::{Config, CredentialsConfig, EndpointsConfig, EngineConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_credentials_config(&config.credentials)?;
    validate_endpoints_config(&config.endpoints)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_targets < 1 || config.max_concurrent_targets > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_targets must be between 1 and 100, got {}",
            config.max_concurrent_targets
        )));
    }

    // The remote source caps page sizes at 100
    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page_size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates credential configuration
///
/// Called after the environment fallback has been applied, so an empty pool
/// here means no credential was supplied anywhere.
fn validate_credentials_config(config: &CredentialsConfig) -> Result<(), ConfigError> {
    if config.tokens.is_empty() {
        return Err(ConfigError::Validation(
            "no API tokens configured; set [credentials] tokens or the GITHUB_TOKEN environment variable"
                .to_string(),
        ));
    }

    if config.tokens.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "API tokens cannot be blank".to_string(),
        ));
    }

    Ok(())
}

/// Validates endpoint URLs
fn validate_endpoints_config(config: &EndpointsConfig) -> Result<(), ConfigError> {
    Url::parse(&config.graphql_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid graphql_url: {}", e)))?;
    Url::parse(&config.rest_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid rest_url: {}", e)))?;
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &crate::config::types::OutputConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data_dir cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_dir.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}
