//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::ServiceConfig;

/// Load configuration from `config.*` and `RXPARSER__*` env vars.
///
/// The provider-standard `OPENAI_API_KEY` and `GEMINI_API_KEY` variables
/// fill in keys the prefixed sources left empty.
pub fn load_config() -> ServiceResult<ServiceConfig> {
    let mut config: ServiceConfig = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("RXPARSER")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    apply_key_fallbacks(&mut config, |name| std::env::var(name).ok());

    Ok(config)
}

fn apply_key_fallbacks(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if config.parser.openai_api_key.is_none() {
        config.parser.openai_api_key = lookup("OPENAI_API_KEY");
    }
    if config.parser.gemini_api_key.is_none() {
        config.parser.gemini_api_key = lookup("GEMINI_API_KEY");
    }
}
