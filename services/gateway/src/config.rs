use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Upstream provider API key. Lives only in this process.
    pub openai_api_key: String,
    pub openai_base_url: String,
    /// Model minted into realtime session credentials.
    pub realtime_model: String,
    pub voice: String,
    /// Chat model answering `web_search` tool queries.
    pub web_search_model: String,
    /// Chat model answering `document_search` tool queries.
    pub document_search_model: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8787".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let realtime_model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-12-17".to_string());
        let voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "alloy".to_string());

        let web_search_model = std::env::var("WEB_SEARCH_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini-search-preview".to_string());
        let document_search_model =
            std::env::var("DOCUMENT_SEARCH_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|e| ConfigError::InvalidValue("RUST_LOG".to_string(), e.to_string()))?;

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_base_url,
            realtime_model,
            voice,
            web_search_model,
            document_search_model,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_BASE_URL");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("REALTIME_VOICE");
            env::remove_var("WEB_SEARCH_MODEL");
            env::remove_var("DOCUMENT_SEARCH_MODEL");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    #[serial]
    fn missing_api_key_is_an_error() {
        clear_env_vars();
        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            other => panic!("expected MissingVar, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_only_the_key_is_set() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
        }
        let config = Config::from_env().expect("config should load");
        assert_eq!(config.bind_address.port(), 8787);
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.voice, "alloy");
        assert_eq!(config.log_level, Level::INFO);
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn rust_log_sets_the_level() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("RUST_LOG", "debug");
        }
        let config = Config::from_env().expect("config should load");
        assert_eq!(config.log_level, Level::DEBUG);
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn invalid_bind_address_is_rejected() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-test");
            env::set_var("BIND_ADDRESS", "not-an-address");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "BIND_ADDRESS"));
        clear_env_vars();
    }
}
