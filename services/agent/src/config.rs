use concierge_core::classifier::{Disposition, ErrorPolicy};
use concierge_core::context::DEFAULT_CONTEXT_DIR;
use concierge_core::instructions::DEFAULT_ROLE;
use concierge_core::llm_client::{DEFAULT_API_BASE, DEFAULT_CHAT_MODEL};
use concierge_core::session::SessionConfig;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
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
#[derive(Debug)]
pub struct Config {
    pub context_dir: PathBuf,
    pub context_topic: Option<String>,
    pub agent_role: String,
    /// Only needed once a session talks to the model.
    pub llm_api_key: Option<SecretString>,
    pub llm_base_url: String,
    pub chat_model: String,
    pub inactivity_timeout: Duration,
    pub watchdog_interval: Duration,
    pub stt_retry_backoff: Duration,
    pub response_timeout: Duration,
    pub error_policy: ErrorPolicy,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let context_dir = std::env::var("CONTEXT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONTEXT_DIR));
        let context_topic = std::env::var("CONTEXT_TOPIC")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let agent_role = std::env::var("AGENT_ROLE").unwrap_or_else(|_| DEFAULT_ROLE.to_string());

        let llm_api_key = std::env::var("LLM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);
        let llm_base_url =
            std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());

        let inactivity_timeout = seconds_var("INACTIVITY_TIMEOUT_SECS", 30)?;
        let watchdog_interval = seconds_var("WATCHDOG_INTERVAL_SECS", 5)?;
        let stt_retry_backoff = seconds_var("STT_RETRY_BACKOFF_SECS", 2)?;
        let response_timeout = seconds_var("RESPONSE_TIMEOUT_SECS", 30)?;

        let error_policy = ErrorPolicy {
            on_model_failure: disposition_var("ON_MODEL_FAILURE")?,
            on_playback_failure: disposition_var("ON_PLAYBACK_FAILURE")?,
            max_retries: match std::env::var("MAX_TURN_RETRIES") {
                Ok(raw) => raw.trim().parse::<u32>().map_err(|e| {
                    ConfigError::InvalidValue("MAX_TURN_RETRIES".to_string(), e.to_string())
                })?,
                Err(_) => ErrorPolicy::default().max_retries,
            },
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            context_dir,
            context_topic,
            agent_role,
            llm_api_key,
            llm_base_url,
            chat_model,
            inactivity_timeout,
            watchdog_interval,
            stt_retry_backoff,
            response_timeout,
            error_policy,
            log_level,
        })
    }

    /// The model API key, which is required to start a session.
    pub fn api_key(&self) -> Result<&SecretString, ConfigError> {
        self.llm_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingVar("LLM_API_KEY".to_string()))
    }

    /// The timing and failure policy handed to each session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            inactivity_limit: self.inactivity_timeout,
            watchdog_interval: self.watchdog_interval,
            reconnect_backoff: self.stt_retry_backoff,
            response_timeout: self.response_timeout,
            error_policy: self.error_policy,
        }
    }
}

/// Reads a whole number of seconds; zero is rejected.
fn seconds_var(var: &str, default: u64) -> Result<Duration, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(Duration::from_secs(default));
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            var.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn disposition_var(var: &str) -> Result<Disposition, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<Disposition>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e)),
        Err(_) => Ok(Disposition::Ignore),
    }
}
