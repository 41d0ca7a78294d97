use clap::Parser;
use std::time::Duration;

use crate::error::PipelineError;
use crate::gemini_engine::GeminiConfig;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Rows sent to the classifier per call
    #[arg(long, env = "DEFAULT_BATCH_SIZE", default_value = "200")]
    pub batch_size: usize,

    /// Batches classified concurrently; 1 keeps batches strictly sequential
    #[arg(long, env = "MAX_IN_FLIGHT", default_value = "1")]
    pub max_in_flight: usize,

    /// Timeout in seconds for each classifier attempt
    #[arg(long, env = "BATCH_TIMEOUT_SECS")]
    pub batch_timeout_secs: Option<u64>,

    /// Retries for transient classifier failures
    #[arg(long, env = "MAX_RETRIES", default_value = "0")]
    pub max_retries: u32,

    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Maximum accepted upload size in bytes
    #[arg(long, env = "MAX_CONTENT_LENGTH", default_value = "16777216")]
    pub max_upload_bytes: usize,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.5-flash")]
    pub model: String,

    /// Gemini API base URL
    #[arg(
        long,
        env = "GEMINI_API_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub api_base_url: String,

    /// Google API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_in_flight: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_in_flight: 1,
        }
    }
}

impl From<&Config> for BatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            max_in_flight: config.max_in_flight,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(PipelineError::Configuration(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with a request-level batch size.
    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        Self {
            batch_size,
            ..self.clone()
        }
    }
}

impl Config {
    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            base_url: self.api_base_url.clone(),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            attempt_timeout: self.batch_timeout_secs.map(Duration::from_secs),
            ..RetryConfig::default()
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
