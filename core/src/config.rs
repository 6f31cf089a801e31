//! Layered configuration: built-in defaults, an optional file, then
//! `STORY_`-prefixed environment variables (`STORY_API_URL`, ...).

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use config::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Workflow service endpoint the proxy posts to.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Address the proxy server binds.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Upper bound on a single round-trip to the workflow service.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Budget for a whole orchestration run, retries and backoff included.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// `pretty` or `json`; interpreted by the server's logging setup.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_operation_timeout_secs() -> u64 {
    240
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            listen_addr: default_listen_addr(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            log_format: default_log_format(),
        }
    }
}

impl StoryConfig {
    /// Load configuration from defaults, `path` (if given and present), and
    /// the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&StoryConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("STORY").try_parsing(true));

        let mut loaded: StoryConfig = builder.build()?.try_deserialize()?;
        if loaded.api_url.trim().is_empty() {
            loaded.api_url = default_api_url();
        }
        Ok(loaded)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
