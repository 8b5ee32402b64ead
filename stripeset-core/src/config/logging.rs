//! Logging configuration

use serde::{Deserialize, Serialize};

use super::defaults::*;
use super::parse_env;
use crate::error::{StripesetError, StripesetResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,

    /// Include thread ids in log lines
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            thread_ids: DEFAULT_LOG_THREAD_IDS,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> StripesetResult<Self> {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("STRIPESET_LOG") {
            config.filter = filter;
        }
        if let Some(thread_ids) = parse_env("STRIPESET_LOG_THREAD_IDS")? {
            config.thread_ids = thread_ids;
        }
        Ok(config)
    }

    pub fn validate(&self) -> StripesetResult<()> {
        if self.filter.trim().is_empty() {
            return Err(StripesetError::configuration(
                "logging.filter",
                "filter must not be empty",
            ));
        }
        Ok(())
    }
}
