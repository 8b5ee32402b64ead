//! Configuration for Stripeset
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! `STRIPESET_*` environment variables. Every layer is validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{StripesetError, StripesetResult};

pub mod defaults;
pub mod erasure;
pub mod locking;
pub mod logging;

pub use defaults::*;
pub use erasure::ErasureConfig;
pub use locking::LockConfig;
pub use logging::LoggingConfig;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StripesetConfig {
    /// Erasure set geometry and membership
    pub set: ErasureConfig,

    /// Lock object pool
    pub locks: LockConfig,

    /// Log output
    pub logging: LoggingConfig,
}

impl StripesetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> StripesetResult<Self> {
        let config = Self {
            set: ErasureConfig::from_env()?,
            locks: LockConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml(contents: &str) -> StripesetResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides on top
    pub fn load(path: impl AsRef<Path>) -> StripesetResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StripesetError::io(format!("reading {}", path.display()), e.to_string())
        })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields that are explicitly set in the environment
    pub fn apply_env(&mut self) -> StripesetResult<()> {
        if let Ok(name) = std::env::var("STRIPESET_SET_NAME") {
            self.set.name = name;
        }
        if let Some(nodes) = parse_env("STRIPESET_NODES")? {
            self.set.nodes = nodes;
        }
        if let Some(fragments) = parse_env("STRIPESET_FRAGMENTS")? {
            self.set.fragments = fragments;
        }
        if let Some(auto_heal) = parse_env("STRIPESET_AUTO_HEAL")? {
            self.set.auto_heal = auto_heal;
        }
        if let Some(capacity) = parse_env("STRIPESET_LOCK_POOL_CAPACITY")? {
            self.locks.pool_capacity = capacity;
        }
        if let Ok(filter) = std::env::var("STRIPESET_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    pub fn to_toml(&self) -> StripesetResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> StripesetResult<()> {
        self.set.validate()?;
        self.locks.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Builder for StripesetConfig
pub struct StripesetConfigBuilder {
    config: StripesetConfig,
}

impl StripesetConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StripesetConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.set.name = name.into();
        self
    }

    pub fn nodes(mut self, nodes: usize) -> Self {
        self.config.set.nodes = nodes;
        self
    }

    pub fn fragments(mut self, fragments: usize) -> Self {
        self.config.set.fragments = fragments;
        self
    }

    pub fn members(mut self, members: Vec<usize>) -> Self {
        self.config.set.members = Some(members);
        self
    }

    pub fn auto_heal(mut self, enabled: bool) -> Self {
        self.config.set.auto_heal = enabled;
        self
    }

    pub fn lock_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.locks.pool_capacity = capacity;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn build(self) -> StripesetResult<StripesetConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for StripesetConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an environment variable if it is set
pub(crate) fn parse_env<T: FromStr>(key: &str) -> StripesetResult<Option<T>> {
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| StripesetError::invalid_config(key, val, "cannot be parsed")),
        Err(_) => Ok(None),
    }
}
