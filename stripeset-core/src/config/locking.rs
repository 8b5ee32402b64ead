//! Lock object pool configuration

use serde::{Deserialize, Serialize};

use super::defaults::*;
use super::parse_env;
use crate::error::{StripesetError, StripesetResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Maximum number of live lock objects per erasure set
    pub pool_capacity: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_LOCK_POOL_CAPACITY,
        }
    }
}

impl LockConfig {
    pub fn from_env() -> StripesetResult<Self> {
        let mut config = Self::default();
        if let Some(capacity) = parse_env("STRIPESET_LOCK_POOL_CAPACITY")? {
            config.pool_capacity = capacity;
        }
        Ok(config)
    }

    pub fn validate(&self) -> StripesetResult<()> {
        if self.pool_capacity == 0 {
            return Err(StripesetError::invalid_config(
                "locks.pool_capacity",
                self.pool_capacity,
                "must be non-zero",
            ));
        }
        Ok(())
    }
}
