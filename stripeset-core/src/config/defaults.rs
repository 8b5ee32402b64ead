//! Default configuration values for Stripeset
//!
//! This module centralizes all default values to make them easy to find and modify.

// Erasure set defaults
pub const DEFAULT_SET_NAME: &str = "disperse-0";
pub const DEFAULT_NODES: usize = 6;
pub const DEFAULT_FRAGMENTS: usize = 4;
pub const DEFAULT_AUTO_HEAL: bool = true;

// Lock defaults
pub const DEFAULT_LOCK_POOL_CAPACITY: usize = 4096;

// Logging defaults
pub const DEFAULT_LOG_FILTER: &str = "stripeset_core=info,stripeset=info";
pub const DEFAULT_LOG_THREAD_IDS: bool = false;
