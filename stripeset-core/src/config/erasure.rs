//! Erasure set geometry

use serde::{Deserialize, Serialize};

use super::defaults::*;
use super::parse_env;
use crate::error::{StripesetError, StripesetResult};
use crate::mask::{NodeMask, MAX_NODES};

/// Node count, fragment threshold and membership of one erasure set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErasureConfig {
    /// Name used in logs
    pub name: String,

    /// Number of nodes holding fragments (N)
    pub nodes: usize,

    /// Fragments needed to reconstruct an object (K)
    pub fragments: usize,

    /// Configured members; all nodes when absent
    pub members: Option<Vec<usize>>,

    /// Schedule repairs when replies diverge
    pub auto_heal: bool,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SET_NAME.to_string(),
            nodes: DEFAULT_NODES,
            fragments: DEFAULT_FRAGMENTS,
            members: None,
            auto_heal: DEFAULT_AUTO_HEAL,
        }
    }
}

impl ErasureConfig {
    pub fn new(nodes: usize, fragments: usize) -> Self {
        Self {
            nodes,
            fragments,
            ..Self::default()
        }
    }

    /// Load erasure configuration from environment variables
    pub fn from_env() -> StripesetResult<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("STRIPESET_SET_NAME") {
            config.name = name;
        }
        if let Some(nodes) = parse_env("STRIPESET_NODES")? {
            config.nodes = nodes;
        }
        if let Some(fragments) = parse_env("STRIPESET_FRAGMENTS")? {
            config.fragments = fragments;
        }
        if let Some(auto_heal) = parse_env("STRIPESET_AUTO_HEAL")? {
            config.auto_heal = auto_heal;
        }

        Ok(config)
    }

    /// Configured membership as a mask
    pub fn node_mask(&self) -> NodeMask {
        match &self.members {
            Some(members) => NodeMask::from_nodes(members.iter().copied()) & NodeMask::first(self.nodes),
            None => NodeMask::first(self.nodes),
        }
    }

    pub fn validate(&self) -> StripesetResult<()> {
        if self.nodes == 0 || self.nodes > MAX_NODES {
            return Err(StripesetError::invalid_config(
                "set.nodes",
                self.nodes,
                "must be between 1 and 64",
            ));
        }
        if self.fragments == 0 || self.fragments > self.nodes {
            return Err(StripesetError::invalid_config(
                "set.fragments",
                self.fragments,
                "must be between 1 and set.nodes",
            ));
        }
        if let Some(members) = &self.members {
            if let Some(bad) = members.iter().find(|&&m| m >= self.nodes) {
                return Err(StripesetError::invalid_config(
                    "set.members",
                    bad,
                    "member index out of range",
                ));
            }
            if members.len() < self.fragments {
                return Err(StripesetError::configuration(
                    "set.members",
                    "fewer members than fragments",
                ));
            }
        }
        Ok(())
    }
}
