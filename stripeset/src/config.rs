//! CLI configuration: the core configuration plus a `[simulation]` section

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use stripeset_core::config::StripesetConfig;
use stripeset_core::{StripesetError, StripesetResult};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    #[serde(flatten)]
    pub stripeset: StripesetConfig,

    pub simulation: SimulationConfig,
}

impl CliConfig {
    /// Load from `path` when given, then apply `STRIPESET_*` overrides
    pub fn load(path: Option<&Path>) -> StripesetResult<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    StripesetError::io(format!("reading {}", path.display()), e.to_string())
                })?;
                toml::from_str(&contents)?
            }
            None => CliConfig::default(),
        };
        config.stripeset.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StripesetResult<()> {
        self.stripeset.validate()?;
        self.simulation.validate(self.stripeset.set.nodes)
    }
}

/// Workload and failure injection for `stripeset simulate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Files the workload spreads over
    pub files: usize,

    /// Operations issued per file
    pub operations: usize,

    /// Share of operations that are writes; the rest are lookups
    pub write_ratio: f64,

    /// Bytes per write
    pub write_size: usize,

    /// Base latency of every simulated node call
    #[serde(with = "humantime_serde")]
    pub latency: Duration,

    /// Random extra latency, up to this much
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,

    /// How long a simulated node blocks a lock request on a busy target
    #[serde(with = "humantime_serde")]
    pub lock_wait: Duration,

    /// Nodes that never answer
    pub unreachable: Vec<usize>,

    /// Nodes that answer every request with an I/O error
    pub failing: Vec<usize>,

    /// Nodes reported down to the set before the run
    pub down: Vec<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            files: 4,
            operations: 64,
            write_ratio: 0.5,
            write_size: 4096,
            latency: Duration::from_millis(1),
            jitter: Duration::from_millis(2),
            lock_wait: Duration::from_secs(1),
            unreachable: Vec::new(),
            failing: Vec::new(),
            down: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self, nodes: usize) -> StripesetResult<()> {
        if self.files == 0 {
            return Err(StripesetError::invalid_config(
                "simulation.files",
                self.files,
                "must be non-zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.write_ratio) {
            return Err(StripesetError::invalid_config(
                "simulation.write_ratio",
                self.write_ratio,
                "must be between 0 and 1",
            ));
        }
        let injected = [
            ("simulation.unreachable", &self.unreachable),
            ("simulation.failing", &self.failing),
            ("simulation.down", &self.down),
        ];
        for (field, list) in injected {
            if let Some(node) = list.iter().find(|&&node| node >= nodes) {
                return Err(StripesetError::invalid_config(
                    field,
                    node,
                    "node index out of range",
                ));
            }
        }
        Ok(())
    }
}
