//! Runner configuration.

use lockstep_core::{SchedulerKind, SimTime};
use std::num::NonZeroUsize;
use std::str::FromStr;
use thiserror::Error;

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Which simulator backend drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulatorKind {
    /// Single rank, worker threads only. Runs over the null transport.
    #[default]
    Multithreaded,
    /// Multiple ranks coupled by a message-passing transport, worker
    /// threads within each.
    Hybrid,
}

impl FromStr for SimulatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multithreaded" => Ok(SimulatorKind::Multithreaded),
            "hybrid" => Ok(SimulatorKind::Hybrid),
            other => Err(format!(
                "unknown simulator type {other:?} (expected multithreaded or hybrid)"
            )),
        }
    }
}

/// Tunables of the coordination core.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Upper bound on the worker pool size; the effective pool is
    /// `min(max_threads, lp_count)`.
    pub max_threads: usize,

    /// Minimum cross-LP link delay. Zero means "auto": the partitioner uses
    /// the median of this rank's point-to-point delays.
    pub min_lookahead: SimTime,

    /// Scheduler backend used by every logical process.
    pub scheduler: SchedulerKind,

    /// Simulator backend.
    pub kind: SimulatorKind,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let max_threads = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            max_threads,
            min_lookahead: SimTime::TICK,
            scheduler: SchedulerKind::default(),
            kind: SimulatorKind::default(),
        }
    }
}

impl SimulatorConfig {
    /// Create a builder with default values.
    pub fn builder() -> SimulatorConfigBuilder {
        SimulatorConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.min_lookahead.is_negative() {
            return Err(ConfigError::InvalidConfig(format!(
                "min_lookahead must not be negative, got {}",
                self.min_lookahead
            )));
        }
        Ok(())
    }
}

/// Builder for [`SimulatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfigBuilder {
    config: SimulatorConfig,
}

impl SimulatorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SimulatorConfig::default(),
        }
    }

    /// Set the worker pool bound.
    pub fn max_threads(mut self, count: usize) -> Self {
        self.config.max_threads = count;
        self
    }

    /// Set the minimum lookahead (zero selects the auto median).
    pub fn min_lookahead(mut self, lookahead: SimTime) -> Self {
        self.config.min_lookahead = lookahead;
        self
    }

    /// Set the per-LP scheduler backend.
    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.config.scheduler = kind;
        self
    }

    /// Set the simulator backend.
    pub fn kind(mut self, kind: SimulatorKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<SimulatorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
