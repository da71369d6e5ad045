//! Engine configuration.

use crate::scripting::ScriptLimits;
use crate::storage::ExpiryConfig;
use std::time::Duration;

/// Tunables of one [`crate::Database`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Background expiry sweeper timing.
    pub expiry: ExpiryConfig,

    /// Per-subscriber queue capacity. Messages published to a full queue
    /// are dropped for that subscriber.
    pub pubsub_buffer: usize,

    /// Interpreter steps a single script run may take (0 = unlimited).
    pub script_step_limit: u64,

    /// Maximum nesting of script function calls.
    pub script_max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = ScriptLimits::default();
        Self {
            expiry: ExpiryConfig::default(),
            pubsub_buffer: 1024,
            script_step_limit: limits.max_steps,
            script_max_depth: limits.max_depth,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry.base_interval = interval;
        self.expiry.min_interval = self.expiry.min_interval.min(interval);
        self.expiry.max_interval = self.expiry.max_interval.max(interval);
        self
    }

    pub fn with_pubsub_buffer(mut self, capacity: usize) -> Self {
        self.pubsub_buffer = capacity.max(1);
        self
    }

    pub fn with_script_step_limit(mut self, steps: u64) -> Self {
        self.script_step_limit = steps;
        self
    }

    pub fn with_script_max_depth(mut self, depth: usize) -> Self {
        self.script_max_depth = depth.max(1);
        self
    }

    /// Limits handed to every script and function invocation.
    pub fn script_limits(&self) -> ScriptLimits {
        ScriptLimits {
            max_steps: self.script_step_limit,
            max_depth: self.script_max_depth,
        }
    }
}
