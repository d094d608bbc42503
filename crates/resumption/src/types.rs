//! Configuration and bookkeeping types for the execution driver

use std::fmt;
use std::num::NonZero;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult};

/// Unique identifier of one execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Defines the type of limit to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// There is no limit.
    #[default]
    None,

    /// There is an upper limit.
    Max(NonZero<usize>),

    /// Use the number of available cores.
    Default,
}

impl Limit {
    /// The concrete upper bound, `None` when unbounded
    pub fn resolve(self) -> Option<usize> {
        match self {
            Limit::None => None,
            Limit::Max(max) => Some(max.get()),
            Limit::Default => Some(num_cpus::get()),
        }
    }
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZero::new(value).map(Limit::Max).unwrap_or(Limit::None)
    }
}

/// Configuration for an execution context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of request retrievals running at once within a step
    pub max_concurrent_requests: Limit,

    /// Whether responses to idempotent requests are cached across steps
    pub enable_caching: bool,

    /// Whether identical idempotent requests within a step run only once
    pub enable_deduplication: bool,

    /// Whether a panicking retrieval becomes a failed response instead of unwinding
    pub catch_request_panics: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: Limit::None,
            enable_caching: true,
            enable_deduplication: true,
            catch_request_panics: true,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrent request retrievals
    pub fn with_max_concurrent_requests(mut self, max: usize) -> ConfigResult<Self> {
        let max = NonZero::new(max).ok_or(ConfigError::invalid_max_concurrent_requests(max))?;
        self.max_concurrent_requests = Limit::Max(max);
        Ok(self)
    }

    /// Remove the bound on concurrent request retrievals
    pub fn with_unlimited_requests(mut self) -> Self {
        self.max_concurrent_requests = Limit::None;
        self
    }

    /// Enable or disable the response cache
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    /// Enable or disable deduplication within a step
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.enable_deduplication = enabled;
        self
    }

    /// Enable or disable capturing panics of request retrievals
    pub fn with_panic_capture(mut self, enabled: bool) -> Self {
        self.catch_request_panics = enabled;
        self
    }

    /// Create a configuration for tests: one retrieval at a time, panics propagate
    pub fn for_testing() -> Self {
        Self {
            max_concurrent_requests: Limit::from(1),
            enable_caching: true,
            enable_deduplication: true,
            catch_request_panics: false,
        }
    }

    /// Create a configuration optimized for high-throughput scenarios
    pub fn for_high_throughput() -> Self {
        Self {
            max_concurrent_requests: Limit::from(num_cpus::get() * 4),
            ..Self::default()
        }
    }
}

/// Execution statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Total time spent executing steps
    pub total_duration: Duration,

    /// Number of steps executed
    pub steps: usize,

    /// Number of requests emitted by tasks
    pub requests_submitted: usize,

    /// Number of retrievals actually run
    pub requests_executed: usize,

    /// Requests answered from the response cache
    pub cache_hits: usize,

    /// Requests answered by an identical request in the same step
    pub deduplicated: usize,

    /// Requests whose preparation failed
    pub prepare_failures: usize,

    /// Retrievals that completed with a failure
    pub request_failures: usize,

    /// Number of times a mutation invalidated a data source
    pub invalidations: usize,
}

impl ExecutionStats {
    /// Share of submitted requests served from the cache
    pub fn cache_hit_rate(&self) -> Option<f64> {
        (self.requests_submitted > 0)
            .then(|| self.cache_hits as f64 / self.requests_submitted as f64)
    }

    /// Number of submitted requests that did not need their own retrieval
    pub fn saved_requests(&self) -> usize {
        self.cache_hits + self.deduplicated
    }
}
