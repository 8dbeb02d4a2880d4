//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// What a drain does when an event item panics.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the panic unwind out of the drain. Items of the batch that did not
    /// run are put back at the front of the queue for the next drain.
    #[default]
    Propagate,
    /// Catch the panic, log it, and keep running the rest of the batch.
    CatchAndLog,
}

/// Configuration for [`HookRuntime`](crate::runtime::HookRuntime) and the
/// event queues it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub failure_policy: FailurePolicy,
    /// Reject drains from any thread other than the first one that drained
    pub strict_consumer: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            strict_consumer: true,
        }
    }
}

impl RuntimeConfig {
    /// Create a new configuration builder
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

/// Builder for RuntimeConfig
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    failure_policy: Option<FailurePolicy>,
    strict_consumer: Option<bool>,
}

impl RuntimeConfigBuilder {
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn strict_consumer(mut self, enabled: bool) -> Self {
        self.strict_consumer = Some(enabled);
        self
    }

    pub fn build(self) -> RuntimeConfig {
        let default = RuntimeConfig::default();
        RuntimeConfig {
            failure_policy: self.failure_policy.unwrap_or(default.failure_policy),
            strict_consumer: self.strict_consumer.unwrap_or(default.strict_consumer),
        }
    }
}
