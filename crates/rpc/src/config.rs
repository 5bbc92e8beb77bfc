//! Configuration for dispatchers, invokers and individual calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default window a call waits for its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of notifications buffered per subscription.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;

/// Configuration for the client-side [`Invoker`](crate::Invoker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// How long a call waits for its response before failing with a timeout.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    /// How many unread notifications a subscription holds before newer ones
    /// on its topic are dropped.
    pub subscription_capacity: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }
}

impl InvokerConfig {
    /// Set the call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-subscription notification buffer.
    #[must_use]
    pub const fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }
}

/// Configuration for the host-side [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Answer calls to unregistered methods with an `error` response instead of
    /// dropping them.
    ///
    /// Off by default: the caller then only learns about the mistake when its
    /// call times out.
    pub reply_to_unregistered: bool,
}

impl DispatcherConfig {
    /// Answer calls to unregistered methods with an error response.
    #[must_use]
    pub const fn reply_to_unregistered(mut self) -> Self {
        self.reply_to_unregistered = true;
        self
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides the invoker's timeout for this call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Use `timeout` for this call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
