use std::time::Duration;

/// How delivered messages are handed to the registered callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageOptions {
    /// Settle messages as soon as the callback returns.
    pub auto_complete: bool,
    /// Upper bound on receives and callbacks in progress at once.
    pub max_concurrent_calls: usize,
}

impl std::default::Default for MessageOptions {
    fn default() -> Self {
        Self {
            auto_complete: true,
            max_concurrent_calls: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Pause after the first transient receive failure.
    pub retry_backoff_min: Duration,
    /// Consecutive failures double the pause up to this bound.
    pub retry_backoff_max: Duration,
}

impl std::default::Default for Timeouts {
    fn default() -> Self {
        Self {
            retry_backoff_min: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
        }
    }
}
