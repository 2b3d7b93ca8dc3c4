use std::time::Duration;

/// Polling interval a backend is upgraded to when it has neither an
/// interval, nor watch, nor onetime configured.
pub(crate) const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Upper bound of the random delay before the initial convergence is
/// retried. Decorrelates retries across resources.
pub(crate) const RETRY_JITTER_MAX: Duration = Duration::from_secs(30);

/// Pause after a transient watch error before the watch is re-armed.
pub(crate) const WATCH_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Grace period between the kill signal and SIGKILL.
pub(crate) const DEFAULT_KILL_TIMEOUT_SECS: u64 = 10;

/// Queue depth of the per-resource backend error channel.
pub(crate) const ERROR_CHANNEL_CAPACITY: usize = 10;
