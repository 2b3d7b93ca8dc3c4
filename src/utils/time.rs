use std::time::Duration;

use rand::Rng;

/// Uniformly random duration in `[0, max)`. Returns zero when `max` is
/// zero so callers can pass a disabled splay straight through.
pub fn random_duration(max: Duration) -> Duration {
    let millis = max.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}
