use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential delay before retry `attempt` (1-based: 1 is the first
/// retry). With jitter enabled the delay is drawn uniformly from
/// [0, exponential] (full jitter); without it the exponential value is used
/// as-is, which keeps tests deterministic.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_backoff_ms as f64
        * config
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(config.max_backoff_ms as f64) as u64;

    let ms = if config.jitter {
        jitter_within(attempt, capped)
    } else {
        capped
    };

    Duration::from_millis(ms)
}

/// Hash-based uniform draw in [0, cap]. Cheap and dependency-free; this is
/// backoff spreading, not cryptography.
fn jitter_within(attempt: u32, cap: u64) -> u64 {
    use std::hash::{Hash, Hasher};

    if cap == 0 {
        return 0;
    }

    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (cap + 1)
}
