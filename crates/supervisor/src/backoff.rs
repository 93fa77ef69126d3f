use std::time::Duration;

use config::RestartConfig;

/// Delay before the next launch: `backoff_min * 2^(failures - 1)`, capped at `backoff_max`.
pub(crate) fn restart_delay(policy: &RestartConfig, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }

    let exp = (consecutive_failures - 1).min(30);

    policy
        .backoff_min
        .saturating_mul(1u32 << exp)
        .min(policy.backoff_max)
}
