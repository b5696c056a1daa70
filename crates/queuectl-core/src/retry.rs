//! Pure retry/backoff/DLQ decision function (spec §4.2).

use chrono::Duration;

/// Delays are clamped to this range to avoid degenerate configs (spec §4.2).
pub const MIN_DELAY_SECONDS: i64 = 1;
pub const MAX_DELAY_SECONDS: i64 = 24 * 60 * 60;

/// The outcome of [`decide`]: either retry after `delay`, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Dead,
}

/// `decide(attempts_after_failure, max_retries, backoff_base) -> Decision`
/// (spec §4.2).
///
/// `attempts_after_failure` is the post-increment attempt count; the first
/// failed attempt therefore passes `1` and waits `backoff_base^1` seconds.
/// A job with `max_retries = k` experiences at most `k + 1` total
/// executions (spec I4).
pub fn decide(attempts_after_failure: u32, max_retries: u32, backoff_base: u32) -> Decision {
    if attempts_after_failure > max_retries {
        return Decision::Dead;
    }
    let base = backoff_base.max(1) as i64;
    let exp = attempts_after_failure.min(62); // guard against i64 overflow in pow
    let raw_seconds = base.saturating_pow(exp);
    let clamped = raw_seconds.clamp(MIN_DELAY_SECONDS, MAX_DELAY_SECONDS);
    Decision::Retry {
        delay: Duration::seconds(clamped),
    }
}
