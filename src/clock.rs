/// Time source and timer used by the reconciler
use std::time::Duration;

#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

/// Converts a duration to the millisecond scale of `Clock::now`.
pub fn as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
