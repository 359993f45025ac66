use std::time::{Duration, Instant};

mod pii;

pub(crate) use pii::Pii;

/// Time elapsed since an optional timestamp. `None` when the timestamp was never set.
pub(crate) fn elapsed_since(now: Instant, since: Option<Instant>) -> Option<Duration> {
    since.map(|t| now.saturating_duration_since(t))
}
