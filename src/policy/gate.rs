use std::time::Duration;

use crate::config::MIN_SUBSCRIBE_DELAY;
use crate::{Bitrate, PolicyConfig};

/// Base subscribe delay after a failed probe is capped at three times the ceiling.
pub(crate) const MAX_PENALTY_DELAY: Duration = Duration::from_millis(24_000);

/// Direction the bandwidth estimate last moved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Trend {
    #[default]
    Stable,
    Increasing,
    Decreasing,
}

/// Follows the estimate direction to pick between the recovery and response delay.
#[derive(Debug, Default)]
pub(crate) struct TrendTracker {
    trend: Trend,
    last_estimate: Option<Bitrate>,
}

impl TrendTracker {
    pub fn observe(&mut self, estimate: Bitrate) {
        if estimate.is_zero() {
            return;
        }
        if let Some(last) = self.last_estimate {
            let trend = if estimate > last {
                Trend::Increasing
            } else if estimate < last {
                Trend::Decreasing
            } else {
                self.trend
            };
            if trend != self.trend {
                debug!("Estimate trend {:?} -> {:?}", self.trend, trend);
                self.trend = trend;
            }
        }
        self.last_estimate = Some(estimate);
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    /// Delay before a subscription change given the current trend.
    pub fn delay(&self, config: &PolicyConfig, participants: usize) -> Duration {
        match self.trend {
            Trend::Stable => MIN_SUBSCRIBE_DELAY,
            Trend::Increasing => config.recovery_delay(),
            Trend::Decreasing => config.response_delay(participants),
        }
    }
}

/// Triple the base delay after a failed probe.
pub(crate) fn penalize(base: Duration) -> Duration {
    (base.max(MIN_SUBSCRIBE_DELAY) * 3).min(MAX_PENALTY_DELAY)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::MAX_SUBSCRIBE_DELAY;

    #[test]
    fn trend_follows_estimate() {
        let mut t = TrendTracker::default();
        t.observe(Bitrate::kbps(1000));
        assert_eq!(t.trend(), Trend::Stable);
        t.observe(Bitrate::kbps(800));
        assert_eq!(t.trend(), Trend::Decreasing);
        t.observe(Bitrate::kbps(800));
        assert_eq!(t.trend(), Trend::Decreasing);
        t.observe(Bitrate::ZERO);
        assert_eq!(t.trend(), Trend::Decreasing);
        t.observe(Bitrate::kbps(900));
        assert_eq!(t.trend(), Trend::Increasing);
    }

    #[test]
    fn asymmetric_delays() {
        let config = PolicyConfig::new(1.0, 0.0).unwrap();
        let mut t = TrendTracker::default();
        t.observe(Bitrate::kbps(1000));
        t.observe(Bitrate::kbps(500));
        assert_eq!(t.delay(&config, 10), MAX_SUBSCRIBE_DELAY);
        t.observe(Bitrate::kbps(900));
        assert_eq!(t.delay(&config, 10), MIN_SUBSCRIBE_DELAY);
    }

    #[test]
    fn penalty_saturates() {
        let mut d = MIN_SUBSCRIBE_DELAY;
        d = penalize(d);
        assert_eq!(d, Duration::from_secs(6));
        d = penalize(d);
        assert_eq!(d, Duration::from_secs(18));
        d = penalize(d);
        assert_eq!(d, MAX_PENALTY_DELAY);
        assert_eq!(penalize(d), MAX_PENALTY_DELAY);
    }
}
