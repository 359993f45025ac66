use std::time::Instant;

use crate::stats::LinkHistory;
use crate::{Bitrate, PolicyConfig};

/// Added to the used bandwidth when it overrides a lagging estimate during a probe.
const USED_BANDWIDTH_OVERRIDE_BUFFER: Bitrate = Bitrate::kbps(100);

/// Loss at or above this while probing means the used bandwidth can't be trusted.
const SPURIOUS_PACKETS_LOST: u64 = 2;

/// Estimate drops below the previous target by more than this fraction are suspect.
const LARGE_RATE_CHANGE_TRIGGER: f64 = 0.2;

/// No subscription may exceed this.
const MAX_TARGET_RATE: Bitrate = Bitrate::kbps(15_000);

/// Turns the raw bandwidth estimate into the budget for one evaluation pass.
#[derive(Debug)]
pub(crate) struct TargetRate {
    startup: bool,
    first_estimate: Option<Instant>,
    using_prev: bool,
    prev: Bitrate,
}

impl TargetRate {
    pub fn new() -> Self {
        TargetRate {
            startup: true,
            first_estimate: None,
            using_prev: false,
            prev: Bitrate::ZERO,
        }
    }

    pub fn in_startup(&self) -> bool {
        self.startup
    }

    pub fn prev(&self) -> Bitrate {
        self.prev
    }

    pub fn set_prev(&mut self, v: Bitrate) {
        self.prev = v;
    }

    pub fn determine(
        &mut self,
        now: Instant,
        stats: &LinkHistory,
        probing: bool,
        config: &PolicyConfig,
    ) -> Bitrate {
        let cur = stats.current();
        let estimate = cur.bandwidth_estimate;
        let default = config.default_bandwidth;

        let mut target = if !estimate.is_zero() {
            let first = *self.first_estimate.get_or_insert(now);

            // The estimator takes a while to converge. Ignore it until it is above the
            // default, we see loss, or it stopped climbing after the startup period.
            if self.startup {
                let expired = now.saturating_duration_since(first) > config.startup_period;
                if estimate > default
                    || cur.has_loss()
                    || (expired && estimate <= stats.previous().bandwidth_estimate)
                {
                    info!("Startup period over, estimate: {}", estimate);
                    self.startup = false;
                    self.prev = estimate;
                }
            }

            if self.startup {
                default
            } else if probing
                && cur.used_bandwidth > estimate
                && cur.packets_lost < SPURIOUS_PACKETS_LOST
            {
                // Browser estimates lag the actual receive rate, which is what
                // tells us a probe worked.
                info!(
                    "Probing, override estimate {} with used bandwidth {}",
                    estimate, cur.used_bandwidth
                );
                cur.used_bandwidth + USED_BANDWIDTH_OVERRIDE_BUFFER
            } else {
                estimate
            }
        } else if self.first_estimate.is_none() {
            default
        } else {
            self.prev
        };

        // Delay based estimators misread delay as imminent loss. Without actual loss a
        // large drop is a false positive.
        let false_positive = !self.startup
            && ((self.using_prev && estimate < self.prev)
                || estimate < self.prev * (1.0 - LARGE_RATE_CHANGE_TRIGGER)
                || estimate < cur.used_bandwidth * LARGE_RATE_CHANGE_TRIGGER)
            && !cur.has_loss();

        if false_positive {
            debug!("Ignore estimate {}, use previous target {}", estimate, self.prev);
            self.using_prev = true;
            target = self.prev;
        } else {
            self.using_prev = false;
        }

        if target > MAX_TARGET_RATE {
            warn!(
                "Target {} exceeds maximum {}, limit target sizes in preferences",
                target, MAX_TARGET_RATE
            );
            target = MAX_TARGET_RATE;
        }

        target
    }
}
