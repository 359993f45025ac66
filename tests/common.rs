#![allow(unused)]
use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::sync::Once;
use std::time::{Duration, Instant};

use downlink_adapt::*;

/// A policy driven by a synthetic clock.
pub struct TestPolicy {
    pub policy: DownlinkPolicy<MemoryTiles>,
    pub start: Instant,
    pub now: Instant,
}

impl TestPolicy {
    pub fn new() -> Self {
        Self::with_config(PolicyConfig::default())
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        let mut policy = DownlinkPolicy::with_config(config).expect("valid config");
        policy.bind_tiles(MemoryTiles::new());
        let now = Instant::now();
        TestPolicy {
            policy,
            start: now,
            now,
        }
    }

    pub fn duration(&self) -> Duration {
        self.now - self.start
    }

    pub fn advance(&mut self, d: Duration) {
        self.now += d;
    }

    /// Replace the index with `(stream, group, attendee, max kbps)` layers.
    pub fn index(&mut self, layers: &[(u32, u32, &str, u64)]) {
        let now = self.now;
        self.policy.update_catalog(now, index(layers));
    }

    /// Install explicit `(attendee, priority, size)` preferences.
    pub fn prefs(&mut self, prefs: &[(&str, u32, TargetSize)]) {
        let mut b = Preferences::builder();
        for (a, p, t) in prefs {
            b.add(Preference::new(*a, *p, *t));
        }
        let now = self.now;
        self.policy.set_preferences(now, b.build());
    }

    pub fn metrics(&mut self, estimate_kbps: f64, used_kbps: f64, lost: u64) {
        let now = self.now;
        self.policy
            .update_metrics(now, LinkStats::new(estimate_kbps, used_kbps, lost, 30));
    }

    /// Advance one second, feed metrics and resubscribe when asked to.
    pub fn tick(&mut self, estimate_kbps: f64, used_kbps: f64, lost: u64) {
        self.advance(Duration::from_secs(1));
        self.metrics(estimate_kbps, used_kbps, lost);
        self.resubscribe();
    }

    /// Commit the optimal set if it changed. Returns whether it did.
    pub fn resubscribe(&mut self) -> bool {
        if !self.policy.wants_resubscribe() {
            return false;
        }
        let now = self.now;
        self.policy.choose_subscriptions(now);
        true
    }

    /// Optimal stream ids in ascending order.
    pub fn chosen(&self) -> Vec<u32> {
        ids(&self.policy.optimal_receive_set().stream_ids())
    }

    pub fn subscribed_ids(&self) -> Vec<u32> {
        ids(self.policy.subscribed())
    }
}

impl Deref for TestPolicy {
    type Target = DownlinkPolicy<MemoryTiles>;

    fn deref(&self) -> &Self::Target {
        &self.policy
    }
}

impl DerefMut for TestPolicy {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.policy
    }
}

pub fn index(layers: &[(u32, u32, &str, u64)]) -> IndexUpdate {
    IndexUpdate::new(
        layers
            .iter()
            .map(|(id, group, att, kbps)| {
                StreamSource::video(*id, *group, *att, Bitrate::kbps(*kbps))
            })
            .collect(),
    )
}

pub fn ids(set: &BTreeSet<StreamId>) -> Vec<u32> {
    set.iter().map(|id| **id).collect()
}

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}
