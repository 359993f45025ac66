//! Downlink link statistics.

use serde::{Deserialize, Serialize};

use crate::Bitrate;

/// Downlink statistics in [`DownlinkPolicy::update_metrics`][crate::DownlinkPolicy::update_metrics].
///
/// The host produces one of these roughly every second from its transport stats.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkStats {
    /// Downlink bandwidth estimate of the receiving transport.
    pub bandwidth_estimate: Bitrate,
    /// What we actually received over video streams.
    pub used_bandwidth: Bitrate,
    /// Packets lost since the previous snapshot.
    pub packets_lost: u64,
    /// Round trip time.
    pub rtt_ms: u32,
}

impl LinkStats {
    /// Convenience constructor with kbps values as browsers report them.
    pub fn new(estimate_kbps: f64, used_kbps: f64, packets_lost: u64, rtt_ms: u32) -> Self {
        LinkStats {
            bandwidth_estimate: Bitrate::kbps_f64(estimate_kbps),
            used_bandwidth: Bitrate::kbps_f64(used_kbps),
            packets_lost,
            rtt_ms,
        }
    }

    pub fn has_loss(&self) -> bool {
        self.packets_lost > 0
    }
}

/// The current snapshot plus the one before it. Older snapshots are discarded.
#[derive(Debug, Clone, Default)]
pub(crate) struct LinkHistory {
    current: LinkStats,
    previous: LinkStats,
}

impl LinkHistory {
    pub fn push(&mut self, stats: LinkStats) {
        self.previous = self.current;
        self.current = stats;
    }

    pub fn current(&self) -> &LinkStats {
        &self.current
    }

    pub fn previous(&self) -> &LinkStats {
        &self.previous
    }

    /// Loss grew compared to the previous snapshot.
    pub fn loss_increased(&self) -> bool {
        self.current.packets_lost > self.previous.packets_lost
    }
}
