use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::StreamBitrate;
use crate::{Bitrate, StreamId};

/// What we know about a stream's average bitrate.
///
/// Bitrate reports are sparse. A stream that goes missing from a report decays one
/// step per report instead of immediately being considered gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitrateState {
    /// Not reported yet, or missed in the last report.
    Unseen,
    /// Reported in the last report, in kbps.
    Active(u64),
    /// Missed two reports in a row.
    RecentlyInactive,
    /// Missed three reports in a row. The sender is considered off.
    NotSending,
}

impl BitrateState {
    /// Average bitrate to use for allocation. Only an active stream has one.
    pub fn avg_bitrate(&self) -> Bitrate {
        match self {
            BitrateState::Active(kbps) => Bitrate::kbps(*kbps),
            _ => Bitrate::ZERO,
        }
    }

    fn missed(self) -> Self {
        match self {
            BitrateState::Active(_) => BitrateState::Unseen,
            BitrateState::Unseen => BitrateState::RecentlyInactive,
            BitrateState::RecentlyInactive | BitrateState::NotSending => BitrateState::NotSending,
        }
    }
}

/// Stream id to bitrate arena.
///
/// Entries are inserted by the index and by subscribe acks, and expire when the index
/// no longer lists them.
#[derive(Debug, Clone, Default)]
pub(crate) struct BitrateArena {
    states: BTreeMap<StreamId, BitrateState>,
}

impl BitrateArena {
    /// Track a stream unless already tracked.
    pub fn insert(&mut self, id: StreamId) {
        self.states.entry(id).or_insert(BitrateState::Unseen);
    }

    /// Drop every stream not in `keep`.
    pub fn expire_except(&mut self, keep: &BTreeSet<StreamId>) {
        self.states.retain(|id, _| {
            let retain = keep.contains(id);
            if !retain {
                trace!("Expire bitrate state for stream {}", id);
            }
            retain
        });
    }

    /// Apply a bitrate report.
    pub fn apply(&mut self, report: &[StreamBitrate]) {
        let reported: BTreeSet<StreamId> = report.iter().map(|b| b.stream_id).collect();

        for b in report {
            let Some(state) = self.states.get_mut(&b.stream_id) else {
                trace!("Ignore bitrate for unknown stream {}", b.stream_id);
                continue;
            };
            // Truncated like the signaling layer reports it.
            *state = BitrateState::Active(b.avg_bitrate_bps / 1000);
        }

        for (id, state) in self.states.iter_mut() {
            if reported.contains(id) {
                continue;
            }
            let next = state.missed();
            if next != *state {
                trace!("Stream {} missing from bitrate report: {:?} -> {:?}", id, state, next);
            }
            *state = next;
        }
    }

    pub fn get(&self, id: StreamId) -> Option<BitrateState> {
        self.states.get(&id).copied()
    }
}
