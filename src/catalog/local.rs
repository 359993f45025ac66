use std::time::{Duration, Instant};

use serde::Serialize;

use super::bitrates::{BitrateArena, BitrateState};
use super::{LocalEncoding, StreamAllocation};
use crate::{Bitrate, GroupId, StreamId};

/// Interval at which the server sends bitrate reports.
const BITRATE_REPORT_INTERVAL: Duration = Duration::from_secs(4);

/// One of our own uplink simulcast layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalStream {
    /// Allocated by the server in a subscribe ack.
    pub stream_id: Option<StreamId>,
    pub group_id: Option<GroupId>,
    pub max_bitrate: Bitrate,
    pub max_frame_rate: u32,
    /// The uplink policy turned this layer off.
    pub disabled_by_uplink_policy: bool,
    /// The layer is on, but the browser stopped sending it.
    pub disabled_by_webrtc: bool,
    #[serde(skip)]
    time_enabled: Option<Instant>,
}

impl LocalStream {
    fn new(now: Instant, enc: &LocalEncoding) -> Self {
        let disabled = enc.max_bitrate.is_zero();
        LocalStream {
            stream_id: None,
            group_id: None,
            max_bitrate: enc.max_bitrate,
            max_frame_rate: enc.max_frame_rate,
            disabled_by_uplink_policy: disabled,
            disabled_by_webrtc: false,
            time_enabled: (!disabled).then_some(now),
        }
    }

    fn update(&mut self, now: Instant, enc: &LocalEncoding) {
        if self.max_bitrate.is_zero() && !enc.max_bitrate.is_zero() {
            self.time_enabled = Some(now);
        }
        self.max_bitrate = enc.max_bitrate;
        self.max_frame_rate = enc.max_frame_rate;
        self.disabled_by_uplink_policy = enc.max_bitrate.is_zero();
        if self.disabled_by_uplink_policy {
            self.disabled_by_webrtc = false;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LocalStreams {
    streams: Vec<LocalStream>,
    last_report: Option<Instant>,
}

impl LocalStreams {
    pub fn streams(&self) -> &[LocalStream] {
        &self.streams
    }

    /// Reuse existing layers in order, append new ones and drop the extras.
    pub fn apply_encodings(&mut self, now: Instant, encodings: &[LocalEncoding]) {
        // The first call establishes the baseline for the "recently enabled" check.
        self.last_report.get_or_insert(now);

        for (i, enc) in encodings.iter().enumerate() {
            if let Some(s) = self.streams.get_mut(i) {
                s.update(now, enc);
            } else {
                self.streams.push(LocalStream::new(now, enc));
            }
        }
        self.streams.truncate(encodings.len());
    }

    /// Assign server allocations to layers in order.
    pub fn apply_allocations(
        &mut self,
        allocations: &[StreamAllocation],
        arena: &mut BitrateArena,
    ) {
        if allocations.len() > self.streams.len() {
            info!(
                "Allocation has more streams ({}) than local layers ({})",
                allocations.len(),
                self.streams.len()
            );
        }
        for (s, a) in self.streams.iter_mut().zip(allocations) {
            s.group_id = Some(a.group_id);
            s.stream_id = Some(a.stream_id);
            arena.insert(a.stream_id);
        }
    }

    /// Flag layers the browser silently stopped sending.
    pub fn check_sending(&mut self, now: Instant, arena: &BitrateArena) {
        let last_report = self.last_report.unwrap_or(now);

        for s in &mut self.streams {
            s.disabled_by_webrtc = false;
            if s.disabled_by_uplink_policy {
                continue;
            }

            // Recently enabled layers get one report interval of grace.
            let enabled_long_ago = s
                .time_enabled
                .map(|t| last_report.saturating_duration_since(t) > BITRATE_REPORT_INTERVAL)
                .unwrap_or(false);

            let state = s.stream_id.and_then(|id| arena.get(id));
            let not_sending = matches!(state, None | Some(BitrateState::NotSending));

            if not_sending && enabled_long_ago {
                debug!("Local layer {:?} disabled by webrtc", s.stream_id);
                s.disabled_by_webrtc = true;
            }
        }

        self.last_report = Some(now);

        for s in &self.streams {
            trace!(
                "Local layer stream_id={:?} max={} disabled_by_webrtc={} disabled_by_uplink={}",
                s.stream_id,
                s.max_bitrate,
                s.disabled_by_webrtc,
                s.disabled_by_uplink_policy
            );
        }
    }
}
