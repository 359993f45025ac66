//! Catalog of remote and local video streams.
//!
//! The catalog is fed by three signaling events: the stream index (a full replacement
//! of the remote streams), periodic bitrate reports and subscribe acks. It keeps the
//! bitrate history of every indexed stream across index updates.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::util::Pii;
use crate::{AttendeeId, Bitrate, GroupId, Ssrc, StreamId};

mod bitrates;
pub use bitrates::BitrateState;
use bitrates::BitrateArena;

mod event;
pub use event::{IndexUpdate, LocalEncoding, MediaKind, StreamAllocation, StreamBitrate};
pub use event::{StreamSource, SubscribeAck, TrackMapping};

mod local;
pub use local::LocalStream;
use local::LocalStreams;

/// One simulcast layer of a remote sender's video.
///
/// Descriptors are rebuilt from the index and bitrate state on every query, never
/// updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_id: StreamId,
    /// Shared by all layers of the same source.
    pub group_id: GroupId,
    pub attendee_id: AttendeeId,
    /// Encoder ceiling for this layer.
    pub max_bitrate: Bitrate,
    /// Recent average. Zero when the stream is not actively reported.
    pub avg_bitrate: Bitrate,
    pub max_frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub disabled_by_webrtc: bool,
    pub disabled_by_uplink_policy: bool,
}

impl StreamDescriptor {
    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_content(&self) -> bool {
        self.attendee_id.is_content()
    }
}

/// Current view of streams in the meeting.
#[derive(Debug, Default)]
pub struct StreamCatalog {
    sources: Vec<StreamSource>,
    at_capacity: bool,
    paused_at_source: BTreeSet<StreamId>,
    bitrates: BitrateArena,
    track_to_stream: BTreeMap<String, StreamId>,
    ssrc_to_stream: BTreeMap<Ssrc, StreamId>,
    local: LocalStreams,
}

impl StreamCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote streams.
    ///
    /// Non-video sources are ignored. Bitrate state is kept for streams that remain.
    pub fn apply_index(&mut self, update: IndexUpdate) {
        let IndexUpdate {
            sources,
            at_capacity,
            paused_at_source,
        } = update;

        let sources: Vec<StreamSource> = sources
            .into_iter()
            .filter(|s| s.media_kind == MediaKind::Video)
            .collect();

        let ids: BTreeSet<StreamId> = sources.iter().map(|s| s.stream_id).collect();
        for id in &ids {
            self.bitrates.insert(*id);
        }
        // Local streams are not in the remote index, but their bitrates are reported.
        let keep: BTreeSet<StreamId> = ids
            .iter()
            .copied()
            .chain(self.local.streams().iter().filter_map(|s| s.stream_id))
            .collect();
        self.bitrates.expire_except(&keep);

        debug!(
            "Index update with {} video streams, at_capacity: {}, paused at source: {:?}",
            sources.len(),
            at_capacity,
            paused_at_source
        );

        self.sources = sources;
        self.at_capacity = at_capacity;
        self.paused_at_source = paused_at_source;
    }

    /// Apply a bitrate report.
    pub fn apply_bitrates(&mut self, now: Instant, report: &[StreamBitrate]) {
        self.bitrates.apply(report);
        self.local.check_sending(now, &self.bitrates);
    }

    /// Record track and ssrc mappings and local stream allocations.
    pub fn apply_subscribe_ack(&mut self, ack: SubscribeAck) {
        self.track_to_stream.clear();
        self.ssrc_to_stream.clear();

        for t in &ack.tracks {
            if t.track_label.is_empty() || *t.stream_id == 0 {
                continue;
            }
            self.track_to_stream.insert(t.track_label.clone(), t.stream_id);
            self.ssrc_to_stream.insert(t.ssrc, t.stream_id);
        }
        trace!("Track map: {:?}", self.track_to_stream);

        self.local
            .apply_allocations(&ack.allocations, &mut self.bitrates);
    }

    /// Apply the uplink policy's current encodings to our own layers.
    pub fn apply_uplink_encodings(&mut self, now: Instant, encodings: &[LocalEncoding]) {
        self.local.apply_encodings(now, encodings);
    }

    /// Whether there are any remote video streams.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// All remote video streams in index order.
    pub fn remote_streams(&self) -> Vec<StreamDescriptor> {
        self.sources.iter().map(|s| self.describe(s)).collect()
    }

    fn describe(&self, s: &StreamSource) -> StreamDescriptor {
        let avg_bitrate = self
            .bitrates
            .get(s.stream_id)
            .map(|b| b.avg_bitrate())
            .unwrap_or(Bitrate::ZERO);

        StreamDescriptor {
            stream_id: s.stream_id,
            group_id: s.group_id,
            attendee_id: s.attendee_id.clone(),
            max_bitrate: s.max_bitrate,
            avg_bitrate,
            max_frame_rate: s.max_frame_rate,
            width: s.width,
            height: s.height,
            disabled_by_webrtc: false,
            disabled_by_uplink_policy: false,
        }
    }

    /// Remote streams per attendee, each list sorted by ascending max bitrate.
    pub fn streams_grouped_by_attendee(&self) -> BTreeMap<AttendeeId, Vec<StreamDescriptor>> {
        let mut map: BTreeMap<AttendeeId, Vec<StreamDescriptor>> = BTreeMap::new();
        for s in &self.sources {
            map.entry(s.attendee_id.clone())
                .or_default()
                .push(self.describe(s));
        }
        for streams in map.values_mut() {
            streams.sort_by(|a, b| a.max_bitrate.total_cmp(&b.max_bitrate));
        }
        map
    }

    /// Remote streams not sent by the given attendee.
    pub fn streams_excluding_attendee(&self, attendee_id: &str) -> Vec<StreamDescriptor> {
        self.sources
            .iter()
            .filter(|s| &*s.attendee_id != attendee_id)
            .map(|s| self.describe(s))
            .collect()
    }

    pub fn all_stream_ids(&self) -> BTreeSet<StreamId> {
        self.sources.iter().map(|s| s.stream_id).collect()
    }

    /// Attendees sending video, in index order.
    pub fn attendees(&self) -> Vec<AttendeeId> {
        let mut seen = BTreeSet::new();
        self.sources
            .iter()
            .filter(|s| seen.insert(s.attendee_id.clone()))
            .map(|s| s.attendee_id.clone())
            .collect()
    }

    pub fn has_attendee(&self, attendee_id: &str) -> bool {
        self.sources.iter().any(|s| &*s.attendee_id == attendee_id)
    }

    pub fn attendee_for_stream(&self, stream_id: StreamId) -> Option<&AttendeeId> {
        self.sources
            .iter()
            .find(|s| s.stream_id == stream_id)
            .map(|s| &s.attendee_id)
    }

    /// The highest max bitrate layer of every group, excluding one attendee.
    pub fn highest_quality_per_group_excluding(&self, attendee_id: &str) -> BTreeSet<StreamId> {
        let mut best: BTreeMap<GroupId, &StreamSource> = BTreeMap::new();
        for s in self.sources.iter().filter(|s| &*s.attendee_id != attendee_id) {
            let e = best.entry(s.group_id).or_insert(s);
            if s.max_bitrate > e.max_bitrate {
                *e = s;
            }
        }
        best.values().map(|s| s.stream_id).collect()
    }

    /// Number of video sources, excluding one attendee.
    pub fn number_of_publishers_excluding(&self, attendee_id: &str) -> usize {
        self.highest_quality_per_group_excluding(attendee_id).len()
    }

    pub fn bitrate_state(&self, stream_id: StreamId) -> Option<BitrateState> {
        self.bitrates.get(stream_id)
    }

    pub fn stream_for_track(&self, track_label: &str) -> Option<StreamId> {
        self.track_to_stream.get(track_label).copied()
    }

    pub fn stream_for_ssrc(&self, ssrc: Ssrc) -> Option<StreamId> {
        self.ssrc_to_stream.get(&ssrc).copied()
    }

    pub fn attendee_for_track(&self, track_label: &str) -> Option<&AttendeeId> {
        let Some(stream_id) = self.stream_for_track(track_label) else {
            warn!("Track {} does not correspond to a known stream", track_label);
            return None;
        };
        let attendee = self.attendee_for_stream(stream_id);
        if attendee.is_none() {
            info!(
                "Track {} (stream {}) does not correspond to a known attendee",
                track_label, stream_id
            );
        }
        attendee
    }

    /// Whether the server can take no more video publishers. For the host, the policy
    /// does not act on it.
    pub fn is_at_capacity(&self) -> bool {
        self.at_capacity
    }

    /// Streams their sender paused. Informational for the host.
    pub fn paused_at_source(&self) -> &BTreeSet<StreamId> {
        &self.paused_at_source
    }

    pub fn local_streams(&self) -> &[LocalStream] {
        self.local.streams()
    }

    pub(crate) fn log_summary(&self) -> String {
        let mut s = String::new();
        for d in self.remote_streams() {
            s.push_str(&format!(
                "{{grp:{} str:{} att:{} max:{} avg:{}}} ",
                d.group_id,
                d.stream_id,
                Pii(&d.attendee_id),
                d.max_bitrate,
                d.avg_bitrate
            ));
        }
        s
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn src(id: u32, group: u32, att: &str, kbps: u64) -> StreamSource {
        StreamSource::video(id, group, att, Bitrate::kbps(kbps))
    }

    #[test]
    fn index_replaces_and_filters_audio() {
        let mut c = StreamCatalog::new();
        let mut audio = src(9, 9, "a", 32);
        audio.media_kind = MediaKind::Audio;

        c.apply_index(IndexUpdate::new(vec![
            src(1, 1, "a", 100),
            src(2, 1, "a", 300),
            audio,
        ]));
        assert_eq!(c.remote_streams().len(), 2);
        assert_eq!(c.bitrate_state(9.into()), None);
        assert_eq!(c.bitrate_state(1.into()), Some(BitrateState::Unseen));

        c.apply_index(IndexUpdate::new(vec![src(3, 2, "b", 100)]));
        assert_eq!(c.all_stream_ids(), [StreamId::from(3)].into_iter().collect());
        assert_eq!(c.bitrate_state(1.into()), None);
    }

    #[test]
    fn bitrate_history_survives_index() {
        let now = Instant::now();
        let mut c = StreamCatalog::new();
        c.apply_index(IndexUpdate::new(vec![src(1, 1, "a", 100)]));
        c.apply_bitrates(now, &[StreamBitrate::new(1, 80_000)]);
        c.apply_index(IndexUpdate::new(vec![src(1, 1, "a", 100), src(2, 1, "a", 300)]));

        let streams = c.remote_streams();
        assert_eq!(streams[0].avg_bitrate, Bitrate::kbps(80));
        assert_eq!(streams[1].avg_bitrate, Bitrate::ZERO);
    }

    #[test]
    fn grouped_sorted_by_max() {
        let mut c = StreamCatalog::new();
        c.apply_index(IndexUpdate::new(vec![
            src(2, 1, "a", 300),
            src(1, 1, "a", 100),
            src(3, 2, "b", 200),
        ]));
        let g = c.streams_grouped_by_attendee();
        let a: Vec<_> = g["a"].iter().map(|d| *d.stream_id).collect();
        assert_eq!(a, vec![1, 2]);
        assert_eq!(c.streams_excluding_attendee("a").len(), 1);
        assert_eq!(
            c.attendees(),
            vec![AttendeeId::new("a"), AttendeeId::new("b")]
        );
    }

    #[test]
    fn highest_per_group() {
        let mut c = StreamCatalog::new();
        c.apply_index(IndexUpdate::new(vec![
            src(1, 1, "a", 100),
            src(2, 1, "a", 300),
            src(3, 2, "b", 200),
            src(4, 3, "self", 200),
        ]));
        let ids = c.highest_quality_per_group_excluding("self");
        assert_eq!(ids, [2, 3].into_iter().map(StreamId::from).collect());
        assert_eq!(c.number_of_publishers_excluding("self"), 2);
    }

    #[test]
    fn subscribe_ack_mappings() {
        let mut c = StreamCatalog::new();
        c.apply_index(IndexUpdate::new(vec![src(5, 1, "a", 100)]));
        c.apply_subscribe_ack(SubscribeAck {
            tracks: vec![
                TrackMapping {
                    track_label: "t5".into(),
                    stream_id: 5.into(),
                    ssrc: 555.into(),
                },
                TrackMapping {
                    track_label: "".into(),
                    stream_id: 6.into(),
                    ssrc: 666.into(),
                },
                TrackMapping {
                    track_label: "t0".into(),
                    stream_id: 0.into(),
                    ssrc: 1.into(),
                },
            ],
            allocations: vec![],
        });
        assert_eq!(c.stream_for_track("t5"), Some(5.into()));
        assert_eq!(c.stream_for_ssrc(555.into()), Some(5.into()));
        assert_eq!(c.stream_for_ssrc(666.into()), None);
        assert_eq!(c.stream_for_track("t0"), None);
        assert_eq!(c.attendee_for_track("t5"), Some(&AttendeeId::new("a")));
        assert_eq!(c.attendee_for_track("nope"), None);
    }

    #[test]
    fn local_allocation_tracked_in_arena() {
        let now = Instant::now();
        let mut c = StreamCatalog::new();
        c.apply_uplink_encodings(now, &[LocalEncoding::new(Bitrate::kbps(300), 15)]);
        c.apply_subscribe_ack(SubscribeAck {
            tracks: vec![],
            allocations: vec![StreamAllocation {
                group_id: 7.into(),
                stream_id: 70.into(),
            }],
        });
        assert_eq!(c.bitrate_state(70.into()), Some(BitrateState::Unseen));
        assert_eq!(c.local_streams()[0].group_id, Some(7.into()));

        // A remote index does not expire our own allocation.
        c.apply_index(IndexUpdate::new(vec![src(1, 1, "a", 100)]));
        assert_eq!(c.bitrate_state(70.into()), Some(BitrateState::Unseen));
    }
}
