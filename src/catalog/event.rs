use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{AttendeeId, Bitrate, GroupId, Ssrc, StreamId};

/// Kind of media a source carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

/// One remote source as announced by signaling. One per simulcast layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSource {
    pub stream_id: StreamId,
    pub group_id: GroupId,
    pub attendee_id: AttendeeId,
    pub media_kind: MediaKind,
    /// Encoder ceiling for this layer.
    pub max_bitrate: Bitrate,
    pub max_frame_rate: u32,
    pub width: u32,
    pub height: u32,
}

impl StreamSource {
    /// A video layer without resolution information.
    pub fn video(
        stream_id: impl Into<StreamId>,
        group_id: impl Into<GroupId>,
        attendee_id: impl Into<AttendeeId>,
        max_bitrate: Bitrate,
    ) -> Self {
        StreamSource {
            stream_id: stream_id.into(),
            group_id: group_id.into(),
            attendee_id: attendee_id.into(),
            media_kind: MediaKind::Video,
            max_bitrate,
            max_frame_rate: 15,
            width: 0,
            height: 0,
        }
    }

    pub fn with_layer(mut self, width: u32, height: u32, max_frame_rate: u32) -> Self {
        self.width = width;
        self.height = height;
        self.max_frame_rate = max_frame_rate;
        self
    }
}

/// Full replacement of the remote stream index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexUpdate {
    pub sources: Vec<StreamSource>,
    /// The meeting is at its video publishing capacity.
    pub at_capacity: bool,
    /// Streams whose sender has paused them.
    pub paused_at_source: BTreeSet<StreamId>,
}

impl IndexUpdate {
    pub fn new(sources: Vec<StreamSource>) -> Self {
        IndexUpdate {
            sources,
            ..Default::default()
        }
    }
}

/// Average bitrate of one stream in a bitrate report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamBitrate {
    pub stream_id: StreamId,
    pub avg_bitrate_bps: u64,
}

impl StreamBitrate {
    pub fn new(stream_id: impl Into<StreamId>, avg_bitrate_bps: u64) -> Self {
        StreamBitrate {
            stream_id: stream_id.into(),
            avg_bitrate_bps,
        }
    }
}

/// Transport track to stream mapping from a subscribe ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMapping {
    pub track_label: String,
    pub stream_id: StreamId,
    pub ssrc: Ssrc,
}

/// Stream id allocated by the server to one of our own uplink layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAllocation {
    pub group_id: GroupId,
    pub stream_id: StreamId,
}

/// Server acknowledgement of a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeAck {
    pub tracks: Vec<TrackMapping>,
    /// Allocations for local layers, in layer order.
    pub allocations: Vec<StreamAllocation>,
}

/// One uplink encoding as decided by the uplink policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalEncoding {
    /// Zero means the layer is turned off.
    pub max_bitrate: Bitrate,
    pub max_frame_rate: u32,
}

impl LocalEncoding {
    pub fn new(max_bitrate: Bitrate, max_frame_rate: u32) -> Self {
        LocalEncoding {
            max_bitrate,
            max_frame_rate,
        }
    }
}
