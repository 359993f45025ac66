//! Downlink bandwidth adaptation for multi-party simulcast video.
//!
//! This is a [Sans I/O][sansio] implementation meaning the [`DownlinkPolicy`] does not
//! talk to the network, read the clock or spawn anything. All operations happen from
//! calls of the public API, and every call that depends on time takes a `now: Instant`.
//!
//! Every sender in a meeting publishes its video as a set of simulcast layers. The
//! policy picks, for every remote attendee, at most one layer to receive so that the
//! total fits the downlink bandwidth estimate. Attendees are served strictly in priority
//! order. When the budget runs out, lower priority attendees get their video tile
//! paused rather than a stream that would starve everyone else.
//!
//! # Usage
//!
//! The host owns a [`DownlinkPolicy`] and feeds it with signaling events and
//! link statistics. After each input it asks whether the set of streams to receive
//! changed, and if so, sends a new subscription to the media server.
//!
//! ```
//! # use std::time::{Duration, Instant};
//! # use downlink_adapt::*;
//! let mut policy = DownlinkPolicy::new();
//! policy.bind_tiles(MemoryTiles::new());
//!
//! let mut now = Instant::now();
//!
//! // The media server tells us which streams exist.
//! policy.update_catalog(now, IndexUpdate::new(vec![
//!     StreamSource::video(1, 1, "alice", Bitrate::kbps(150)),
//!     StreamSource::video(2, 1, "alice", Bitrate::kbps(1200)),
//!     StreamSource::video(3, 2, "bob", Bitrate::kbps(150)),
//!     StreamSource::video(4, 2, "bob", Bitrate::kbps(1200)),
//! ]));
//!
//! // Alice is the active speaker and should look good.
//! let mut prefs = Preferences::builder();
//! prefs
//!     .add(Preference::new("alice", 1, TargetSize::High))
//!     .add(Preference::new("bob", 2, TargetSize::Low));
//! policy.set_preferences(now, prefs.build());
//!
//! loop {
//!     // Once per second from the transport stats.
//!     policy.update_metrics(now, LinkStats::new(1500.0, 1300.0, 0, 40));
//!
//!     if policy.wants_resubscribe() {
//!         let streams = policy.choose_subscriptions(now);
//!         // Send subscribe for `streams`.
//!         # assert!(streams.contains(&StreamId::from(2)));
//!         # break;
//!     }
//!
//!     now += Duration::from_secs(1);
//! }
//! ```
//!
//! # Inputs
//!
//! * [`IndexUpdate`] replaces the set of remote streams.
//! * [`StreamBitrate`] reports carry the average bitrate each stream actually sends.
//!   Streams missing from reports decay through [`BitrateState`].
//! * [`SubscribeAck`] maps track labels and SSRCs to streams.
//! * [`LinkStats`] carry the bandwidth estimate and packet loss.
//! * [`Preferences`] say who to prioritize. Without them every attendee gets
//!   priority 1 and [`TargetSize::High`].
//!
//! # Outputs
//!
//! * [`DownlinkPolicy::choose_subscriptions`] returns the streams to subscribe.
//! * The bound [`TileBinder`] gets tiles paused and unpaused as attendees fall out
//!   of and back into the budget. [`DownlinkObserver`]s are told before each change.
//!
//! # Hysteresis
//!
//! Bandwidth estimates fluctuate. To avoid flapping between layers, the policy keeps
//! its previous selection when the target rate moved only a little, holds off new
//! subscriptions for a delay that depends on whether the network is getting better
//! or worse, and treats large estimate drops without loss as noise. See
//! [`PolicyConfig`] for the knobs.
//!
//! # Probing
//!
//! When the selection has been stable with an upgrade just out of reach, the policy
//! speculatively subscribes the upgrade. If it is received without loss, it is kept.
//! If loss appears, the policy reverts and waits longer before the next attempt. See
//! [`RateProbeState`].
//!
//! # Crate features
//!
//! * `pii` redacts attendee ids in logs.
//!
//! [sansio]: https://sans-io.readthedocs.io

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_range_contains)]

#[macro_use]
extern crate tracing;

mod bitrate;
pub use bitrate::Bitrate;

mod id;
pub use id::{AttendeeId, GroupId, ObserverId, Ssrc, StreamId, TileId, CONTENT_SUFFIX};

mod config;
pub use config::{ConfigError, PolicyConfig};

mod stats;
pub use stats::LinkStats;

mod preference;
pub use preference::{Degradation, Preference, Preferences, PreferencesBuilder, TargetSize};

mod catalog;
pub use catalog::{BitrateState, IndexUpdate, LocalEncoding, LocalStream, MediaKind};
pub use catalog::{StreamAllocation, StreamBitrate, StreamCatalog, StreamDescriptor};
pub use catalog::{StreamSource, SubscribeAck, TrackMapping};

mod tiles;
pub use tiles::{MemoryTiles, TileBinder, TileState};

mod observer;
pub use observer::DownlinkObserver;

mod policy;
pub use policy::{DownlinkPolicy, OptimalReceiveSet, RateProbeState};

mod util;
