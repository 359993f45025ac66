//! Priority based downlink bandwidth policy.
//!
//! The policy decides which remote simulcast layers to receive. Every input (a catalog
//! change, a bitrate report, link stats or new preferences) triggers an evaluation
//! pass:
//!
//! 1. Determine the target rate from the bandwidth estimate.
//! 2. Keep the previous result if nothing structural changed and the last
//!    subscription change is too recent.
//! 3. Allocate the target rate band by band in priority order.
//! 4. Probe for headroom by speculatively upgrading one stream when the selection
//!    has been stable.
//! 5. Pause the tiles of attendees we can't afford any stream for.
//!
//! The policy never reads a clock. All time is passed in.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::catalog::{IndexUpdate, LocalEncoding, StreamBitrate, StreamCatalog};
use crate::catalog::{StreamDescriptor, SubscribeAck};
use crate::config::MIN_SUBSCRIBE_DELAY;
use crate::observer::Observers;
use crate::stats::LinkHistory;
use crate::util::{elapsed_since, Pii};
use crate::{AttendeeId, Bitrate, ConfigError, DownlinkObserver, LinkStats};
use crate::{ObserverId, PolicyConfig, Preferences, StreamId, TileBinder};

mod allocate;
use allocate::Rates;

mod filter;

mod gate;
use gate::TrendTracker;

mod pause;

mod probe;
pub use probe::RateProbeState;
use probe::{ProbeControl, UseReceiveSet};

mod target;
use target::TargetRate;

/// Target rate at or below which the anti thrash trigger doubles.
const LOW_BITRATE_THRESHOLD: Bitrate = Bitrate::kbps(300);

/// Target must move this much from the baseline before a new selection replaces
/// the previous one.
const TARGET_RATE_CHANGE_TRIGGER: f64 = 0.15;

/// A full state line is logged every this many passes.
const LOG_EVERY_PASSES: u64 = 15;

/// Output of the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimalReceiveSet {
    /// Chosen layers in allocation order.
    pub streams: Vec<StreamDescriptor>,
    /// Attendees with a preference we could not afford any stream for.
    pub bandwidth_paused: BTreeSet<AttendeeId>,
}

impl OptimalReceiveSet {
    pub fn stream_ids(&self) -> BTreeSet<StreamId> {
        self.streams.iter().map(|s| s.stream_id).collect()
    }
}

/// Downlink bandwidth policy for one meeting session.
///
/// ```
/// # use std::time::Instant;
/// # use downlink_adapt::*;
/// let mut policy: DownlinkPolicy<MemoryTiles> = DownlinkPolicy::new();
/// policy.bind_tiles(MemoryTiles::new());
///
/// let now = Instant::now();
/// policy.update_catalog(now, IndexUpdate::new(vec![
///     StreamSource::video(1, 1, "alice", Bitrate::kbps(100)),
///     StreamSource::video(2, 1, "alice", Bitrate::kbps(300)),
/// ]));
/// policy.update_metrics(now, LinkStats::new(2000.0, 0.0, 0, 30));
///
/// if policy.wants_resubscribe() {
///     let ids = policy.choose_subscriptions(now);
///     assert_eq!(ids.len(), 1);
/// }
/// ```
pub struct DownlinkPolicy<B> {
    config: PolicyConfig,
    tiles: Option<B>,
    observers: Observers,

    catalog: StreamCatalog,
    /// Set by the application.
    preferences: Option<Preferences>,
    /// Everyone at priority 1, used while `preferences` is not set.
    default_preferences: Preferences,
    preferences_updated: bool,

    stats: LinkHistory,
    trend: TrendTracker,
    target: TargetRate,
    probe: ProbeControl,
    /// Target rate the last selection change was made at.
    target_baseline: Option<Bitrate>,
    last_target: Bitrate,

    optimal: Vec<StreamDescriptor>,
    optimal_non_paused: Vec<StreamDescriptor>,
    subscribed: BTreeSet<StreamId>,
    subscribed_streams: Vec<StreamDescriptor>,
    /// Streams of tiles the application paused.
    app_paused: BTreeSet<StreamId>,
    /// Attendees we paused for bandwidth.
    bw_paused: BTreeSet<AttendeeId>,
    previous_with_preference: Option<Vec<StreamDescriptor>>,

    last_subscribe: Option<Instant>,
    base_subscribe_delay: Duration,
    log_count: u64,
}

impl<B: TileBinder> Default for DownlinkPolicy<B> {
    fn default() -> Self {
        Self::build(PolicyConfig::default())
    }
}

impl<B: TileBinder> DownlinkPolicy<B> {
    /// Create a policy with the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with a validated config.
    pub fn with_config(config: PolicyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: PolicyConfig) -> Self {
        DownlinkPolicy {
            probe: ProbeControl::new(&config),
            config,
            tiles: None,
            observers: Observers::default(),
            catalog: StreamCatalog::new(),
            preferences: None,
            default_preferences: Preferences::default(),
            preferences_updated: false,
            stats: LinkHistory::default(),
            trend: TrendTracker::default(),
            target: TargetRate::new(),
            target_baseline: None,
            last_target: Bitrate::ZERO,
            optimal: vec![],
            optimal_non_paused: vec![],
            subscribed: BTreeSet::new(),
            subscribed_streams: vec![],
            app_paused: BTreeSet::new(),
            bw_paused: BTreeSet::new(),
            previous_with_preference: None,
            last_subscribe: None,
            base_subscribe_delay: MIN_SUBSCRIBE_DELAY,
            log_count: 0,
        }
    }

    /// Return to the initial state.
    ///
    /// The catalog, tile binder and observers are kept. Explicit preferences are
    /// dropped.
    pub fn reset(&mut self) {
        info!("Reset downlink policy");
        // Paused tiles left behind would read as paused by the application.
        self.release_bw_paused();

        let config = self.config.clone();
        let tiles = self.tiles.take();
        let observers = std::mem::take(&mut self.observers);
        let catalog = std::mem::take(&mut self.catalog);

        *self = Self::build(config);
        self.tiles = tiles;
        self.observers = observers;
        self.catalog = catalog;
        self.update_default_preferences();
    }

    /// Bind the host's tiles. Replaces any previously bound binder.
    pub fn bind_tiles(&mut self, tiles: B) -> Option<B> {
        info!("Tile binder bound");
        self.tiles.replace(tiles)
    }

    pub fn tile_binder(&self) -> Option<&B> {
        self.tiles.as_ref()
    }

    pub fn tile_binder_mut(&mut self) -> Option<&mut B> {
        self.tiles.as_mut()
    }

    pub fn add_observer(&mut self, observer: impl DownlinkObserver + 'static) -> ObserverId {
        self.observers.add(Box::new(observer))
    }

    /// Returns whether an observer was removed.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Replace the remote stream index and re-evaluate.
    pub fn update_catalog(&mut self, now: Instant, update: IndexUpdate) {
        self.catalog.apply_index(update);
        if self.preferences.is_none() {
            self.update_default_preferences();
        }
        self.evaluate(now);
    }

    /// Apply a bitrate report and re-evaluate.
    pub fn update_bitrates(&mut self, now: Instant, report: &[StreamBitrate]) {
        self.catalog.apply_bitrates(now, report);
        self.evaluate(now);
    }

    /// Apply a subscribe ack. Only affects catalog mappings.
    pub fn update_subscribe_ack(&mut self, ack: SubscribeAck) {
        self.catalog.apply_subscribe_ack(ack);
    }

    /// Apply the uplink encodings to our own layers.
    pub fn update_uplink_encodings(&mut self, now: Instant, encodings: &[LocalEncoding]) {
        self.catalog.apply_uplink_encodings(now, encodings);
    }

    /// Ingest link stats and re-evaluate.
    ///
    /// Ignored until there are remote streams.
    pub fn update_metrics(&mut self, now: Instant, stats: LinkStats) {
        if self.catalog.is_empty() {
            trace!("Ignore metrics without remote streams");
            return;
        }
        self.stats.push(stats);
        self.trend.observe(stats.bandwidth_estimate);
        self.evaluate(now);
    }

    /// Install explicit preferences. Equal preferences are a no-op.
    pub fn set_preferences(&mut self, now: Instant, preferences: Preferences) {
        if self.preferences.as_ref() == Some(&preferences) {
            return;
        }
        info!("New preferences: {}", Pii(&preferences));
        self.preferences = Some(preferences);
        self.preferences_updated = true;
        self.evaluate(now);
    }

    /// Drop explicit preferences and go back to the derived default.
    pub fn clear_preferences(&mut self, now: Instant) {
        if self.preferences.take().is_none() {
            return;
        }
        info!("Preferences cleared, using default");
        self.update_default_preferences();
        self.preferences_updated = true;
        self.evaluate(now);
    }

    fn update_default_preferences(&mut self) {
        self.default_preferences = Preferences::all_high(&self.catalog.attendees());
    }

    /// Preferences in effect.
    pub fn preferences(&self) -> &Preferences {
        self.preferences.as_ref().unwrap_or(&self.default_preferences)
    }

    pub fn catalog(&self) -> &StreamCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Whether the optimal set differs from what was last subscribed.
    pub fn wants_resubscribe(&self) -> bool {
        self.optimal_ids() != self.subscribed
    }

    /// Commit the optimal set as subscribed and return it.
    pub fn choose_subscriptions(&mut self, now: Instant) -> BTreeSet<StreamId> {
        let ids = self.optimal_ids();
        if ids != self.subscribed {
            info!(
                "Subscribe {:?}, rate: {}",
                ids,
                self.subscribe_rate(&self.optimal)
            );
            self.last_subscribe = Some(now);
        }
        self.subscribed = ids.clone();
        self.subscribed_streams = self.optimal.clone();
        ids
    }

    pub fn optimal_receive_set(&self) -> OptimalReceiveSet {
        OptimalReceiveSet {
            streams: self.optimal.clone(),
            bandwidth_paused: self.bw_paused.clone(),
        }
    }

    fn optimal_ids(&self) -> BTreeSet<StreamId> {
        self.optimal.iter().map(|s| s.stream_id).collect()
    }

    /// Currently subscribed streams.
    pub fn subscribed(&self) -> &BTreeSet<StreamId> {
        &self.subscribed
    }

    pub fn bandwidth_paused(&self) -> &BTreeSet<AttendeeId> {
        &self.bw_paused
    }

    /// Streams excluded because the application paused their tile.
    pub fn app_paused_streams(&self) -> &BTreeSet<StreamId> {
        &self.app_paused
    }

    pub fn probe_state(&self) -> RateProbeState {
        self.probe.state()
    }

    /// Probe pending time required before the next probe.
    pub fn probe_interval(&self) -> Duration {
        self.probe.time_before_allow_probe()
    }

    /// Target rate of the last evaluation pass.
    pub fn target_rate(&self) -> Bitrate {
        self.last_target
    }

    pub fn in_startup(&self) -> bool {
        self.target.in_startup()
    }

    /// Minimum time between subscription changes right now.
    pub fn subscribe_delay(&self) -> Duration {
        let trend = self.trend.delay(&self.config, self.subscribed.len());
        self.base_subscribe_delay.max(trend)
    }

    /// Run one evaluation pass.
    pub fn evaluate(&mut self, now: Instant) {
        let remote = self.catalog.remote_streams();
        if remote.is_empty() || self.preferences().is_empty() {
            self.optimal.clear();
            self.optimal_non_paused.clear();
            self.release_bw_paused();
            return;
        }

        if self.tiles.is_none() {
            warn!("Tile binder not bound, skipping tile updates");
        }

        let prefs = self.preferences().clone();
        let last_probe_state = self.probe.state();

        self.clean_bw_paused_tiles(&remote, &prefs);
        let mut chosen = vec![];
        let remote = self.handle_app_paused_streams(remote, &mut chosen);

        let mut with_preference: Vec<StreamDescriptor> = remote
            .iter()
            .filter(|s| prefs.contains(&s.attendee_id))
            .cloned()
            .collect();

        let announced = with_preference.clone();
        let same_choices = !self.streams_with_preference_changed(&announced);
        let no_major_change = !self.target.in_startup() && same_choices;
        let since_subscribe = elapsed_since(now, self.last_subscribe);

        if no_major_change {
            if let Some(elapsed) = since_subscribe {
                if elapsed < self.subscribe_delay() {
                    trace!("Hold selection, {:?} since last subscribe", elapsed);
                    return;
                }
            }
        }

        with_preference.sort_by(|a, b| {
            a.max_bitrate
                .total_cmp(&b.max_bitrate)
                .then(a.stream_id.cmp(&b.stream_id))
        });
        filter::normalize(&mut with_preference);
        let candidates = filter::layer_paths(with_preference.clone(), &prefs);
        let candidate_ids: Vec<_> = candidates.iter().map(|s| s.stream_id).collect();
        trace!("Candidates: {:?}", candidate_ids);

        let target = self
            .target
            .determine(now, &self.stats, self.probe.is_probing(), &self.config);
        let mut rates = Rates::new(target);
        self.last_target = target;

        if self.probe.take_failed() {
            // The tripled delay has passed, allow probing again.
            self.base_subscribe_delay = MIN_SUBSCRIBE_DELAY;
            let trend_delay = self.trend.delay(&self.config, self.subscribed.len());
            let too_soon = since_subscribe.map(|e| e < trend_delay).unwrap_or(false);
            if no_major_change && too_soon {
                return;
            }
        }

        let upgrade = allocate::priority_policy(&mut rates, &candidates, &prefs, &mut chosen);

        let mut choice = UseReceiveSet::NewOptimal;
        if !self.target.in_startup() && same_choices {
            if self.probe.is_probing() {
                choice = self.handle_probe(now, &chosen, rates.target);
            } else if !rates.delta_to_next_upgrade.is_zero() {
                choice = self.maybe_override_or_probe(now, &mut chosen, &rates, upgrade);
            }
        } else {
            // Streams to choose from changed. Any probe is moot.
            self.probe.cancel();
        }

        self.previous_with_preference = Some(announced);
        self.preferences_updated = false;

        match choice {
            UseReceiveSet::PreviousOptimal => {
                debug!("Keep previous selection, stats: {:?}", self.stats.current());
                self.target.set_prev(rates.target);
                return;
            }
            UseReceiveSet::PreProbe => {
                let pre_probe = self.probe.pre_probe().to_vec();
                let non_paused = self.probe.pre_probe_non_paused().to_vec();
                self.optimal = pre_probe;
                self.optimal_non_paused = non_paused.clone();
                self.process_bw_paused(&with_preference, &non_paused, &prefs);
                info!(
                    "Revert to pre-probe selection, rate: {}",
                    self.subscribe_rate(&non_paused)
                );
                return;
            }
            UseReceiveSet::NewOptimal => {}
        }

        self.optimal_non_paused = chosen.clone();
        let last_paused = self.bw_paused.len();
        self.process_bw_paused(&with_preference, &chosen, &prefs);

        let selection_changed = self.optimal.len() != chosen.len();
        self.optimal = chosen;
        self.target.set_prev(rates.target);

        if self.log_count % LOG_EVERY_PASSES == 0
            || self.probe.state() != last_probe_state
            || selection_changed
            || last_paused != self.bw_paused.len()
        {
            self.log_state(&rates, &prefs);
            self.log_count = 0;
        }
        self.log_count += 1;
    }

    /// Handle a pass while probing.
    fn handle_probe(
        &mut self,
        now: Instant,
        chosen: &[StreamDescriptor],
        target: Bitrate,
    ) -> UseReceiveSet {
        if self.probe.timed_out(now, &self.config) {
            info!("Probe timed out");
            self.probe.cancel();
            return UseReceiveSet::NewOptimal;
        }

        let lost = self.stats.current().packets_lost;
        if lost > 0 {
            info!("Probe failed, packets lost: {}", lost);
            self.probe.fail();
            self.base_subscribe_delay = gate::penalize(self.base_subscribe_delay);
            debug!("Base subscribe delay now {:?}", self.base_subscribe_delay);
            return UseReceiveSet::PreProbe;
        }

        let subscribed_rate = self.subscribe_rate(&self.optimal);
        if self.chosen_same_as_last(chosen) || target > subscribed_rate {
            info!(
                "Probe successful, target: {} subscribed: {}",
                target, subscribed_rate
            );
            self.probe.succeed(&self.config);
            return UseReceiveSet::NewOptimal;
        }

        UseReceiveSet::PreviousOptimal
    }

    /// Keep the previous selection on small target moves, and move the probe
    /// state machine forward while the selection is stable.
    fn maybe_override_or_probe(
        &mut self,
        now: Instant,
        chosen: &mut Vec<StreamDescriptor>,
        rates: &Rates,
        upgrade: Option<StreamDescriptor>,
    ) -> UseReceiveSet {
        let same = self.chosen_same_as_last(chosen);
        let mut choice = UseReceiveSet::NewOptimal;

        let trigger = if rates.target > LOW_BITRATE_THRESHOLD {
            TARGET_RATE_CHANGE_TRIGGER
        } else {
            TARGET_RATE_CHANGE_TRIGGER * 2.0
        };
        let min_delta = rates.target * trigger;
        let baseline = *self.target_baseline.get_or_insert(self.target.prev());

        if !same && rates.target.abs_diff(baseline) < min_delta {
            debug!(
                "Reuse previous selection, target {} close to baseline {}",
                rates.target, baseline
            );
            choice = UseReceiveSet::PreviousOptimal;
        } else {
            self.target_baseline = Some(rates.target);
        }

        if self.stats.loss_increased() {
            self.probe.cancel();
            return choice;
        }

        if same || choice == UseReceiveSet::PreviousOptimal {
            match self.probe.state() {
                RateProbeState::NotProbing => self.probe.set_pending(now),
                RateProbeState::ProbePending => {
                    let started = self.probe.try_start(
                        now,
                        &self.config,
                        &self.subscribed_streams,
                        &self.optimal_non_paused,
                    );
                    if started {
                        if let Some(up) = upgrade {
                            upgrade_to_stream(chosen, up);
                        }
                        choice = UseReceiveSet::NewOptimal;
                    }
                }
                RateProbeState::Probing => {}
            }
        } else {
            self.probe.cancel();
        }

        choice
    }

    /// Max bitrate sum of the streams we actually receive.
    fn subscribe_rate(&self, streams: &[StreamDescriptor]) -> Bitrate {
        streams
            .iter()
            .filter(|s| !self.app_paused.contains(&s.stream_id))
            .filter(|s| !self.bw_paused.contains(&s.attendee_id))
            .map(|s| s.max_bitrate)
            .sum()
    }

    fn streams_with_preference_changed(&self, streams: &[StreamDescriptor]) -> bool {
        let Some(prev) = &self.previous_with_preference else {
            return true;
        };
        if self.preferences_updated || prev.len() != streams.len() {
            return true;
        }
        !streams.iter().all(|s| {
            prev.iter().any(|p| {
                p.group_id == s.group_id
                    && p.stream_id == s.stream_id
                    && p.max_bitrate == s.max_bitrate
            })
        })
    }

    fn chosen_same_as_last(&self, chosen: &[StreamDescriptor]) -> bool {
        self.optimal_non_paused.len() == chosen.len()
            && self
                .optimal_non_paused
                .iter()
                .all(|l| chosen.iter().any(|s| s.stream_id == l.stream_id))
    }

    fn log_state(&self, rates: &Rates, prefs: &Preferences) {
        let paused: Vec<_> = self.bw_paused.iter().map(Pii).collect();
        info!(
            "Policy target: {} subscribed: {} probe: {} startup: {} trend: {:?} prev: {:?} \
            now: {:?} remote: [{}] app paused: {:?} bw paused: {:?} preferences: {}{}",
            rates.target,
            self.subscribe_rate(&self.optimal),
            self.probe.state(),
            self.target.in_startup(),
            self.trend.trend(),
            self.stats.previous(),
            self.stats.current(),
            self.catalog.log_summary(),
            self.app_paused,
            paused,
            if self.preferences.is_some() { "" } else { "default " },
            Pii(prefs),
        );
    }
}

/// Replace the chosen layer of the same group, or add the stream.
fn upgrade_to_stream(chosen: &mut Vec<StreamDescriptor>, up: StreamDescriptor) {
    if let Some(existing) = chosen.iter_mut().find(|s| s.group_id == up.group_id) {
        let delta = up.avg_bitrate.saturating_sub(existing.avg_bitrate);
        info!(
            "Probe upgrade stream {} -> {} (+{})",
            existing.stream_id, up.stream_id, delta
        );
        *existing = up;
    } else {
        info!("Probe add stream {} (+{})", up.stream_id, up.avg_bitrate);
        chosen.push(up);
    }
}
