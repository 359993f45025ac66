use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::catalog::StreamDescriptor;
use crate::util::elapsed_since;
use crate::PolicyConfig;

/// State of the speculative upgrade probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RateProbeState {
    #[default]
    NotProbing,
    /// Selection has been stable with an unaffordable upgrade pending.
    ProbePending,
    /// One stream has been speculatively upgraded.
    Probing,
}

impl fmt::Display for RateProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateProbeState::NotProbing => "NotProbing",
            RateProbeState::ProbePending => "ProbePending",
            RateProbeState::Probing => "Probing",
        };
        write!(f, "{}", s)
    }
}

/// Which receive set an evaluation pass ends up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UseReceiveSet {
    NewOptimal,
    PreviousOptimal,
    PreProbe,
}

#[derive(Debug)]
pub(crate) struct ProbeControl {
    state: RateProbeState,
    pending_start: Option<Instant>,
    last_probe: Option<Instant>,
    /// How long a probe must be pending before it starts.
    time_before_allow_probe: Duration,
    /// Subscribed streams when the probe started.
    pre_probe: Vec<StreamDescriptor>,
    /// Chosen streams, without bandwidth paused ones, when the probe started.
    pre_probe_non_paused: Vec<StreamDescriptor>,
    failed: bool,
}

impl ProbeControl {
    pub fn new(config: &PolicyConfig) -> Self {
        ProbeControl {
            state: RateProbeState::NotProbing,
            pending_start: None,
            last_probe: None,
            time_before_allow_probe: config.min_probe_interval,
            pre_probe: vec![],
            pre_probe_non_paused: vec![],
            failed: false,
        }
    }

    pub fn state(&self) -> RateProbeState {
        self.state
    }

    pub fn is_probing(&self) -> bool {
        self.state == RateProbeState::Probing
    }

    pub fn time_before_allow_probe(&self) -> Duration {
        self.time_before_allow_probe
    }

    fn set_state(&mut self, state: RateProbeState) {
        if self.state == state {
            return;
        }
        info!("Probe state {} -> {}", self.state, state);
        self.state = state;
    }

    pub fn cancel(&mut self) {
        self.pending_start = None;
        self.set_state(RateProbeState::NotProbing);
    }

    pub fn set_pending(&mut self, now: Instant) {
        if self.state == RateProbeState::ProbePending {
            return;
        }
        self.pending_start = Some(now);
        self.set_state(RateProbeState::ProbePending);
    }

    /// Move from pending to probing if we have been pending long enough.
    ///
    /// Snapshots the receive set to return to should the probe fail.
    pub fn try_start(
        &mut self,
        now: Instant,
        config: &PolicyConfig,
        subscribed: &[StreamDescriptor],
        non_paused: &[StreamDescriptor],
    ) -> bool {
        if self.state != RateProbeState::ProbePending {
            return false;
        }
        let pending_for = elapsed_since(now, self.pending_start).unwrap_or_default();
        if pending_for <= self.time_before_allow_probe {
            trace!(
                "Probe pending for {:?}, need {:?}",
                pending_for,
                self.time_before_allow_probe
            );
            return false;
        }

        self.last_probe = Some(now);
        self.pre_probe = subscribed.to_vec();
        self.pre_probe_non_paused = non_paused.to_vec();
        self.time_before_allow_probe =
            (self.time_before_allow_probe * 2).min(config.max_probe_interval);
        self.set_state(RateProbeState::Probing);
        true
    }

    pub fn timed_out(&self, now: Instant, config: &PolicyConfig) -> bool {
        elapsed_since(now, self.last_probe)
            .map(|d| d > config.max_probe_duration)
            .unwrap_or(false)
    }

    pub fn succeed(&mut self, config: &PolicyConfig) {
        self.cancel();
        self.time_before_allow_probe = config.min_probe_interval;
    }

    pub fn fail(&mut self) {
        self.cancel();
        self.failed = true;
    }

    /// Whether the last probe failed. Clears the flag.
    pub fn take_failed(&mut self) -> bool {
        std::mem::replace(&mut self.failed, false)
    }

    pub fn pre_probe(&self) -> &[StreamDescriptor] {
        &self.pre_probe
    }

    pub fn pre_probe_non_paused(&self) -> &[StreamDescriptor] {
        &self.pre_probe_non_paused
    }
}
