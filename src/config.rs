use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Bitrate;

/// Floor of the subscribe delay.
pub(crate) const MIN_SUBSCRIBE_DELAY: Duration = Duration::from_millis(2000);

/// Ceiling of the subscribe delay derived from the network trend.
pub(crate) const MAX_SUBSCRIBE_DELAY: Duration = Duration::from_millis(8000);

/// Participant count at which the response delay is fully weighted.
const FULL_WEIGHT_PARTICIPANTS: usize = 10;

/// Errors from validating a [`PolicyConfig`].
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Delay factors interpolate between floor and ceiling and must be within 0..=1.
    #[error("{name} must be within [0, 1], got {value}")]
    FactorOutOfRange {
        /// Which factor.
        name: &'static str,
        /// The offending value.
        value: f64,
    },

    /// Probe interval floor above its ceiling.
    #[error("min probe interval {min:?} exceeds max probe interval {max:?}")]
    ProbeIntervalOrder {
        /// Configured floor.
        min: Duration,
        /// Configured ceiling.
        max: Duration,
    },
}

/// Customized config for creating a [`DownlinkPolicy`][crate::DownlinkPolicy].
///
/// ```
/// use downlink_adapt::{DownlinkPolicy, MemoryTiles, PolicyConfig};
///
/// let config = PolicyConfig::new(0.5, 0.2).unwrap();
/// let policy: DownlinkPolicy<MemoryTiles> = DownlinkPolicy::with_config(config).unwrap();
/// ```
///
/// Configs implement [`Clone`] to help create multiple policy instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub(crate) response_delay_factor: f64,
    pub(crate) recovery_delay_factor: f64,
    pub(crate) default_bandwidth: Bitrate,
    pub(crate) startup_period: Duration,
    pub(crate) min_probe_interval: Duration,
    pub(crate) max_probe_interval: Duration,
    pub(crate) max_probe_duration: Duration,
}

impl PolicyConfig {
    /// Creates a config with the given network issue response and recovery factors.
    ///
    /// Both factors are in `[0, 1]`. `0` means react after the minimum delay (2s),
    /// `1` means wait up to the maximum delay (8s).
    pub fn new(
        response_delay_factor: f64,
        recovery_delay_factor: f64,
    ) -> Result<Self, ConfigError> {
        let config = PolicyConfig {
            response_delay_factor,
            recovery_delay_factor,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reacts as fast as allowed to both drops and recoveries.
    ///
    /// This is the default.
    pub fn unstable_network() -> Self {
        PolicyConfig::default()
    }

    /// Waits the longest before reacting to estimate swings.
    pub fn stable_network() -> Self {
        PolicyConfig {
            response_delay_factor: 1.0,
            recovery_delay_factor: 1.0,
            ..Default::default()
        }
    }

    /// Check all values are in range.
    ///
    /// ```
    /// # use downlink_adapt::{PolicyConfig, ConfigError};
    /// let config = PolicyConfig::default().set_response_delay_factor(1.5);
    ///
    /// assert!(matches!(
    ///     config.validate(),
    ///     Err(ConfigError::FactorOutOfRange { name: "response_delay_factor", .. })
    /// ));
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_factor("response_delay_factor", self.response_delay_factor)?;
        check_factor("recovery_delay_factor", self.recovery_delay_factor)?;

        if self.min_probe_interval > self.max_probe_interval {
            return Err(ConfigError::ProbeIntervalOrder {
                min: self.min_probe_interval,
                max: self.max_probe_interval,
            });
        }

        Ok(())
    }

    /// How strongly we delay reacting to a falling estimate.
    pub fn response_delay_factor(&self) -> f64 {
        self.response_delay_factor
    }

    /// Set the network issue response delay factor.
    pub fn set_response_delay_factor(mut self, v: f64) -> Self {
        self.response_delay_factor = v;
        self
    }

    /// How strongly we delay reacting to a rising estimate.
    pub fn recovery_delay_factor(&self) -> f64 {
        self.recovery_delay_factor
    }

    /// Set the network issue recovery delay factor.
    pub fn set_recovery_delay_factor(mut self, v: f64) -> Self {
        self.recovery_delay_factor = v;
        self
    }

    /// Target rate used while the estimator converges.
    ///
    /// Defaults to 2800kbps.
    pub fn default_bandwidth(&self) -> Bitrate {
        self.default_bandwidth
    }

    /// Set the target rate used during startup.
    pub fn set_default_bandwidth(mut self, v: Bitrate) -> Self {
        self.default_bandwidth = v;
        self
    }

    /// How long after the first non-zero estimate we ignore the estimator.
    ///
    /// Defaults to 6s.
    pub fn startup_period(&self) -> Duration {
        self.startup_period
    }

    /// Set the startup period.
    pub fn set_startup_period(mut self, v: Duration) -> Self {
        self.startup_period = v;
        self
    }

    /// Time a probe must be pending before it starts. Doubles on every probe started
    /// and resets on success.
    ///
    /// Defaults to 5s.
    pub fn min_probe_interval(&self) -> Duration {
        self.min_probe_interval
    }

    /// Set the probe interval floor.
    pub fn set_min_probe_interval(mut self, v: Duration) -> Self {
        self.min_probe_interval = v;
        self
    }

    /// Ceiling of the probe interval backoff.
    ///
    /// Defaults to 60s.
    pub fn max_probe_interval(&self) -> Duration {
        self.max_probe_interval
    }

    /// Set the probe interval ceiling.
    pub fn set_max_probe_interval(mut self, v: Duration) -> Self {
        self.max_probe_interval = v;
        self
    }

    /// A probe that neither succeeds nor fails within this time is abandoned.
    ///
    /// Defaults to 60s.
    pub fn max_probe_duration(&self) -> Duration {
        self.max_probe_duration
    }

    /// Set the probe timeout.
    pub fn set_max_probe_duration(mut self, v: Duration) -> Self {
        self.max_probe_duration = v;
        self
    }

    /// Delay before another subscription change is allowed when the estimate is falling.
    ///
    /// Grows with the number of participants since a falling estimate with many
    /// streams makes for larger swings.
    pub(crate) fn response_delay(&self, participants: usize) -> Duration {
        let weight = participants.min(FULL_WEIGHT_PARTICIPANTS) as f64
            / FULL_WEIGHT_PARTICIPANTS as f64;
        interpolate(self.response_delay_factor * weight)
    }

    /// Delay before another subscription change is allowed when the estimate is rising.
    pub(crate) fn recovery_delay(&self) -> Duration {
        interpolate(self.recovery_delay_factor)
    }
}

fn interpolate(factor: f64) -> Duration {
    let range = MAX_SUBSCRIBE_DELAY - MIN_SUBSCRIBE_DELAY;
    let extra = range.mul_f64(factor.clamp(0.0, 1.0));
    (MIN_SUBSCRIBE_DELAY + extra).min(MAX_SUBSCRIBE_DELAY)
}

fn check_factor(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::FactorOutOfRange { name, value });
    }
    Ok(())
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            response_delay_factor: 0.0,
            recovery_delay_factor: 0.0,
            default_bandwidth: Bitrate::kbps(2800),
            startup_period: Duration::from_secs(6),
            min_probe_interval: Duration::from_secs(5),
            max_probe_interval: Duration::from_secs(60),
            max_probe_duration: Duration::from_secs(60),
        }
    }
}
