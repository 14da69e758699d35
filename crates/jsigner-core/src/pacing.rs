//! Speed presets and bounded polling.
//!
//! A [`Speed`] maps to a per-action delay unit. Every sleep, poll interval
//! and timeout downstream is expressed relative to that unit through a
//! [`Pacing`] value, which is passed explicitly to each component so that
//! concurrent jobs can run at different speeds.
//!
//! Configured timeouts are calibrated for [`Speed::Medium`] and scaled
//! proportionally for the other presets.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Delay unit for [`Speed::Fast`].
pub const FAST_UNIT: Duration = Duration::from_millis(250);

/// Delay unit for [`Speed::Medium`].
pub const MEDIUM_UNIT: Duration = Duration::from_millis(600);

/// Delay unit for [`Speed::Slow`].
pub const SLOW_UNIT: Duration = Duration::from_millis(1200);

/// Named delay preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    /// Short delays; suited to fast connections.
    Fast,
    /// Default preset.
    #[default]
    Medium,
    /// Long delays for slow connections.
    Slow,
}

impl Speed {
    /// Returns the preset name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
        }
    }

    /// Returns the per-action delay unit of this preset.
    #[must_use]
    pub const fn unit(&self) -> Duration {
        match self {
            Self::Fast => FAST_UNIT,
            Self::Medium => MEDIUM_UNIT,
            Self::Slow => SLOW_UNIT,
        }
    }

    /// Returns the pacing for this preset.
    #[must_use]
    pub const fn pacing(&self) -> Pacing {
        Pacing { speed: *self }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown speed name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown speed `{0}` (expected fast, medium or slow)")]
pub struct ParseSpeedError(String);

impl FromStr for Speed {
    type Err = ParseSpeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "rapido" => Ok(Self::Fast),
            "medium" | "medio" => Ok(Self::Medium),
            "slow" | "lento" => Ok(Self::Slow),
            other => Err(ParseSpeedError(other.to_string())),
        }
    }
}

/// Delay configuration threaded through every component of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    speed: Speed,
}

impl Pacing {
    /// Returns the preset this pacing was built from.
    #[must_use]
    pub const fn speed(&self) -> Speed {
        self.speed
    }

    /// Returns the base delay unit.
    #[must_use]
    pub const fn unit(&self) -> Duration {
        self.speed.unit()
    }

    /// Returns `factor` delay units.
    #[must_use]
    pub fn delay(&self, factor: f64) -> Duration {
        self.unit().mul_f64(factor)
    }

    /// Scales a timeout calibrated for [`Speed::Medium`] to this preset.
    #[must_use]
    pub fn scale(&self, base: Duration) -> Duration {
        base.mul_f64(self.unit().as_secs_f64() / MEDIUM_UNIT.as_secs_f64())
    }

    /// Sleeps for `factor` delay units.
    pub async fn pause(&self, factor: f64) {
        tokio::time::sleep(self.delay(factor)).await;
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Speed::default().pacing()
    }
}

/// Polls `check` every `interval` until it returns `true` or `timeout`
/// elapses.
///
/// The check is always evaluated at least once, and once more at the
/// deadline, so a zero timeout degenerates to a single check.
///
/// Returns `true` if the check succeeded within the timeout.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
