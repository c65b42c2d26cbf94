use crate::time::{DurationParseError, SimDuration};
use std::{fmt, str::FromStr, time::Duration};

/// The propagation delay of a link, how long a bit takes to travel
/// from one end to the other.
///
/// # Default [`Latency`]
///
/// ```
/// # use cosim_core::measure::Latency;
/// assert_eq!(
///     Latency::default().to_string(),
///     "2ms"
/// )
/// ```
///
/// # about packets of `0` bytes size
///
/// The serialization of an empty payload takes no time, the [`Latency`]
/// is then the exact time it takes for it to reach the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Latency(SimDuration);

impl Latency {
    pub const ZERO: Self = Self(SimDuration::ZERO);

    /// create a new latency. Precise up to the micro seconds.
    #[inline(always)]
    pub const fn new(duration: SimDuration) -> Self {
        Self(duration)
    }

    #[inline(always)]
    pub fn as_duration(self) -> SimDuration {
        self.0
    }
}

impl From<Duration> for Latency {
    fn from(value: Duration) -> Self {
        Self(SimDuration::from(value))
    }
}

impl From<Latency> for SimDuration {
    fn from(value: Latency) -> Self {
        value.0
    }
}

impl Default for Latency {
    fn default() -> Self {
        crate::defaults::DEFAULT_LINK_DELAY
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Latency {
    type Err = DurationParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SimDuration::from_str(s).map(Self)
    }
}
