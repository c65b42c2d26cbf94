use rand_core::Rng;
use std::{fmt, str::FromStr};

/// Probabilistic packet loss of a link.
///
/// Each packet crossing the link is dropped with the given probability.
///
/// ```
/// use cosim_core::measure::PacketLoss;
///
/// // link error rates come either as a probability or a percentage
/// let rate: PacketLoss = "0.05".parse().unwrap();
/// let pct: PacketLoss = "5%".parse().unwrap();
/// assert_eq!(rate, pct);
/// assert_eq!(rate.to_string(), "5%");
///
/// assert_eq!("0".parse::<PacketLoss>().unwrap(), PacketLoss::None);
/// ```
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub enum PacketLoss {
    /// every packet goes through (default)
    #[default]
    None,
    /// random loss, see [`PacketLoss::rate`]
    Rate(PacketLossRate),
}

/// A loss probability in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketLossRate(f64);

/// Error returned when constructing a [`PacketLossRate`] with a value
/// outside `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("packet loss rate must be in [0.0, 1.0], got {0}")]
pub struct PacketLossRateError(f64);

#[derive(Debug, Clone, thiserror::Error)]
pub enum PacketLossParseError {
    #[error("invalid packet loss `{0}'")]
    InvalidNumber(String),
    #[error("{0}")]
    OutOfRange(#[from] PacketLossRateError),
}

impl PacketLoss {
    /// # Errors
    ///
    /// if `rate` is not in `[0.0, 1.0]` (NaN included).
    pub fn rate(rate: f64) -> Result<Self, PacketLossRateError> {
        let rate = PacketLossRate::new(rate)?;
        if rate.0 == 0.0 {
            Ok(PacketLoss::None)
        } else {
            Ok(PacketLoss::Rate(rate))
        }
    }

    /// Draw whether a packet is lost.
    ///
    /// Randomness comes from the caller so that every draw of a run comes
    /// out of the single seeded generator owned by the network.
    pub fn should_drop<R: Rng>(&self, rng: &mut R) -> bool {
        match self {
            PacketLoss::None => false,
            PacketLoss::Rate(rate) => {
                let bits = rng.next_u64();
                let sample = (bits as f64) * (1.0 / (u64::MAX as f64 + 1.0));
                sample < rate.0
            }
        }
    }

    pub fn probability(&self) -> f64 {
        match self {
            PacketLoss::None => 0.0,
            PacketLoss::Rate(rate) => rate.0,
        }
    }
}

impl PacketLossRate {
    pub fn new(rate: f64) -> Result<Self, PacketLossRateError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(PacketLossRateError(rate));
        }
        Ok(Self(rate))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for PacketLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = self.probability() * 100.0;
        if pct.fract() == 0.0 {
            write!(f, "{}%", pct as u64)
        } else {
            write!(f, "{pct:.2}%")
        }
    }
}

impl FromStr for PacketLoss {
    type Err = PacketLossParseError;

    /// `"0.001"` as a probability or `"0.1%"` as a percentage
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (number, scale) = match trimmed.strip_suffix('%') {
            Some(pct) => (pct.trim(), 100.0),
            None => (trimmed, 1.0),
        };
        let value: f64 = number
            .parse()
            .map_err(|_| PacketLossParseError::InvalidNumber(s.to_owned()))?;

        Ok(PacketLoss::rate(value / scale)?)
    }
}
