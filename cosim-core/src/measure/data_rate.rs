use crate::time::SimDuration;
use logos::{Lexer, Logos};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The transmission rate of a link, in bits per second.
///
/// Rates use decimal multiples (`1kbps` is `1_000` bits per second) as
/// network equipment is rated.
///
/// ```
/// # use cosim_core::measure::DataRate;
/// let rate: DataRate = "1Mbps".parse().unwrap();
/// assert_eq!(rate.bits_per_sec(), 1_000_000);
/// assert_eq!(rate.to_string(), "1Mbps");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataRateParseError {
    #[error("Expecting data rate to start with a number, cannot parse `{0}'")]
    ExpectingNumber(String),
    #[error("Expecting a unit (bps, kbps, Mbps, Gbps) after the number, cannot parse `{0}'")]
    ExpectingUnit(String),
    #[error("Not expecting anything after the unit, cannot parse `{0}'")]
    Trailing(String),
}

const K: u64 = 1_000;
const M: u64 = 1_000 * K;
const G: u64 = 1_000 * M;

impl DataRate {
    /// unlimited rate, transmission takes no time
    pub const MAX: Self = Self(u64::MAX);

    pub const fn from_bits_per_sec(bps: u64) -> Self {
        Self(bps)
    }

    #[inline]
    pub const fn bits_per_sec(self) -> u64 {
        self.0
    }

    /// Time needed to put `bytes` on the wire, rounded up to the next
    /// microsecond.
    ///
    /// A zero rate never completes and yields the largest duration.
    ///
    /// ```
    /// # use cosim_core::{measure::DataRate, time::SimDuration};
    /// let rate = DataRate::from_bits_per_sec(8_000);
    /// assert_eq!(rate.transmission_time(1), SimDuration::from_millis(1));
    /// ```
    pub fn transmission_time(self, bytes: u64) -> SimDuration {
        if self.0 == 0 {
            return SimDuration::from_micros(u64::MAX);
        }
        if self.0 == u64::MAX {
            return SimDuration::ZERO;
        }

        let bits = bytes as u128 * 8;
        let micros = (bits * 1_000_000).div_ceil(self.0 as u128);
        SimDuration::from_micros(micros.min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v >= G && v % G == 0 {
            write!(f, "{}Gbps", v / G)
        } else if v >= M && v % M == 0 {
            write!(f, "{}Mbps", v / M)
        } else if v >= K && v % K == 0 {
            write!(f, "{}kbps", v / K)
        } else {
            write!(f, "{v}bps")
        }
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")]
enum DataRateToken {
    #[regex("bps|b/s")]
    Bps,
    #[regex("[kK]bps|[kK]b/s")]
    Kbps,
    #[regex("[mM]bps|Mb/s")]
    Mbps,
    #[regex("[gG]bps|Gb/s")]
    Gbps,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Value,
}

impl FromStr for DataRate {
    type Err = DataRateParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, DataRateToken>::new(s);

        let Some(Ok(DataRateToken::Value)) = lex.next() else {
            return Err(DataRateParseError::ExpectingNumber(s.to_owned()));
        };
        let number: f64 = lex
            .slice()
            .parse()
            .map_err(|_| DataRateParseError::ExpectingNumber(s.to_owned()))?;

        let multiplier = match lex.next() {
            Some(Ok(DataRateToken::Bps)) => 1,
            Some(Ok(DataRateToken::Kbps)) => K,
            Some(Ok(DataRateToken::Mbps)) => M,
            Some(Ok(DataRateToken::Gbps)) => G,
            _ => return Err(DataRateParseError::ExpectingUnit(s.to_owned())),
        };

        if lex.next().is_some() {
            return Err(DataRateParseError::Trailing(s.to_owned()));
        }

        Ok(Self((number * multiplier as f64) as u64))
    }
}

impl Default for DataRate {
    fn default() -> Self {
        crate::defaults::DEFAULT_LINK_RATE
    }
}
