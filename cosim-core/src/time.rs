use core::fmt;
use logos::{Lexer, Logos};
use std::{ops, str::FromStr, time};
use thiserror::Error;

/// An absolute instant on the simulated clock.
///
/// The clock ticks in microseconds and starts at [`SimTime::ZERO`]. The
/// orchestrator talks in milliseconds, see [`SimTime::from_millis`] and
/// [`SimTime::as_millis`] for the conversions at that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

/// A span of simulated time, with the same microsecond resolution
/// as [`SimTime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimDuration(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("Failed to parse duration `{0}'")]
    Lexer(String),
    #[error("Expecting duration to start with a number, cannot parse `{0}'")]
    ExpectingNumber(String),
    #[error("Expecting a unit after the number, cannot parse `{0}'")]
    ExpectingUnit(String),
    #[error("Empty duration")]
    Empty,
}

impl SimTime {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// whole milliseconds, rounded down
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000
    }

    #[must_use = "function does not modify the current value"]
    pub const fn saturating_add(self, duration: SimDuration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    #[must_use = "function does not modify the current value"]
    pub const fn saturating_sub(self, duration: SimDuration) -> Self {
        Self(self.0.saturating_sub(duration.0))
    }

    /// the span between `earlier` and `self`, zero if `earlier` is later
    pub const fn saturating_duration_since(self, earlier: Self) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl SimDuration {
    pub const ZERO: Self = Self(0);

    /// The smallest positive delay the kernel can express.
    pub const EPSILON: Self = Self(1);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn into_duration(self) -> time::Duration {
        time::Duration::from_micros(self.0)
    }
}

impl ops::Add<SimDuration> for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimDuration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl ops::Add for SimDuration {
    type Output = SimDuration;
    fn add(self, rhs: SimDuration) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl From<time::Duration> for SimDuration {
    fn from(value: time::Duration) -> Self {
        Self(value.as_micros().min(u64::MAX as u128) as u64)
    }
}

impl From<SimDuration> for time::Duration {
    fn from(value: SimDuration) -> Self {
        value.into_duration()
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}ms", self.0 / 1_000, self.0 % 1_000)
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <time::Duration as fmt::Debug>::fmt(&self.into_duration(), f)
    }
}

impl FromStr for SimDuration {
    type Err = DurationParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lex = Lexer::<'_, Token>::new(s);

        let mut total = 0u64;
        let mut parsed_any = false;

        while let Some(next) = lex.next() {
            let number = next.map_err(|()| DurationParseError::Lexer(s.to_owned()))?;
            if number != Token::Value {
                return Err(DurationParseError::ExpectingNumber(s.to_owned()));
            }
            let number: u64 = lex
                .slice()
                .parse()
                .map_err(|_| DurationParseError::ExpectingNumber(s.to_owned()))?;

            let Some(Ok(unit)) = lex.next() else {
                return Err(DurationParseError::ExpectingUnit(s.to_owned()));
            };
            let micros = match unit {
                Token::NanoSeconds => number / 1_000,
                Token::MicroSeconds => number,
                Token::MilliSeconds => number.saturating_mul(1_000),
                Token::Seconds => number.saturating_mul(1_000_000),
                Token::Minutes => number.saturating_mul(60_000_000),
                Token::Value => return Err(DurationParseError::ExpectingUnit(s.to_owned())),
            };
            total = total.saturating_add(micros);
            parsed_any = true;
        }

        if !parsed_any {
            return Err(DurationParseError::Empty);
        }

        Ok(Self(total))
    }
}

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\n\f]+")]
enum Token {
    #[token("ns")]
    NanoSeconds,
    #[regex("us|µs|μs")]
    MicroSeconds,
    #[token("ms")]
    MilliSeconds,
    #[token("s")]
    Seconds,
    #[token("min")]
    Minutes,

    #[regex("[0-9]+")]
    Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logos_lexer() {
        let mut lex = Token::lexer("2ms");

        assert_eq!(lex.next(), Some(Ok(Token::Value)));
        assert_eq!(lex.slice(), "2");

        assert_eq!(lex.next(), Some(Ok(Token::MilliSeconds)));
        assert_eq!(lex.span(), 1..3);
    }

    #[test]
    fn parse() {
        let duration: SimDuration = "123ms".parse().unwrap();
        assert_eq!(duration, SimDuration::from_millis(123));

        let duration: SimDuration = "1s 2000ms 3000000us".parse().unwrap();
        assert_eq!(duration, SimDuration::from_secs(6));

        let duration: SimDuration = "1500ns".parse().unwrap();
        assert_eq!(duration.as_micros(), 1);
    }

    #[test]
    fn parse_invalid() {
        assert_eq!("".parse::<SimDuration>(), Err(DurationParseError::Empty));
        assert!("12".parse::<SimDuration>().is_err());
        assert!("ms".parse::<SimDuration>().is_err());
        assert!("2 hours".parse::<SimDuration>().is_err());
    }

    #[test]
    fn millis_round_down() {
        assert_eq!(SimTime::from_micros(12_999).as_millis(), 12);
        assert_eq!(SimTime::from_millis(40).as_micros(), 40_000);
    }

    #[test]
    fn saturating() {
        assert_eq!(SimTime::MAX + SimDuration::from_secs(1), SimTime::MAX);
        assert_eq!(SimTime::ZERO.saturating_sub(SimDuration::EPSILON), SimTime::ZERO);
        assert_eq!(
            SimTime::from_millis(5).saturating_duration_since(SimTime::from_millis(9)),
            SimDuration::ZERO
        );
    }

    #[test]
    fn display() {
        assert_eq!(SimTime::from_micros(40_250).to_string(), "40.250ms");
        assert_eq!(SimDuration::from_millis(150).to_string(), "150ms");
    }
}
