use crate::{
    measure::{DataRate, Latency},
    time::SimDuration,
};

/// Default link [`DataRate`]
///
/// ```
/// # use cosim_core::defaults::*;
/// assert_eq!(DEFAULT_LINK_RATE.to_string(), "1Mbps");
/// ```
pub const DEFAULT_LINK_RATE: DataRate = DataRate::from_bits_per_sec(1_000_000);

/// Default link [`Latency`]
///
/// ```
/// # use cosim_core::defaults::*;
/// assert_eq!(DEFAULT_LINK_DELAY.to_string(), "2ms");
/// ```
pub const DEFAULT_LINK_DELAY: Latency = Latency::new(SimDuration::from_millis(2));

/// Default seed of the packet loss generator
pub const DEFAULT_RANDOM_SEED: u64 = 0;

/// Size of the headers added to every segment put on the wire, on top
/// of the application payload.
pub const DEFAULT_HEADER_BYTES: u64 = 40;
