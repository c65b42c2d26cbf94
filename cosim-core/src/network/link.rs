use super::NodeId;
use crate::{
    measure::{DataRate, Latency, PacketLoss},
    time::SimTime,
};

/// Unique identifier of the link between two nodes
///
/// The link is bidirectional: the identifier `(n1, n2)` is the same
/// as the identifier `(n2, n1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId {
    smaller_id: NodeId,
    larger_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkDirection {
    /// from the smaller node id to the larger one
    Forward,
    Reverse,
}

/// A full duplex point to point link.
///
/// Both directions share the same measures but each has its own transmit
/// queue: a packet waits for the previous one in the same direction to be
/// fully serialized before being put on the wire.
#[derive(Debug, Clone)]
pub struct Link {
    rate: DataRate,
    delay: Latency,
    loss: PacketLoss,
    busy_until: [SimTime; 2],
}

/// Result of putting a packet on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// the packet reaches the other end at the given time
    Arrival(SimTime),
    /// the packet was lost on the way
    Dropped,
}

impl LinkId {
    pub fn new((a, b): (NodeId, NodeId)) -> Self {
        if a < b {
            Self {
                smaller_id: a,
                larger_id: b,
            }
        } else {
            Self {
                smaller_id: b,
                larger_id: a,
            }
        }
    }

    #[inline]
    pub fn into_nodes(self) -> (NodeId, NodeId) {
        (self.smaller_id, self.larger_id)
    }

    pub(crate) fn direction(from: NodeId, to: NodeId) -> LinkDirection {
        if from < to {
            LinkDirection::Forward
        } else {
            LinkDirection::Reverse
        }
    }
}

impl LinkDirection {
    fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }
}

impl Link {
    pub fn new(rate: DataRate, delay: Latency, loss: PacketLoss) -> Self {
        Self {
            rate,
            delay,
            loss,
            busy_until: [SimTime::ZERO; 2],
        }
    }

    pub fn rate(&self) -> DataRate {
        self.rate
    }

    pub fn delay(&self) -> Latency {
        self.delay
    }

    pub fn loss(&self) -> PacketLoss {
        self.loss
    }

    /// Put `bytes` on the link at `now`.
    ///
    /// The transmission starts once the direction's queue is free and the
    /// queue stays busy for the serialization time, whether the packet is
    /// lost or not.
    pub(crate) fn transmit<R: rand_core::Rng>(
        &mut self,
        now: SimTime,
        direction: LinkDirection,
        bytes: u64,
        rng: &mut R,
    ) -> Transmission {
        let busy_until = &mut self.busy_until[direction.index()];

        let departure = now.max(*busy_until);
        let serialized = departure + self.rate.transmission_time(bytes);
        *busy_until = serialized;

        if self.loss.should_drop(rng) {
            Transmission::Dropped
        } else {
            Transmission::Arrival(serialized + self.delay.as_duration())
        }
    }
}
