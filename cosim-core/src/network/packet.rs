use super::NodeId;
use crate::{defaults::DEFAULT_HEADER_BYTES, time::SimTime};
use anyhow::{Result, bail};
use std::fmt;

/// Anything that can be carried by a [`Packet`].
///
/// The size is what is accounted for on the wire, headers excluded.
pub trait Payload {
    fn bytes_size(&self) -> u64;
}

/// a generator for monotonicaly increasing **unique** [`PacketId`]
#[derive(Debug, Clone)]
pub struct PacketIdGenerator(u64);

/// Identifies a [`Packet`] for its whole journey through the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u64);

/// # A routed message
///
/// The payload with the end points of its journey, the time it was
/// handed over to the network and its size on the wire.
pub struct Packet<T> {
    id: PacketId,
    from: NodeId,
    to: NodeId,
    bytes_size: u64,
    sent_at: SimTime,
    data: T,
}

pub struct PacketBuilder<'a, T> {
    generator: &'a mut PacketIdGenerator,
    from: Option<NodeId>,
    to: Option<NodeId>,
    sent_at: SimTime,
    data: Option<T>,
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        Self(1)
    }

    /// generate a new unique identifier
    pub fn generate(&mut self) -> PacketId {
        let id = self.0;
        self.0 += 1;
        PacketId(id)
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> PacketBuilder<'a, T>
where
    T: Payload,
{
    pub fn new(generator: &'a mut PacketIdGenerator) -> Self {
        Self {
            generator,
            from: None,
            to: None,
            sent_at: SimTime::ZERO,
            data: None,
        }
    }

    pub fn from(mut self, from: NodeId) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: NodeId) -> Self {
        self.to = Some(to);
        self
    }

    pub fn sent_at(mut self, sent_at: SimTime) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn build(self) -> Result<Packet<T>> {
        let Some(from) = self.from else {
            bail!("Missing sender information (`from')")
        };
        let Some(to) = self.to else {
            bail!("Missing recipient information (`to')")
        };
        let Some(data) = self.data else {
            bail!("Missing packet content (`data')")
        };

        Ok(Packet {
            id: self.generator.generate(),
            from,
            to,
            bytes_size: data.bytes_size() + DEFAULT_HEADER_BYTES,
            sent_at: self.sent_at,
            data,
        })
    }
}

impl<T> Packet<T> {
    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    /// size on the wire, headers included
    pub fn bytes_size(&self) -> u64 {
        self.bytes_size
    }

    pub fn sent_at(&self) -> SimTime {
        self.sent_at
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: Payload> Packet<T> {
    pub fn builder(generator: &mut PacketIdGenerator) -> PacketBuilder<'_, T> {
        PacketBuilder::new(generator)
    }
}

impl Payload for () {
    fn bytes_size(&self) -> u64 {
        0
    }
}

impl Payload for String {
    fn bytes_size(&self) -> u64 {
        self.len() as u64
    }
}

impl Payload for Vec<u8> {
    fn bytes_size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T> fmt::Debug for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&format!("Packet<{}>", std::any::type_name::<T>()))
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("bytes_size", &self.bytes_size)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}
