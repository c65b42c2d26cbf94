use cosim_core::{
    NodeId, SimDuration, SimTime,
    network::Payload,
    scheduler::EventId,
};
use std::{
    collections::{HashSet, VecDeque},
    fmt,
    str::FromStr,
};
use thiserror::Error;

/// Time before an unacknowledged segment is sent again.
pub const RETRANSMIT_TIMEOUT: SimDuration = SimDuration::from_secs(1);

/// A segment is given up after that many retransmissions.
pub const MAX_RETRANSMISSIONS: u32 = 5;

/// Transport flavour of the applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// connection oriented: handshake, acknowledgements, retransmissions
    #[default]
    Tcp,
    /// fire and forget
    Udp,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown protocol `{0}', expecting `tcp' or `udp'")]
pub struct ProtocolParseError(String);

/// Index of a connection in the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(usize);

/// What is carried over the network between two applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Syn {
        conn: ConnectionId,
    },
    SynAck {
        conn: ConnectionId,
    },
    Data {
        conn: ConnectionId,
        seq: u64,
        eid: String,
        /// `value&send_time_ms`
        message: String,
    },
    Ack {
        conn: ConnectionId,
        seq: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// waiting for the start time
    Idle,
    Connecting,
    Established,
    /// the handshake was given up, values sent from now on are lost
    Failed,
}

/// A value handed over to the client application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub eid: String,
    pub value: String,
}

/// A data segment that has not been acknowledged yet.
pub struct Unacked {
    pub eid: String,
    pub message: String,
    pub retransmissions: u32,
    pub timer: EventId,
}

/// The sending end of a connection, installed on the client node.
pub struct ClientApp {
    pub conn: ConnectionId,
    pub client: NodeId,
    pub server: NodeId,
    pub state: ClientState,

    next_seq: u64,
    /// sends issued before the connection is established
    pub backlog: VecDeque<Outgoing>,
    pub unacked: Vec<(u64, Unacked)>,

    pub handshake_timer: Option<EventId>,
    pub handshake_attempts: u32,
}

/// The receiving application, one per server node.
#[derive(Default)]
pub struct ServerApp {
    accepted: HashSet<ConnectionId>,
    delivered: HashSet<(ConnectionId, u64)>,
}

impl FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(ProtocolParseError(s.to_owned())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

impl ConnectionId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl Segment {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Self::Syn { conn }
            | Self::SynAck { conn }
            | Self::Data { conn, .. }
            | Self::Ack { conn, .. } => *conn,
        }
    }
}

impl Payload for Segment {
    fn bytes_size(&self) -> u64 {
        match self {
            Self::Data { message, .. } => message.len() as u64,
            Self::Syn { .. } | Self::SynAck { .. } | Self::Ack { .. } => 0,
        }
    }
}

/// `value&send_time_ms`
pub fn encode_message(value: &str, sent_at: SimTime) -> String {
    format!("{value}&{}", sent_at.as_millis())
}

/// Split a message at its last `&`, the value may itself contain some.
pub fn decode_message(message: &str) -> (&str, Option<u64>) {
    match message.rsplit_once('&') {
        Some((value, time)) => match time.parse() {
            Ok(time) => (value, Some(time)),
            Err(_) => (message, None),
        },
        None => (message, None),
    }
}

impl ClientApp {
    pub fn new(conn: ConnectionId, client: NodeId, server: NodeId) -> Self {
        Self {
            conn,
            client,
            server,
            state: ClientState::Idle,
            next_seq: 0,
            backlog: VecDeque::new(),
            unacked: Vec::new(),
            handshake_timer: None,
            handshake_attempts: 0,
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn take_unacked(&mut self, seq: u64) -> Option<Unacked> {
        let position = self.unacked.iter().position(|(s, _)| *s == seq)?;
        Some(self.unacked.swap_remove(position).1)
    }

    pub fn unacked_mut(&mut self, seq: u64) -> Option<&mut Unacked> {
        self.unacked
            .iter_mut()
            .find(|(s, _)| *s == seq)
            .map(|(_, unacked)| unacked)
    }
}

impl ServerApp {
    /// `false` if the connection was already accepted
    pub fn accept(&mut self, conn: ConnectionId) -> bool {
        self.accepted.insert(conn)
    }

    /// `false` if that segment was already delivered (a retransmission
    /// whose acknowledgement got lost)
    pub fn deliver(&mut self, conn: ConnectionId, seq: u64) -> bool {
        self.delivered.insert((conn, seq))
    }
}
