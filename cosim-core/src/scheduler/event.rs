use super::Simulator;
use crate::time::SimTime;
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// The context value of events scheduled outside of any node.
pub const NO_CONTEXT: u32 = u32::MAX;

/// The work carried by an event.
///
/// It is invoked exactly once, with the world the events act upon and the
/// [`Simulator`] so that it can schedule follow-up events.
pub type Action<W> = Box<dyn FnOnce(&mut W, &mut Simulator<W>) + Send + 'static>;

/// Ordering key of an event in the event list.
///
/// Events are ordered by timestamp; events sharing a timestamp are
/// ordered by their unique sequence number, i.e. by insertion order.
/// The context is carried along but takes no part in the ordering, nor
/// in the equality.
#[derive(Debug, Clone, Copy)]
pub struct EventKey {
    pub ts: SimTime,
    pub context: u32,
    pub uid: u64,
}

/// Handle on a scheduled event, used to cancel it or query its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(EventKey);

impl EventKey {
    pub const fn new(ts: SimTime, context: u32, uid: u64) -> Self {
        Self { ts, context, uid }
    }
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        self.ts == other.ts && self.uid == other.uid
    }
}

impl Eq for EventKey {}

impl Hash for EventKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ts.hash(state);
        self.uid.hash(state);
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ts.cmp(&other.ts).then(self.uid.cmp(&other.uid))
    }
}

impl EventId {
    pub(crate) const fn new(key: EventKey) -> Self {
        Self(key)
    }

    pub(crate) const fn key(&self) -> EventKey {
        self.0
    }

    #[inline]
    pub fn ts(&self) -> SimTime {
        self.0.ts
    }

    #[inline]
    pub fn context(&self) -> u32 {
        self.0.context
    }

    #[inline]
    pub fn uid(&self) -> u64 {
        self.0.uid
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.0.uid, self.0.ts)
    }
}
