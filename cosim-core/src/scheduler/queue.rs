use super::event::EventKey;
use core::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// The ordered event list the [`Simulator`] is built upon.
///
/// Only these primitives are needed by the kernel, which keeps the
/// bounded run loop independent of the data structure used underneath.
///
/// [`Simulator`]: super::Simulator
pub trait EventQueue<T>: Send {
    fn insert(&mut self, key: EventKey, item: T);

    /// remove and return the earliest event
    fn remove_next(&mut self) -> Option<(EventKey, T)>;

    /// the key of the earliest event, without removing it
    fn peek_next(&self) -> Option<&EventKey>;

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;
}

/// Binary heap based [`EventQueue`], the default one.
pub struct HeapQueue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
}

/// Ordered map based [`EventQueue`].
pub struct MapQueue<T> {
    map: BTreeMap<EventKey, T>,
}

struct Entry<T> {
    key: EventKey,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl<T> HeapQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }
}

impl<T> MapQueue<T> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }
}

impl<T: Send> EventQueue<T> for HeapQueue<T> {
    fn insert(&mut self, key: EventKey, item: T) {
        self.heap.push(Reverse(Entry { key, item }))
    }

    fn remove_next(&mut self) -> Option<(EventKey, T)> {
        self.heap
            .pop()
            .map(|Reverse(Entry { key, item })| (key, item))
    }

    #[inline]
    fn peek_next(&self) -> Option<&EventKey> {
        self.heap.peek().map(|entry| &entry.0.key)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    fn len(&self) -> usize {
        self.heap.len()
    }
}

impl<T: Send> EventQueue<T> for MapQueue<T> {
    fn insert(&mut self, key: EventKey, item: T) {
        let collision = self.map.insert(key, item);
        debug_assert!(
            collision.is_none(),
            "Collision of event uid (here: {}) shouldn't be possible",
            key.uid
        );
    }

    fn remove_next(&mut self) -> Option<(EventKey, T)> {
        self.map.pop_first()
    }

    #[inline]
    fn peek_next(&self) -> Option<&EventKey> {
        self.map.keys().next()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    fn len(&self) -> usize {
        self.map.len()
    }
}

impl<T> Default for HeapQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Default for MapQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimTime;

    fn key(ms: u64, uid: u64) -> EventKey {
        EventKey::new(SimTime::from_millis(ms), 0, uid)
    }

    fn exercise(queue: &mut dyn EventQueue<&'static str>) {
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.peek_next().is_none());
        assert!(queue.remove_next().is_none());

        queue.insert(key(20, 1), "twenty");
        queue.insert(key(5, 2), "five");
        queue.insert(key(20, 3), "twenty again");
        queue.insert(key(40, 4), "forty");

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.peek_next(), Some(&key(5, 2)));

        let order: Vec<_> = std::iter::from_fn(|| queue.remove_next())
            .map(|(_, item)| item)
            .collect();
        assert_eq!(order, ["five", "twenty", "twenty again", "forty"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn heap() {
        exercise(&mut HeapQueue::new());
    }

    #[test]
    fn map() {
        exercise(&mut MapQueue::new());
    }

    #[test]
    fn peek_does_not_remove() {
        let mut queue = HeapQueue::new();
        queue.insert(key(1, 1), ());

        assert!(queue.peek_next().is_some());
        assert!(queue.peek_next().is_some());
        assert_eq!(queue.len(), 1);
    }
}
