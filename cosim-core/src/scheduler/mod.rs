/*!
# Incremental discrete event scheduler

The [`Simulator`] owns an ordered event list and a simulated clock. Unlike
a classic run-to-completion kernel it can be driven in bounded increments
with [`Simulator::run_until`], which is what the co-simulation step needs:
advance up to a ceiling, leave the clock there, then report the timestamp
of the next pending event with [`Simulator::next_time`].

Events act upon a world `W` that is passed alongside the simulator rather
than captured, so an event can both mutate the model and schedule
follow-up events.

```
use cosim_core::{scheduler::Simulator, time::{SimDuration, SimTime}};

let mut log = Vec::new();
let mut sim = Simulator::<Vec<u64>>::new();

for ms in [5, 20, 40] {
    sim.schedule(SimDuration::from_millis(ms), move |log, _| log.push(ms));
}

sim.run_until(&mut log, SimTime::from_millis(30));
assert_eq!(log, [5, 20]);
assert_eq!(sim.next_time(), Some(SimTime::from_millis(40)));
```
*/

mod event;
mod inject;
mod queue;

pub use self::{
    event::{Action, EventId, EventKey, NO_CONTEXT},
    inject::ContextInjector,
    queue::{EventQueue, HeapQueue, MapQueue},
};
use self::inject::Injected;
use crate::time::{SimDuration, SimTime};
use std::{collections::BTreeSet, sync::Arc};

pub struct Simulator<W> {
    events: Box<dyn EventQueue<Action<W>>>,
    destroy_events: Vec<(EventId, Action<W>)>,
    /// cancelled events not yet behind the clock
    cancelled: BTreeSet<EventKey>,
    injected: Arc<Injected<W>>,

    now: SimTime,
    current_context: u32,
    current_uid: u64,
    next_uid: u64,
    event_count: u64,
    stop: bool,
}

impl<W: 'static> Simulator<W> {
    pub fn new() -> Self {
        Self::with_queue(HeapQueue::new())
    }

    /// create a simulator on top of a specific event list implementation
    pub fn with_queue<Q>(queue: Q) -> Self
    where
        Q: EventQueue<Action<W>> + 'static,
    {
        Self {
            events: Box::new(queue),
            destroy_events: Vec::new(),
            cancelled: BTreeSet::new(),
            injected: Arc::new(Injected::new()),
            now: SimTime::ZERO,
            current_context: NO_CONTEXT,
            current_uid: 0,
            next_uid: 1,
            event_count: 0,
            stop: false,
        }
    }

    /// Replace the event list implementation.
    ///
    /// The events already scheduled are moved over to the new list.
    pub fn set_queue<Q>(&mut self, queue: Q)
    where
        Q: EventQueue<Action<W>> + 'static,
    {
        let mut previous = std::mem::replace(&mut self.events, Box::new(queue));
        while let Some((key, action)) = previous.remove_next() {
            self.events.insert(key, action);
        }
    }

    /// Get a [`ContextInjector`] to schedule events from other threads.
    pub fn injector(&self) -> ContextInjector<W> {
        ContextInjector::new(Arc::clone(&self.injected))
    }

    fn generate_uid(&mut self) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    fn insert(&mut self, ts: SimTime, context: u32, action: Action<W>) -> EventId {
        let key = EventKey::new(ts, context, self.generate_uid());
        self.events.insert(key, action);
        EventId::new(key)
    }

    /// schedule `action` after `delay`, in the current context
    pub fn schedule<F>(&mut self, delay: SimDuration, action: F) -> EventId
    where
        F: FnOnce(&mut W, &mut Simulator<W>) + Send + 'static,
    {
        let ts = self.now + delay;
        self.insert(ts, self.current_context, Box::new(action))
    }

    /// schedule `action` at the current time, after the events already
    /// scheduled for now
    pub fn schedule_now<F>(&mut self, action: F) -> EventId
    where
        F: FnOnce(&mut W, &mut Simulator<W>) + Send + 'static,
    {
        self.schedule(SimDuration::ZERO, action)
    }

    /// schedule `action` after `delay`, on behalf of `context`
    pub fn schedule_with_context<F>(&mut self, context: u32, delay: SimDuration, action: F) -> EventId
    where
        F: FnOnce(&mut W, &mut Simulator<W>) + Send + 'static,
    {
        let ts = self.now + delay;
        self.insert(ts, context, Box::new(action))
    }

    /// schedule `action` to run when the simulator is [destroyed]
    ///
    /// [destroyed]: Self::destroy
    pub fn schedule_destroy<F>(&mut self, action: F) -> EventId
    where
        F: FnOnce(&mut W, &mut Simulator<W>) + Send + 'static,
    {
        let id = EventId::new(EventKey::new(
            self.now,
            self.current_context,
            self.generate_uid(),
        ));
        self.destroy_events.push((id, Box::new(action)));
        id
    }

    /// Cancel a scheduled event.
    ///
    /// Its action will not be invoked and it is never reported by
    /// [`next_time`] or [`peek_next`]. Cancelling an event that already ran
    /// has no effect.
    ///
    /// [`next_time`]: Self::next_time
    /// [`peek_next`]: Self::peek_next
    pub fn cancel(&mut self, id: EventId) {
        if self.is_expired(id) {
            return;
        }
        self.destroy_events.retain(|(destroy, _)| *destroy != id);
        self.cancelled.insert(id.key());
        self.purge_cancelled();
    }

    /// `true` if the event already ran or has been cancelled
    pub fn is_expired(&self, id: EventId) -> bool {
        if self.cancelled.contains(&id.key()) {
            return true;
        }
        if self.destroy_events.iter().any(|(destroy, _)| *destroy == id) {
            return false;
        }

        id.ts() < self.now || (id.ts() == self.now && id.uid() <= self.current_uid)
    }

    /// how long until the event runs, zero if it is expired
    pub fn delay_left(&self, id: EventId) -> SimDuration {
        if self.is_expired(id) {
            SimDuration::ZERO
        } else {
            id.ts().saturating_duration_since(self.now)
        }
    }

    /// Merge the events injected through a [`ContextInjector`].
    ///
    /// Their timestamp is the current time plus their delay.
    fn process_events_with_context(&mut self) {
        for pending in self.injected.take() {
            let ts = self.now + pending.delay;
            self.insert(ts, pending.context, pending.action);
        }
    }

    /// Drop the cancelled events from the head of the list, so that the
    /// head is always an event to execute.
    fn purge_cancelled(&mut self) {
        while let Some(next) = self.events.peek_next().copied() {
            if !self.cancelled.contains(&next) {
                break;
            }
            self.events.remove_next();
        }
    }

    /// Execute the earliest event, advancing the clock to its timestamp.
    ///
    /// Returns `false` if there was no event to execute.
    pub fn process_one_event(&mut self, world: &mut W) -> bool {
        self.purge_cancelled();
        let Some((key, action)) = self.events.remove_next() else {
            return false;
        };

        debug_assert!(
            key.ts >= self.now,
            "event {} scheduled in the past (now: {})",
            key.uid,
            self.now,
        );

        self.now = key.ts;
        self.current_context = key.context;
        self.current_uid = key.uid;
        self.event_count += 1;

        // behind the clock, these are expired anyway
        while self.cancelled.first().is_some_and(|first| first.ts < self.now) {
            self.cancelled.pop_first();
        }

        action(world, self);

        self.process_events_with_context();
        self.purge_cancelled();
        true
    }

    /// Run until the event list is exhausted or [`stop`] is called.
    ///
    /// [`stop`]: Self::stop
    pub fn run(&mut self, world: &mut W) {
        self.stop = false;
        self.process_events_with_context();

        while !self.stop && self.process_one_event(world) {}
    }

    /// Execute every event strictly earlier than `ceiling`.
    ///
    /// Stops early if [`stop`] is called by an event. The clock is left at
    /// the timestamp of the last executed event; it never reaches past an
    /// event that has not been executed. Returns the number of events
    /// executed.
    ///
    /// [`stop`]: Self::stop
    pub fn run_until(&mut self, world: &mut W, ceiling: SimTime) -> u64 {
        self.stop = false;
        self.process_events_with_context();

        let start = self.event_count;
        while !self.stop {
            match self.events.peek_next() {
                Some(next) if next.ts < ceiling => {
                    self.process_one_event(world);
                }
                _ => break,
            }
        }
        self.event_count - start
    }

    /// Request the current run to stop after the executing event.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Schedule a stop request `delay` from now.
    pub fn stop_after(&mut self, delay: SimDuration) -> EventId {
        self.schedule(delay, |_, sim| sim.stop())
    }

    /// `true` if there is nothing left to execute or the run was stopped
    pub fn is_finished(&self) -> bool {
        self.stop || (self.events.is_empty() && self.injected.is_empty())
    }

    /// timestamp of the earliest pending event, `None` if finished
    pub fn next_time(&self) -> Option<SimTime> {
        if self.stop {
            return None;
        }
        self.events.peek_next().map(|key| key.ts)
    }

    /// [`EventId`] of the earliest pending event
    pub fn peek_next(&self) -> Option<EventId> {
        self.events.peek_next().copied().map(EventId::new)
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// context of the event currently (or last) executed
    #[inline]
    pub fn context(&self) -> u32 {
        self.current_context
    }

    /// number of events executed so far
    #[inline]
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// number of events still in the list
    #[inline]
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Run the destroy events and drop every pending event.
    ///
    /// The destroy events run in the order they were scheduled.
    pub fn destroy(&mut self, world: &mut W) {
        let destroy_events = std::mem::take(&mut self.destroy_events);
        for (_, action) in destroy_events {
            action(world, self);
        }

        while self.events.remove_next().is_some() {}
        let _ = self.injected.take();
        self.cancelled.clear();
    }
}

impl<W: 'static> Default for Simulator<W> {
    fn default() -> Self {
        Self::new()
    }
}
