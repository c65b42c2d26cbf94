use super::event::Action;
use crate::time::SimDuration;
use anyhow::{Result, anyhow};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

/// Handle to schedule events into a [`Simulator`] from another thread.
///
/// The handle is [`Send`] and cheap to [`Clone`]. Events injected through
/// it are collected in a pending list and merged into the event list at
/// the next event-processing boundary of the simulator, their timestamp
/// then being resolved relative to the simulator's clock at merge time.
///
/// [`Simulator`]: super::Simulator
pub struct ContextInjector<W> {
    shared: Arc<Injected<W>>,
}

pub(crate) struct PendingEvent<W> {
    pub(crate) context: u32,
    pub(crate) delay: SimDuration,
    pub(crate) action: Action<W>,
}

pub(crate) struct Injected<W> {
    pending: Mutex<Vec<PendingEvent<W>>>,
    empty: AtomicBool,
}

/// use total ordering for the flag, the mutex does the heavy lifting.
const ORDERING: Ordering = Ordering::SeqCst;

impl<W> Injected<W> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            empty: AtomicBool::new(true),
        }
    }

    /// take all the pending events at once, leaving an empty list behind
    pub(crate) fn take(&self) -> Vec<PendingEvent<W>> {
        if self.empty.load(ORDERING) {
            return Vec::new();
        }

        // the list stays consistent even if a producer panicked while
        // holding the lock: pushing is the only thing it does
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let events = std::mem::take(&mut *pending);
        self.empty.store(true, ORDERING);
        events
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.empty.load(ORDERING)
    }
}

impl<W> ContextInjector<W> {
    pub(crate) fn new(shared: Arc<Injected<W>>) -> Self {
        Self { shared }
    }

    /// schedule `action` to run `delay` after the simulator's clock at
    /// the time the event is picked up, on behalf of `context`.
    pub fn schedule_with_context<F>(&self, context: u32, delay: SimDuration, action: F) -> Result<()>
    where
        F: FnOnce(&mut W, &mut super::Simulator<W>) + Send + 'static,
    {
        let mut pending = self
            .shared
            .pending
            .lock()
            .map_err(|error| anyhow!("Failed to inject event for context {context}: {error}"))?;
        pending.push(PendingEvent {
            context,
            delay,
            action: Box::new(action),
        });
        self.shared.empty.store(false, ORDERING);
        Ok(())
    }

    /// `true` if nothing has been injected since the last merge
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }
}

impl<W> Clone for ContextInjector<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
