use crate::core::{Result, StateTransition};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Where a notification sits relative to the external effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the mapper call (or before a guarded field store).
    Before,
    /// After the effect succeeded and the new state is visible.
    After,
    /// The effect failed after `Before` was published; the state is unchanged.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    phase: Phase,
    transition: StateTransition,
}

impl LifecycleEvent {
    pub fn before(transition: StateTransition) -> Self {
        Self {
            phase: Phase::Before,
            transition,
        }
    }

    pub fn after(transition: StateTransition) -> Self {
        Self {
            phase: Phase::After,
            transition,
        }
    }

    pub fn aborted(transition: StateTransition) -> Self {
        Self {
            phase: Phase::Aborted,
            transition,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transition(&self) -> StateTransition {
        self.transition
    }

    pub fn is_before(&self) -> bool {
        self.phase == Phase::Before
    }

    pub fn is_after(&self) -> bool {
        self.phase == Phase::After
    }

    pub fn is_aborted(&self) -> bool {
        self.phase == Phase::Aborted
    }
}

/// Returned by listeners; `Detach` unsubscribes after the current dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerControl {
    Keep,
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&LifecycleEvent) -> Result<ListenerControl> + Send + Sync>;

/// Per-entity observer list with synchronous, in-order dispatch.
///
/// Listeners run outside the list lock, so a listener may subscribe or
/// unsubscribe (itself included) while being notified.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) -> Result<ListenerControl> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifies every listener in subscription order.
    ///
    /// A `Before` dispatch stops at the first error, which vetoes the
    /// operation. `After` and `Aborted` dispatches always reach every
    /// listener and report the first error afterwards.
    pub fn publish(&self, event: &LifecycleEvent) -> Result<()> {
        let snapshot: Vec<(ListenerId, Listener)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut detached = Vec::new();
        let mut first_error = None;
        for (id, listener) in snapshot {
            match listener(event) {
                Ok(ListenerControl::Keep) => {}
                Ok(ListenerControl::Detach) => detached.push(id),
                Err(err) => {
                    if event.is_before() {
                        first_error = Some(err);
                        break;
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        if !detached.is_empty() {
            self.listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| !detached.contains(id));
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}
