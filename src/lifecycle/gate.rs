use crate::core::{OrmError, Result};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// Serializes lifecycle operations on one entity.
///
/// Other threads block until the holder leaves. The holding thread itself
/// gets [`OrmError::Reentrant`] instead of a deadlock, which happens when a
/// listener or mapper calls back into the operation it is part of.
#[derive(Debug, Default)]
pub struct OperationGate {
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

pub struct GateGuard<'a> {
    gate: &'a OperationGate,
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, what: &str) -> Result<GateGuard<'_>> {
        let me = thread::current().id();
        let mut holder = self.holder.lock()?;
        loop {
            match *holder {
                None => {
                    *holder = Some(me);
                    return Ok(GateGuard { gate: self });
                }
                Some(owner) if owner == me => {
                    return Err(OrmError::Reentrant(what.to_string()));
                }
                Some(_) => {
                    holder = self.released.wait(holder)?;
                }
            }
        }
    }

    /// Enters unless the calling thread already holds the gate, in which
    /// case the caller runs as part of the operation in progress.
    pub fn enter_or_join(&self, what: &str) -> Result<Option<GateGuard<'_>>> {
        if self.is_held_by_current_thread() {
            return Ok(None);
        }
        self.enter(what).map(Some)
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) == Some(thread::current().id())
    }

    pub fn is_held(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *self
            .gate
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.gate.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reentry_on_same_thread_fails() {
        let gate = OperationGate::new();
        let _guard = gate.enter("save").unwrap();
        assert!(matches!(gate.enter("save"), Err(OrmError::Reentrant(_))));
    }

    #[test]
    fn test_holder_joins_without_entering() {
        let gate = Arc::new(OperationGate::new());
        let guard = gate.enter("save").unwrap();
        assert!(gate.is_held_by_current_thread());
        assert!(gate.enter_or_join("modify").unwrap().is_none());
        assert!(gate.is_held());

        let other = {
            let gate = gate.clone();
            thread::spawn(move || gate.is_held_by_current_thread())
        };
        assert!(!other.join().unwrap());

        drop(guard);
        let joined = gate.enter_or_join("modify").unwrap();
        assert!(joined.is_some());
    }

    #[test]
    fn test_release_on_drop() {
        let gate = OperationGate::new();
        {
            let _guard = gate.enter("kill").unwrap();
            assert!(gate.is_held());
        }
        assert!(!gate.is_held());
        assert!(gate.enter("kill").is_ok());
    }

    #[test]
    fn test_threads_are_serialized() {
        let gate = Arc::new(OperationGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    let _guard = gate.enter("load").unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
