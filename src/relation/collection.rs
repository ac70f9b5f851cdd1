use crate::core::{OrmError, PersistenceState, Result};
use crate::facade::Context;
use crate::lifecycle::{Binding, Entity, LifecycleEvent, ListenerControl, Phase, Reference};
use crate::registry::DomainType;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{Level, event};

/// Fetches the stored items of an owner. Runs at most once per relation.
pub type Loader<O, I> = Arc<dyn Fn(&Entity<O>) -> Result<Vec<Arc<Entity<I>>>> + Send + Sync>;

/// Field of the item that points back at the owner.
pub type BackReference<O, I> = fn(&mut I) -> &mut Reference<O>;

struct Partitions<I: DomainType> {
    loaded: bool,
    items: Vec<Arc<Entity<I>>>,
    pending_delete: Vec<Arc<Entity<I>>>,
    /// Items moved to `pending_delete` by the owner's `Before` kill event,
    /// restored if the kill is aborted.
    killing: Vec<Arc<Entity<I>>>,
}

struct RelationInner<O: DomainType, I: DomainType> {
    owner: Weak<Entity<O>>,
    context: Context,
    loader: Loader<O, I>,
    back_reference: Option<BackReference<O, I>>,
    parts: Mutex<Partitions<I>>,
}

/// One-to-many collection owned by an entity of type `O`.
///
/// Loaded on first access, dirty-tracked, and cascaded through the owner's
/// lifecycle: the owner's save saves new and changed items and kills the
/// removed ones, the owner's kill kills every item. Clones share state.
pub struct Relation<O: DomainType, I: DomainType> {
    inner: Arc<RelationInner<O, I>>,
}

impl<O: DomainType, I: DomainType> Clone for Relation<O, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn position<I: DomainType>(list: &[Arc<Entity<I>>], item: &Arc<Entity<I>>) -> Option<usize> {
    list.iter().position(|candidate| Arc::ptr_eq(candidate, item))
}

impl<O: DomainType, I: DomainType> Relation<O, I> {
    pub fn new<F>(binding: &Binding<O>, loader: F) -> Self
    where
        F: Fn(&Entity<O>) -> Result<Vec<Arc<Entity<I>>>> + Send + Sync + 'static,
    {
        Self::build(binding, Arc::new(loader), None)
    }

    /// Items added to this relation get the owner assigned to `back_reference`
    /// before they are inserted.
    pub fn with_back_reference<F>(
        binding: &Binding<O>,
        loader: F,
        back_reference: BackReference<O, I>,
    ) -> Self
    where
        F: Fn(&Entity<O>) -> Result<Vec<Arc<Entity<I>>>> + Send + Sync + 'static,
    {
        Self::build(binding, Arc::new(loader), Some(back_reference))
    }

    fn build(
        binding: &Binding<O>,
        loader: Loader<O, I>,
        back_reference: Option<BackReference<O, I>>,
    ) -> Self {
        let inner = Arc::new(RelationInner {
            owner: binding.owner(),
            context: binding.context().clone(),
            loader,
            back_reference,
            parts: Mutex::new(Partitions {
                loaded: false,
                items: Vec::new(),
                pending_delete: Vec::new(),
                killing: Vec::new(),
            }),
        });
        let handle = Arc::downgrade(&inner);
        binding.events().subscribe(move |lifecycle| match handle.upgrade() {
            Some(inner) => inner.on_owner_event(lifecycle),
            None => Ok(ListenerControl::Detach),
        });
        Self { inner }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock_recovered().loaded
    }

    /// Current items, loading them on first access.
    pub fn items(&self) -> Result<Vec<Arc<Entity<I>>>> {
        let mut parts = self.inner.lock()?;
        self.inner.ensure_loaded(&mut parts)?;
        Ok(parts.items.clone())
    }

    /// Removed items waiting for the owner's next save or kill.
    pub fn pending_delete(&self) -> Vec<Arc<Entity<I>>> {
        self.inner.lock_recovered().pending_delete.clone()
    }

    pub fn len(&self) -> Result<usize> {
        let mut parts = self.inner.lock()?;
        self.inner.ensure_loaded(&mut parts)?;
        Ok(parts.items.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, item: &Arc<Entity<I>>) -> Result<bool> {
        let mut parts = self.inner.lock()?;
        self.inner.ensure_loaded(&mut parts)?;
        Ok(position(&parts.items, item).is_some())
    }

    /// Creates a `New` item and adds it.
    pub fn add(&self) -> Result<Arc<Entity<I>>> {
        let item = self.inner.context.create::<I>()?;
        self.add_item(item.clone())?;
        Ok(item)
    }

    /// Adds an existing item. Re-adding a removed item takes it back out of
    /// `pending_delete`; adding a member again is a no-op.
    pub fn add_item(&self, item: Arc<Entity<I>>) -> Result<()> {
        let owner = self.inner.live_owner("add")?;
        if let Some(back_reference) = self.inner.back_reference {
            item.set(back_reference, Reference::to(&owner))?;
        }
        {
            let mut parts = self.inner.lock()?;
            self.inner.ensure_loaded(&mut parts)?;
            if position(&parts.items, &item).is_some() {
                return Ok(());
            }
            if let Some(index) = position(&parts.pending_delete, &item) {
                parts.pending_delete.remove(index);
            }
            parts.items.push(item);
        }
        owner.touch()
    }

    /// Moves `item` to `pending_delete`. Returns `false` if it is not a member.
    pub fn remove(&self, item: &Arc<Entity<I>>) -> Result<bool> {
        let owner = self.inner.live_owner("remove")?;
        {
            let mut parts = self.inner.lock()?;
            self.inner.ensure_loaded(&mut parts)?;
            let Some(index) = position(&parts.items, item) else {
                return Ok(false);
            };
            let removed = parts.items.remove(index);
            parts.pending_delete.push(removed);
        }
        owner.touch()?;
        Ok(true)
    }

    /// Moves every item to `pending_delete`.
    pub fn clear(&self) -> Result<()> {
        let owner = self.inner.live_owner("clear")?;
        let moved = {
            let mut parts = self.inner.lock()?;
            self.inner.ensure_loaded(&mut parts)?;
            let moved: Vec<_> = parts.items.drain(..).collect();
            parts.pending_delete.extend(moved.iter().cloned());
            moved.len()
        };
        if moved > 0 {
            owner.touch()?;
        }
        Ok(())
    }
}

impl<O: DomainType, I: DomainType> RelationInner<O, I> {
    fn lock(&self) -> Result<MutexGuard<'_, Partitions<I>>> {
        Ok(self.parts.lock()?)
    }

    fn lock_recovered(&self) -> MutexGuard<'_, Partitions<I>> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owner(&self) -> Result<Arc<Entity<O>>> {
        self.owner.upgrade().ok_or_else(|| {
            OrmError::ReferenceIntegrity(format!("owner {} of relation is gone", O::NAME))
        })
    }

    fn live_owner(&self, operation: &'static str) -> Result<Arc<Entity<O>>> {
        let owner = self.owner()?;
        match owner.state() {
            PersistenceState::Deleted => Err(OrmError::InvalidState {
                state: PersistenceState::Deleted,
                operation,
            }),
            _ => Ok(owner),
        }
    }

    /// Runs the loader once. A `New` owner has nothing stored, so its
    /// relation starts empty. A loader failure leaves the relation unloaded.
    fn ensure_loaded(&self, parts: &mut Partitions<I>) -> Result<()> {
        if parts.loaded {
            return Ok(());
        }
        let owner = self.owner()?;
        if owner.state() != PersistenceState::New {
            let loaded = (self.loader)(&owner)?;
            event!(
                Level::TRACE,
                owner = O::NAME,
                item_type = I::NAME,
                count = loaded.len(),
                "relation loaded"
            );
            parts.items = loaded;
        }
        parts.loaded = true;
        Ok(())
    }

    fn on_owner_event(&self, lifecycle: &LifecycleEvent) -> Result<ListenerControl> {
        let transition = lifecycle.transition();
        if transition.is_kill() {
            match lifecycle.phase() {
                Phase::Before => self.begin_kill()?,
                Phase::Aborted => self.abort_kill()?,
                Phase::After => {
                    self.lock()?.killing.clear();
                    self.flush_pending()?;
                }
            }
        } else if transition.is_save() && lifecycle.is_after() {
            self.cascade_save()?;
        }
        Ok(ListenerControl::Keep)
    }

    fn begin_kill(&self) -> Result<()> {
        let mut parts = self.lock()?;
        self.ensure_loaded(&mut parts)?;
        let moved: Vec<_> = parts.items.drain(..).collect();
        parts.pending_delete.extend(moved.iter().cloned());
        parts.killing = moved;
        Ok(())
    }

    fn abort_kill(&self) -> Result<()> {
        let mut parts = self.lock()?;
        let restored = std::mem::take(&mut parts.killing);
        parts
            .pending_delete
            .retain(|item| position(&restored, item).is_none());
        parts.items = restored;
        Ok(())
    }

    fn cascade_save(&self) -> Result<()> {
        let items = {
            let parts = self.lock()?;
            if !parts.loaded {
                return Ok(());
            }
            parts.items.clone()
        };
        for item in items.iter().filter(|item| item.state().is_dirty()) {
            item.save()?;
        }
        self.flush_pending()
    }

    /// Kills removed items that exist in storage. Items that were never
    /// stored are simply dropped; failed ones stay pending.
    fn flush_pending(&self) -> Result<()> {
        let pending = std::mem::take(&mut self.lock()?.pending_delete);
        let mut failed = Vec::new();
        let mut first_error = None;
        for item in pending {
            let stored = matches!(
                item.state(),
                PersistenceState::Virtual | PersistenceState::Original | PersistenceState::Changed
            );
            if !stored {
                continue;
            }
            if let Err(err) = item.kill() {
                event!(Level::ERROR, error = %err, item_type = I::NAME, "relation item kill failed");
                first_error.get_or_insert(err);
                failed.push(item);
            }
        }
        if !failed.is_empty() {
            self.lock()?.pending_delete.extend(failed);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<O: DomainType, I: DomainType> fmt::Debug for Relation<O, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.inner.lock_recovered();
        f.debug_struct("Relation")
            .field("owner", &O::NAME)
            .field("item_type", &I::NAME)
            .field("loaded", &parts.loaded)
            .field("items", &parts.items.len())
            .field("pending_delete", &parts.pending_delete.len())
            .finish()
    }
}
