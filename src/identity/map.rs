use crate::codec::WireWriter;
use crate::core::{Key, OrmError, PersistenceState, Result};
use crate::facade::Context;
use crate::lifecycle::{Entity, ListenerControl, Persistent};
use crate::registry::DomainType;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{Level, event};

/// `(discriminator, encoded key)`. Keys are compared by their wire bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    discriminator: i32,
    key: Vec<u8>,
}

impl CacheKey {
    pub fn new(discriminator: i32, key: Vec<u8>) -> Self {
        Self { discriminator, key }
    }

    pub fn of<T: DomainType>(context: &Context, key: &T::Key) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut writer = WireWriter::new(&mut bytes, context);
        key.encode(&mut writer)?;
        Ok(Self::new(T::DISCRIMINATOR, bytes))
    }

    pub fn discriminator(&self) -> i32 {
        self.discriminator
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.discriminator)?;
        for byte in &self.key {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

type Entries = RwLock<HashMap<CacheKey, Weak<dyn Persistent>>>;

/// Where an entity stands with respect to the map.
#[derive(Debug)]
enum Membership {
    /// `New`: inserted once the first save succeeds.
    Pending,
    Cached(CacheKey),
    /// Its key is held by another live instance.
    Shadowed,
}

/// One live instance per `(type, key)`.
///
/// Entries are weak: the map never keeps an entity alive. Each registered
/// entity carries a listener that inserts it after its first save, re-keys
/// it after a load and evicts it when it is killed.
pub struct IdentityMap {
    entries: Arc<Entries>,
}

impl IdentityMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::with_capacity(capacity))),
        }
    }

    /// Returns the canonical instance for `entity`'s key: `entity` itself if
    /// the key was free, otherwise the instance registered first.
    ///
    /// `New` entities are tracked but inserted only once saved.
    pub fn register(&self, entity: Arc<dyn Persistent>) -> Result<Arc<dyn Persistent>> {
        match entity.state() {
            PersistenceState::New => {
                self.attach(&entity, Membership::Pending);
                Ok(entity)
            }
            PersistenceState::Virtual | PersistenceState::Original | PersistenceState::Changed => {
                let key = entity.cache_key()?;
                {
                    let mut entries = self.entries.write()?;
                    if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
                        return Ok(existing);
                    }
                    entries.insert(key.clone(), Arc::downgrade(&entity));
                }
                event!(Level::TRACE, key = ?key, "identity map insert");
                self.attach(&entity, Membership::Cached(key));
                Ok(entity)
            }
            state => Err(OrmError::InvalidState {
                state,
                operation: "register",
            }),
        }
    }

    pub fn find(&self, key: &CacheKey) -> Result<Option<Arc<dyn Persistent>>> {
        {
            let entries = self.entries.read()?;
            match entries.get(key) {
                None => return Ok(None),
                Some(handle) => {
                    if let Some(entity) = handle.upgrade() {
                        return Ok(Some(entity));
                    }
                }
            }
        }
        // the instance is gone, drop its entry
        let mut entries = self.entries.write()?;
        if entries.get(key).is_some_and(|handle| handle.strong_count() == 0) {
            entries.remove(key);
        }
        Ok(None)
    }

    pub fn find_as<T: DomainType>(&self, key: &CacheKey) -> Result<Option<Arc<Entity<T>>>> {
        self.find(key)?.map(|entity| entity.downcast::<T>()).transpose()
    }

    pub fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Drops every entry. Live instances keep working but are no longer
    /// returned by lookups.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write()?;
        let dropped = entries.len();
        entries.clear();
        event!(Level::DEBUG, dropped, "identity map cleared");
        Ok(())
    }

    /// Number of live entries. Diagnostic only: walks the whole index.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn attach(&self, entity: &Arc<dyn Persistent>, initial: Membership) {
        let entries = Arc::downgrade(&self.entries);
        let handle = Arc::downgrade(entity);
        let membership = Mutex::new(initial);

        entity.events().subscribe(move |lifecycle| {
            if !lifecycle.is_after() {
                return Ok(ListenerControl::Keep);
            }
            let (Some(entries), Some(entity)) = (entries.upgrade(), handle.upgrade()) else {
                return Ok(ListenerControl::Detach);
            };
            let transition = lifecycle.transition();
            let mut membership = membership.lock()?;

            if transition.is_kill() {
                evict(&entries, &membership, &entity)?;
                return Ok(ListenerControl::Detach);
            }
            let key_settled = transition.is_load()
                || (transition.from() == PersistenceState::New && transition.is_save());
            if key_settled {
                *membership = rekey(&entries, &membership, &entity)?;
            }
            Ok(ListenerControl::Keep)
        });
    }
}

fn is_same(handle: &Weak<dyn Persistent>, entity: &Arc<dyn Persistent>) -> bool {
    std::ptr::addr_eq(handle.as_ptr(), Arc::as_ptr(entity))
}

fn evict(entries: &Entries, membership: &Membership, entity: &Arc<dyn Persistent>) -> Result<()> {
    if let Membership::Cached(key) = membership {
        let mut entries = entries.write()?;
        if entries.get(key).is_some_and(|handle| is_same(handle, entity)) {
            entries.remove(key);
            event!(Level::TRACE, key = ?key, "identity map evict");
        }
    }
    Ok(())
}

/// Places `entity` under its current key, first come first served.
fn rekey(entries: &Entries, membership: &Membership, entity: &Arc<dyn Persistent>) -> Result<Membership> {
    let key = entity.cache_key()?;
    let mut entries = entries.write()?;

    if let Membership::Cached(old) = membership {
        if *old == key {
            return Ok(Membership::Cached(key));
        }
        if entries.get(old).is_some_and(|handle| is_same(handle, entity)) {
            entries.remove(old);
        }
    }

    let taken = entries
        .get(&key)
        .and_then(Weak::upgrade)
        .is_some_and(|other| !std::ptr::addr_eq(Arc::as_ptr(&other), Arc::as_ptr(entity)));
    if taken {
        event!(Level::DEBUG, key = ?key, "key already cached by another instance");
        return Ok(Membership::Shadowed);
    }
    entries.insert(key.clone(), Arc::downgrade(entity));
    event!(Level::TRACE, key = ?key, "identity map insert");
    Ok(Membership::Cached(key))
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap")
            .field("live", &self.len())
            .finish()
    }
}
