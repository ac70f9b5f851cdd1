use crate::core::{ConcurrencyStamp, OrmError, Result};
use crate::facade::ContextConfig;
use crate::lifecycle::{Entity, Persistent, Reference};
use crate::mapper::DataMapper;
use crate::registry::DomainType;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapperOp {
    Insert,
    Select,
    Update,
    Delete,
}

impl fmt::Display for MapperOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Select => "select",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One completed mapper call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperCall {
    pub op: MapperOp,
    pub discriminator: i32,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    seq: u64,
    version: u64,
    payload: Vec<u8>,
}

/// Rows of one type, keyed by encoded entity key.
#[derive(Debug, Default)]
struct Table {
    rows: HashMap<Vec<u8>, StoredRow>,
    next_seq: u64,
}

/// In-memory backing store with one table per discriminator.
///
/// Rows hold the field payload produced by the wire codec and an 8-byte row
/// version, bumped on every update and checked on update and delete.
/// Completed calls are journaled; [`fail_next`](Self::fail_next) makes the
/// next call of an operation fail once.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<i32, Arc<RwLock<Table>>>>,
    journal: Mutex<Vec<MapperCall>>,
    failures: Mutex<HashMap<MapperOp, usize>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mapper factory for `T`, ready for
    /// [`ContextBuilder::mapper`](crate::facade::ContextBuilder::mapper).
    pub fn factory<T: DomainType>(
        self: &Arc<Self>,
    ) -> impl Fn(&ContextConfig) -> Result<Arc<dyn DataMapper<T>>> + Send + Sync + 'static {
        let store = self.clone();
        move |_config| Ok(Arc::new(MemoryMapper::<T>::new(store.clone())) as Arc<dyn DataMapper<T>>)
    }

    fn table(&self, discriminator: i32) -> Result<Arc<RwLock<Table>>> {
        if let Some(table) = self.tables.read()?.get(&discriminator) {
            return Ok(table.clone());
        }
        let mut tables = self.tables.write()?;
        Ok(tables.entry(discriminator).or_default().clone())
    }

    fn record(&self, op: MapperOp, discriminator: i32, key: Vec<u8>) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MapperCall {
                op,
                discriminator,
                key,
            });
    }

    fn check_failure(&self, op: MapperOp) -> Result<()> {
        let mut failures = self.failures.lock()?;
        if let Some(remaining) = failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OrmError::Mapper(format!("injected {} failure", op)));
            }
        }
        Ok(())
    }

    /// The next `op` call fails with a mapper error.
    pub fn fail_next(&self, op: MapperOp) {
        *self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default() += 1;
    }

    pub fn journal(&self) -> Vec<MapperCall> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_journal(&self) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn count(&self, op: MapperOp) -> usize {
        self.journal().iter().filter(|call| call.op == op).count()
    }

    /// Completed `op` calls that addressed `entity`.
    pub fn calls_for(&self, op: MapperOp, entity: &dyn Persistent) -> Result<usize> {
        let key = entity.cache_key()?;
        Ok(self
            .journal()
            .iter()
            .filter(|call| {
                call.op == op
                    && call.discriminator == key.discriminator()
                    && call.key == key.key_bytes()
            })
            .count())
    }

    /// Every completed call that addressed `entity`.
    pub fn all_calls_for(&self, entity: &dyn Persistent) -> Result<Vec<MapperOp>> {
        let key = entity.cache_key()?;
        Ok(self
            .journal()
            .into_iter()
            .filter(|call| call.discriminator == key.discriminator() && call.key == key.key_bytes())
            .map(|call| call.op)
            .collect())
    }

    pub fn row_count(&self, discriminator: i32) -> Result<usize> {
        Ok(self.table(discriminator)?.read()?.rows.len())
    }

    pub fn contains(&self, entity: &dyn Persistent) -> Result<bool> {
        Ok(self.stored_version(entity)?.is_some())
    }

    pub fn stored_version(&self, entity: &dyn Persistent) -> Result<Option<u64>> {
        let key = entity.cache_key()?;
        let table = self.table(key.discriminator())?;
        let table = table.read()?;
        Ok(table.rows.get(key.key_bytes()).map(|row| row.version))
    }

    /// Simulates a write by another party: the stored version moves on.
    pub fn bump_version(&self, entity: &dyn Persistent) -> Result<()> {
        let key = entity.cache_key()?;
        let table = self.table(key.discriminator())?;
        let mut table = table.write()?;
        let row = table.rows.get_mut(key.key_bytes()).ok_or_else(|| {
            OrmError::ReferenceIntegrity(format!("no stored {} {}", entity.type_name(), entity.key_string()))
        })?;
        row.version += 1;
        Ok(())
    }

    /// Encoded keys of `discriminator` in insertion order.
    pub fn keys(&self, discriminator: i32) -> Result<Vec<Vec<u8>>> {
        let table = self.table(discriminator)?;
        let table = table.read()?;
        let mut rows: Vec<(&Vec<u8>, u64)> = table.rows.iter().map(|(k, row)| (k, row.seq)).collect();
        rows.sort_by_key(|(_, seq)| *seq);
        Ok(rows.into_iter().map(|(k, _)| k.clone()).collect())
    }

    /// Relation loader: stored items of type `I` whose back-reference points
    /// at `owner`, in insertion order.
    pub fn load_children<O: DomainType, I: DomainType>(
        &self,
        owner: &Entity<O>,
        back_reference: fn(&I) -> &Reference<O>,
    ) -> Result<Vec<Arc<Entity<I>>>> {
        let context = owner.context();
        let mut children = Vec::new();
        for key in self.keys(I::DISCRIMINATOR)? {
            let child = context.get_dyn(I::DISCRIMINATOR, &key)?.downcast::<I>()?;
            if child.read(|item| back_reference(item).points_to(owner))? {
                children.push(child);
            }
        }
        Ok(children)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemoryStore")
            .field("tables", &tables.len())
            .field("journal", &self.journal().len())
            .finish()
    }
}

/// [`DataMapper`] of `T` over a shared [`MemoryStore`].
pub struct MemoryMapper<T> {
    store: Arc<MemoryStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DomainType> MemoryMapper<T> {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    fn key_of(entity: &Entity<T>) -> Result<Vec<u8>> {
        Ok(entity.cache_key()?.key_bytes().to_vec())
    }

    fn stale(entity: &Entity<T>, reason: &str) -> OrmError {
        OrmError::OptimisticConcurrency(format!("{} {:?}: {}", T::NAME, entity.key(), reason))
    }
}

impl<T: DomainType> DataMapper<T> for MemoryMapper<T> {
    fn insert(&self, entity: &Entity<T>) -> Result<()> {
        self.store.check_failure(MapperOp::Insert)?;
        let key = Self::key_of(entity)?;
        let payload = entity.field_bytes()?;
        {
            let table = self.store.table(T::DISCRIMINATOR)?;
            let mut table = table.write()?;
            if table.rows.contains_key(&key) {
                return Err(OrmError::Mapper(format!(
                    "duplicate key for {} {:?}",
                    T::NAME,
                    entity.key()
                )));
            }
            let seq = table.next_seq;
            table.next_seq += 1;
            table.rows.insert(
                key.clone(),
                StoredRow {
                    seq,
                    version: 1,
                    payload,
                },
            );
        }
        entity.set_version(ConcurrencyStamp::from_version(1))?;
        self.store.record(MapperOp::Insert, T::DISCRIMINATOR, key);
        event!(Level::TRACE, type_name = T::NAME, "row inserted");
        Ok(())
    }

    fn select(&self, entity: &Entity<T>) -> Result<()> {
        self.store.check_failure(MapperOp::Select)?;
        let key = Self::key_of(entity)?;
        let row = {
            let table = self.store.table(T::DISCRIMINATOR)?;
            let table = table.read()?;
            table.rows.get(&key).cloned()
        };
        let row = row.ok_or_else(|| {
            OrmError::ReferenceIntegrity(format!("no stored {} {:?}", T::NAME, entity.key()))
        })?;
        entity.populate_from_bytes(&row.payload)?;
        entity.set_version(ConcurrencyStamp::from_version(row.version))?;
        self.store.record(MapperOp::Select, T::DISCRIMINATOR, key);
        Ok(())
    }

    fn update(&self, entity: &Entity<T>) -> Result<()> {
        self.store.check_failure(MapperOp::Update)?;
        let key = Self::key_of(entity)?;
        let payload = entity.field_bytes()?;
        let expected = entity.version().as_version();
        let version = {
            let table = self.store.table(T::DISCRIMINATOR)?;
            let mut table = table.write()?;
            let row = table
                .rows
                .get_mut(&key)
                .ok_or_else(|| Self::stale(entity, "row was deleted"))?;
            if expected != Some(row.version) {
                return Err(Self::stale(entity, "row version has moved on"));
            }
            row.version += 1;
            row.payload = payload;
            row.version
        };
        entity.set_version(ConcurrencyStamp::from_version(version))?;
        self.store.record(MapperOp::Update, T::DISCRIMINATOR, key);
        Ok(())
    }

    fn delete(&self, entity: &Entity<T>) -> Result<()> {
        self.store.check_failure(MapperOp::Delete)?;
        let key = Self::key_of(entity)?;
        let stamp = entity.version();
        {
            let table = self.store.table(T::DISCRIMINATOR)?;
            let mut table = table.write()?;
            let Some(row) = table.rows.get(&key) else {
                if stamp.is_empty() {
                    return Err(OrmError::ReferenceIntegrity(format!(
                        "no stored {} {:?}",
                        T::NAME,
                        entity.key()
                    )));
                }
                return Err(Self::stale(entity, "row was deleted"));
            };
            // stubs are deleted without ever having seen a version
            if !stamp.is_empty() && stamp.as_version() != Some(row.version) {
                return Err(Self::stale(entity, "row version has moved on"));
            }
            table.rows.remove(&key);
        }
        self.store.record(MapperOp::Delete, T::DISCRIMINATOR, key);
        Ok(())
    }
}
