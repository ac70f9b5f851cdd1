use super::events::{EventBus, LifecycleEvent};
use super::gate::OperationGate;
use super::persistent::Persistent;
use crate::codec::{WireReader, WireWriter};
use crate::core::{
    ConcurrencyStamp, Key, Operation, OrmError, PersistenceState, Result, StateTransition,
};
use crate::facade::Context;
use crate::identity::CacheKey;
use crate::registry::DomainType;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{Level, event, info_span};

/// What a domain value sees of the entity being constructed around it.
///
/// Passed to [`DomainType::create`]; relations use it to subscribe to the
/// owner's lifecycle events.
pub struct Binding<T: DomainType> {
    owner: Weak<Entity<T>>,
    events: Arc<EventBus>,
    context: Context,
}

impl<T: DomainType> Binding<T> {
    /// Not upgradable until construction has finished.
    pub fn owner(&self) -> Weak<Entity<T>> {
        self.owner.clone()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// A persistent object: the domain value `T` wrapped in its lifecycle.
///
/// Field access goes through [`read`](Self::read) and [`set`](Self::set),
/// which lazy-load `Virtual` objects and mark `Original` ones as changed.
/// `save`, `kill` and `load` call the data mapper registered for `T`.
pub struct Entity<T: DomainType> {
    context: Context,
    key: RwLock<T::Key>,
    state: Mutex<PersistenceState>,
    version: RwLock<ConcurrencyStamp>,
    data: RwLock<T>,
    events: Arc<EventBus>,
    gate: OperationGate,
}

impl<T: DomainType> Entity<T> {
    /// Builds an unregistered instance. Callers go through [`Context`].
    pub(crate) fn construct(context: &Context, key: T::Key, state: PersistenceState) -> Arc<Self> {
        Arc::new_cyclic(|owner| {
            let events = Arc::new(EventBus::new());
            let binding = Binding {
                owner: owner.clone(),
                events: events.clone(),
                context: context.clone(),
            };
            let data = T::create(&binding);
            Self {
                context: context.clone(),
                key: RwLock::new(key),
                state: Mutex::new(state),
                version: RwLock::new(ConcurrencyStamp::default()),
                data: RwLock::new(data),
                events,
                gate: OperationGate::new(),
            }
        })
    }

    pub fn key(&self) -> T::Key {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> PersistenceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PersistenceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn version(&self) -> ConcurrencyStamp {
        self.version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores the stamp issued by the data mapper.
    pub fn set_version(&self, version: ConcurrencyStamp) -> Result<()> {
        *self.version.write()? = version;
        Ok(())
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache_key(&self) -> Result<CacheKey> {
        CacheKey::of::<T>(&self.context, &self.key())
    }

    // ------------------------------------------------------------------
    // Guarded field access
    // ------------------------------------------------------------------

    /// Reads the domain value, loading it first if this is a stub.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.ensure_loaded()?;
        let data = self.data.read()?;
        Ok(f(&data))
    }

    /// Reads whatever is in memory, without loading.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&data)
    }

    /// Guarded store, serialized with `save`, `kill` and `load`.
    ///
    /// * `Deleted`: ignored.
    /// * `Virtual`: loads first, then continues as below.
    /// * `New`, `Loading`, `Changed`: stored as is.
    /// * `Original`: stored only if different, moving to `Changed` between a
    ///   `Before` and an `After` notification.
    ///
    /// Mappers and listeners already inside an operation on this entity
    /// store without waiting for it.
    pub fn set<V, F>(&self, field: F, value: V) -> Result<()>
    where
        V: PartialEq,
        F: Fn(&mut T) -> &mut V,
    {
        if self.state() == PersistenceState::Deleted {
            return Ok(());
        }
        let gate = self.gate.enter_or_join("modify")?;
        if self.state() == PersistenceState::Virtual {
            if gate.is_none() {
                return Err(OrmError::Reentrant("load".to_string()));
            }
            self.load_held()?;
        }
        match self.state() {
            PersistenceState::Deleted => Ok(()),
            PersistenceState::Original => {
                if *field(&mut *self.data.write()?) == value {
                    return Ok(());
                }
                self.promote(|data| *field(data) = value)
            }
            _ => {
                *field(&mut *self.data.write()?) = value;
                Ok(())
            }
        }
    }

    /// Marks an `Original` object as `Changed` without storing anything.
    /// Relations use it when their membership changes.
    pub fn touch(&self) -> Result<()> {
        if self.state() == PersistenceState::Deleted {
            return Ok(());
        }
        let gate = self.gate.enter_or_join("modify")?;
        if self.state() == PersistenceState::Virtual {
            if gate.is_none() {
                return Err(OrmError::Reentrant("load".to_string()));
            }
            self.load_held()?;
        }
        if self.state() != PersistenceState::Original {
            return Ok(());
        }
        self.promote(|_| {})
    }

    /// `Original -> Changed` around `mutate`. Expects the gate to be held.
    fn promote(&self, mutate: impl FnOnce(&mut T)) -> Result<()> {
        let transition = Operation::Modify.transition_from(PersistenceState::Original)?;
        if let Err(err) = self.events.publish(&LifecycleEvent::before(transition)) {
            self.notify_aborted(transition);
            return Err(err);
        }
        mutate(&mut *self.data.write()?);
        self.set_state(transition.to());
        self.events.publish(&LifecycleEvent::after(transition))
    }

    /// Direct write access for data mappers, allowed only while `Loading`.
    pub fn populate<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        self.require_loading("populate")?;
        let mut data = self.data.write()?;
        f(&mut data)
    }

    /// Replaces the key while `Loading` (compound keys completed by the store).
    /// The identity map re-keys the entry once loading completes.
    pub fn sync_key(&self, key: T::Key) -> Result<()> {
        self.require_loading("sync_key")?;
        if key.is_null() {
            return Err(OrmError::NullKey(T::NAME.to_string()));
        }
        *self.key.write()? = key;
        Ok(())
    }

    fn require_loading(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            PersistenceState::Loading => Ok(()),
            state => Err(OrmError::InvalidState { state, operation }),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Inserts a `New` object or updates a `Changed` one.
    pub fn save(&self) -> Result<()> {
        let key = self.key();
        let span = info_span!("entity.save", entity_type = T::NAME, key = ?key);
        let _enter = span.enter();

        let _gate = self.gate.enter("save")?;
        let from = self.state();
        let transition = Operation::Save.transition_from(from).inspect_err(|_| {
            event!(Level::WARN, state = %from, "save rejected");
        })?;
        let mapper = self.context.mapper::<T>()?;

        self.apply(transition, || {
            if from == PersistenceState::New {
                mapper.insert(self)
            } else {
                mapper.update(self)
            }
        })?;
        event!(Level::DEBUG, from = %from, "entity saved");
        Ok(())
    }

    /// Deletes a stored object. Killing a `New` object is rejected.
    pub fn kill(&self) -> Result<()> {
        let key = self.key();
        let span = info_span!("entity.kill", entity_type = T::NAME, key = ?key);
        let _enter = span.enter();

        let _gate = self.gate.enter("kill")?;
        let from = self.state();
        let transition = Operation::Kill.transition_from(from).inspect_err(|_| {
            event!(Level::WARN, state = %from, "kill rejected");
        })?;
        let mapper = self.context.mapper::<T>()?;

        self.apply(transition, || mapper.delete(self))?;
        event!(Level::DEBUG, from = %from, "entity killed");
        Ok(())
    }

    /// Explicit load of a stub. Any state other than `Virtual` is rejected.
    pub fn load(&self) -> Result<()> {
        let key = self.key();
        let span = info_span!("entity.load", entity_type = T::NAME, key = ?key);
        let _enter = span.enter();

        let _gate = self.gate.enter("load")?;
        let from = self.state();
        Operation::Load.transition_from(from)?;
        let mapper = self.context.mapper::<T>()?;
        self.run_load(|entity| mapper.select(entity))
    }

    /// Lazy load: a no-op unless `Virtual`, and tolerant of another thread
    /// having loaded the object while this one waited.
    fn ensure_loaded(&self) -> Result<()> {
        if self.state() != PersistenceState::Virtual {
            return Ok(());
        }
        let _gate = self.gate.enter("load")?;
        if self.state() != PersistenceState::Virtual {
            return Ok(());
        }
        self.load_held()
    }

    /// Lazy load for callers that already hold the gate.
    fn load_held(&self) -> Result<()> {
        let key = self.key();
        let span = info_span!("entity.load", entity_type = T::NAME, key = ?key, lazy = true);
        let _enter = span.enter();

        let mapper = self.context.mapper::<T>()?;
        self.run_load(|entity| mapper.select(entity))
    }

    /// `Before` -> effect -> state change -> `After`. A failure anywhere
    /// before the state change leaves the state untouched and publishes
    /// `Aborted`.
    fn apply(&self, transition: StateTransition, effect: impl FnOnce() -> Result<()>) -> Result<()> {
        if let Err(err) = self.events.publish(&LifecycleEvent::before(transition)) {
            event!(Level::WARN, error = %err, transition = %transition, "operation vetoed");
            self.notify_aborted(transition);
            return Err(err);
        }
        if let Err(err) = effect() {
            event!(Level::ERROR, error = %err, transition = %transition, "data mapper call failed");
            self.notify_aborted(transition);
            return Err(err);
        }
        self.set_state(transition.to());
        self.events.publish(&LifecycleEvent::after(transition))
    }

    /// `Virtual -> Loading -> Original`, rolling back to `Virtual` on failure.
    /// Expects the gate to be held and the state to be `Virtual`.
    fn run_load(&self, fetch: impl FnOnce(&Self) -> Result<()>) -> Result<()> {
        let from = self.state();
        Operation::Load.transition_from(from)?;
        let completion = StateTransition::new(PersistenceState::Loading, PersistenceState::Original)?;

        self.set_state(PersistenceState::Loading);
        let outcome = self
            .events
            .publish(&LifecycleEvent::before(completion))
            .and_then(|()| fetch(self));
        if let Err(err) = outcome {
            self.set_state(from);
            self.notify_aborted(completion);
            event!(Level::WARN, error = %err, "load rolled back");
            return Err(err);
        }

        self.set_state(PersistenceState::Original);
        self.events.publish(&LifecycleEvent::after(completion))?;
        event!(Level::DEBUG, "entity loaded");
        Ok(())
    }

    fn notify_aborted(&self, transition: StateTransition) {
        if let Err(err) = self.events.publish(&LifecycleEvent::aborted(transition)) {
            event!(Level::WARN, error = %err, transition = %transition, "abort listener failed");
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// The field payload alone, as data mappers store it.
    pub fn field_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut writer = WireWriter::new(&mut buf, &self.context);
        self.data.read()?.encode_fields(&mut writer)?;
        Ok(buf)
    }

    /// Counterpart of [`field_bytes`](Self::field_bytes), for use inside
    /// `DataMapper::select`.
    pub fn populate_from_bytes(&self, bytes: &[u8]) -> Result<()> {
        let context = self.context.clone();
        let mut input = bytes;
        let mut reader = WireReader::new(&mut input, &context);
        self.populate(|data| data.decode_fields(&mut reader))?;
        reader.finish()
    }

    /// `[version][fields]`
    fn read_full_payload(&self, reader: &mut WireReader<'_>) -> Result<()> {
        let version = ConcurrencyStamp::new(reader.read_bytes()?);
        self.data.write()?.decode_fields(reader)?;
        *self.version.write()? = version;
        Ok(())
    }

    /// Rebuilds an entity from `[key]...` once its state byte is known.
    ///
    /// Stored states resolve through the identity map: a cached stub is
    /// hydrated from the stream, an already loaded instance wins over the
    /// stream and is returned as is.
    pub(crate) fn decode_body(state: PersistenceState, reader: &mut WireReader<'_>) -> Result<Arc<Self>> {
        let context = reader.context().clone();
        match state {
            PersistenceState::Loading => Err(OrmError::Codec(format!(
                "{} cannot be decoded in state Loading",
                T::NAME
            ))),
            PersistenceState::Virtual => {
                let key = T::Key::decode(reader)?;
                context.get::<T>(key)
            }
            PersistenceState::New => {
                let key = T::Key::decode(reader)?;
                let entity = Self::construct(&context, key, PersistenceState::New);
                entity.read_full_payload(reader)?;
                context.identity_map().register(entity.clone())?;
                Ok(entity)
            }
            PersistenceState::Deleted => {
                let key = T::Key::decode(reader)?;
                let entity = Self::construct(&context, key, PersistenceState::Deleted);
                entity.read_full_payload(reader)?;
                Ok(entity)
            }
            PersistenceState::Original | PersistenceState::Changed => {
                let key = T::Key::decode(reader)?;
                let canonical = context.get::<T>(key)?;
                if canonical.hydrate(state, reader)? {
                    return Ok(canonical);
                }
                let scratch = Self::construct(&context, canonical.key(), PersistenceState::Deleted);
                scratch.read_full_payload(reader)?;
                Ok(canonical)
            }
        }
    }

    /// Loads a stub from the stream instead of the mapper. Returns `false`
    /// when the instance already holds data.
    fn hydrate(&self, stored: PersistenceState, reader: &mut WireReader<'_>) -> Result<bool> {
        if self.state() != PersistenceState::Virtual {
            return Ok(false);
        }
        {
            let _gate = self.gate.enter("load")?;
            if self.state() != PersistenceState::Virtual {
                return Ok(false);
            }
            self.run_load(|entity| entity.read_full_payload(reader))?;
        }
        if stored == PersistenceState::Changed {
            self.touch()?;
        }
        Ok(true)
    }
}

impl<T: DomainType> Persistent for Entity<T> {
    fn discriminator(&self) -> i32 {
        T::DISCRIMINATOR
    }

    fn type_name(&self) -> &'static str {
        T::NAME
    }

    fn state(&self) -> PersistenceState {
        Entity::state(self)
    }

    fn version(&self) -> ConcurrencyStamp {
        Entity::version(self)
    }

    fn key_string(&self) -> String {
        format!("{:?}", self.key())
    }

    fn cache_key(&self) -> Result<CacheKey> {
        Entity::cache_key(self)
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn save(&self) -> Result<()> {
        Entity::save(self)
    }

    fn kill(&self) -> Result<()> {
        Entity::kill(self)
    }

    fn load(&self) -> Result<()> {
        Entity::load(self)
    }

    fn encode_body(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        let state = self.state();
        if state == PersistenceState::Loading {
            return Err(OrmError::Codec(format!(
                "{} cannot be encoded in state Loading",
                T::NAME
            )));
        }
        writer.write_u8(state.as_byte())?;
        self.key().encode(writer)?;
        if state.is_stub() {
            return Ok(());
        }
        writer.write_bytes(self.version.read()?.as_bytes())?;
        self.data.read()?.encode_fields(writer)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut writer = WireWriter::new(&mut buf, &self.context);
        writer.write_entity(Some(self as &dyn Persistent))?;
        Ok(buf)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: DomainType + fmt::Debug> fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct(T::NAME)
            .field("key", &self.key())
            .field("state", &self.state())
            .field("data", &*data)
            .finish()
    }
}
