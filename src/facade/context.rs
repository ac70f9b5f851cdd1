use super::config::ContextConfig;
use crate::codec::{WireReader, WireValue, WireWriter};
use crate::core::{Key, OrmError, PersistenceState, Result};
use crate::identity::{CacheKey, IdentityMap};
use crate::lifecycle::{Entity, Persistent};
use crate::mapper::{DataMapper, MapperCache};
use crate::registry::{DomainType, TypeRegistry};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};

struct ContextInner {
    config: ContextConfig,
    registry: TypeRegistry,
    identity_map: IdentityMap,
    mappers: MapperCache,
    resources: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Entry point of the runtime: type registry, identity map and data mappers
/// of one domain, shared by every entity created through it.
///
/// Cheap to clone. Built once with [`ContextBuilder`] and immutable after.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn builder(config: ContextConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.inner.identity_map
    }

    /// A `New` object with a fresh key. It enters the identity map once saved.
    pub fn create<T: DomainType>(&self) -> Result<Arc<Entity<T>>> {
        self.create_with_state::<T>(T::Key::generate(), PersistenceState::New)
    }

    /// The instance cached for `key`, or a newly registered `Virtual` stub.
    pub fn get<T: DomainType>(&self, key: T::Key) -> Result<Arc<Entity<T>>> {
        self.create_with_state::<T>(key, PersistenceState::Virtual)
    }

    /// Explicit starting posture. Only `New` and `Virtual` can be declared.
    pub fn create_with_state<T: DomainType>(
        &self,
        key: T::Key,
        state: PersistenceState,
    ) -> Result<Arc<Entity<T>>> {
        self.inner.registry.entry_for::<T>()?;
        if !state.is_starting_state() {
            return Err(OrmError::IllegalStartingState(state));
        }
        if key.is_null() {
            return Err(OrmError::NullKey(T::NAME.to_string()));
        }
        if state == PersistenceState::Virtual {
            if let Some(cached) = self.find::<T>(&key)? {
                return Ok(cached);
            }
        }
        let entity = Entity::<T>::construct(self, key, state);
        self.inner.identity_map.register(entity)?.downcast::<T>()
    }

    /// Cache lookup only; never creates a stub.
    pub fn find<T: DomainType>(&self, key: &T::Key) -> Result<Option<Arc<Entity<T>>>> {
        let cache_key = CacheKey::of::<T>(self, key)?;
        self.inner.identity_map.find_as::<T>(&cache_key)
    }

    /// `New` instance of the type registered under `discriminator`.
    pub fn new_dyn(&self, discriminator: i32) -> Result<Arc<dyn Persistent>> {
        self.inner.registry.entry(discriminator)?.new_default(self)
    }

    /// Stub (or cached instance) for a key given in its wire form.
    pub fn get_dyn(&self, discriminator: i32, key: &[u8]) -> Result<Arc<dyn Persistent>> {
        let entry = self.inner.registry.entry(discriminator)?;
        let mut input = key;
        let mut reader = WireReader::new(&mut input, self);
        let entity = entry.new_by_key(&mut reader)?;
        reader.finish()?;
        Ok(entity)
    }

    pub fn mapper<T: DomainType>(&self) -> Result<Arc<dyn DataMapper<T>>> {
        self.inner.mappers.resolve::<T>(&self.inner.config)
    }

    /// Shared service registered with [`ContextBuilder::resource`], such as
    /// the store a relation loader queries.
    pub fn resource<R: Any + Send + Sync>(&self) -> Result<Arc<R>> {
        self.inner
            .resources
            .get(&TypeId::of::<R>())
            .cloned()
            .and_then(|resource| resource.downcast::<R>().ok())
            .ok_or_else(|| {
                OrmError::Config(format!(
                    "no resource of type {}",
                    std::any::type_name::<R>()
                ))
            })
    }

    pub fn clear_identity_map(&self) -> Result<()> {
        self.inner.identity_map.clear()
    }

    // ------------------------------------------------------------------
    // Codec shortcuts
    // ------------------------------------------------------------------

    pub fn encode_value(&self, value: &WireValue) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        WireWriter::new(&mut buf, self).write_value(value)?;
        Ok(buf)
    }

    /// Decodes exactly one value; trailing bytes are an error.
    pub fn decode_value(&self, bytes: &[u8]) -> Result<WireValue> {
        let mut input = bytes;
        let mut reader = WireReader::new(&mut input, self);
        let value = reader.read_value()?;
        reader.finish()?;
        Ok(value)
    }

    pub fn encode_entity(&self, entity: Option<&dyn Persistent>) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        WireWriter::new(&mut buf, self).write_entity(entity)?;
        Ok(buf)
    }

    pub fn decode_entity(&self, bytes: &[u8]) -> Result<Option<Arc<dyn Persistent>>> {
        let mut input = bytes;
        let mut reader = WireReader::new(&mut input, self);
        let entity = reader.read_entity_dyn()?;
        reader.finish()?;
        Ok(entity)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("domain", &self.inner.config.domain_name)
            .field("registry", &self.inner.registry)
            .field("identity_map", &self.inner.identity_map)
            .finish()
    }
}

/// Collects type declarations and mapper factories, then freezes them
/// into a [`Context`].
pub struct ContextBuilder {
    config: ContextConfig,
    registry: TypeRegistry,
    mappers: MapperCache,
    resources: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    error: Option<OrmError>,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        let registry = TypeRegistry::new(config.domain_name.clone());
        Self {
            config,
            registry,
            mappers: MapperCache::new(),
            resources: HashMap::new(),
            error: None,
        }
    }

    /// Declares `T`. The first failing declaration is reported by `build`.
    pub fn register<T: DomainType>(mut self) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.registry.register::<T>() {
                self.error = Some(err);
            }
        }
        self
    }

    /// Sets the mapper factory of `T`, which must be registered by `build`.
    pub fn mapper<T, F>(mut self, factory: F) -> Self
    where
        T: DomainType,
        F: Fn(&ContextConfig) -> Result<Arc<dyn DataMapper<T>>> + Send + Sync + 'static,
    {
        self.mappers.set_factory::<T>(Arc::new(factory));
        self
    }

    pub fn register_with_mapper<T, F>(self, factory: F) -> Self
    where
        T: DomainType,
        F: Fn(&ContextConfig) -> Result<Arc<dyn DataMapper<T>>> + Send + Sync + 'static,
    {
        self.register::<T>().mapper::<T, F>(factory)
    }

    /// Makes `resource` available through [`Context::resource`]. One value
    /// per type; a later call replaces an earlier one.
    pub fn resource<R: Any + Send + Sync>(mut self, resource: Arc<R>) -> Self {
        self.resources.insert(TypeId::of::<R>(), resource);
        self
    }

    pub fn build(self) -> Result<Context> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.config.validate()?;
        if let Some(orphan) = self
            .mappers
            .factory_discriminators()
            .into_iter()
            .find(|d| !self.registry.contains(*d))
        {
            return Err(OrmError::Config(format!(
                "data mapper given for unregistered discriminator {}",
                orphan
            )));
        }
        for discriminator in self.registry.discriminators() {
            if !self.mappers.has_factory(discriminator) {
                event!(
                    Level::WARN,
                    discriminator,
                    "type registered without a data mapper"
                );
            }
        }
        event!(
            Level::DEBUG,
            domain = %self.config.domain_name,
            types = self.registry.len(),
            "context built"
        );
        Ok(Context {
            inner: Arc::new(ContextInner {
                identity_map: IdentityMap::with_capacity(self.config.identity_map_capacity),
                config: self.config,
                registry: self.registry,
                mappers: self.mappers,
                resources: self.resources,
            }),
        })
    }
}
