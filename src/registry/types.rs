use super::domain::DomainType;
use crate::codec::{FIRST_USER_DISCRIMINATOR, WireReader};
use crate::core::{Key, OrmError, PersistenceState, Result};
use crate::facade::Context;
use crate::lifecycle::{Entity, Persistent};
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{Level, event};

/// Constructor and decoder capability of one registered type, looked up by
/// discriminator at runtime.
pub trait UserType: Send + Sync {
    fn discriminator(&self) -> i32;

    fn name(&self) -> &'static str;

    fn type_id(&self) -> TypeId;

    /// `New` instance with a fresh key.
    fn new_default(&self, context: &Context) -> Result<Arc<dyn Persistent>>;

    /// `Virtual` stub (or the cached instance) for a key read from `reader`.
    fn new_by_key(&self, reader: &mut WireReader<'_>) -> Result<Arc<dyn Persistent>>;

    /// Instance in a declared starting state for a key read from `reader`.
    fn new_with_state(
        &self,
        reader: &mut WireReader<'_>,
        state: PersistenceState,
    ) -> Result<Arc<dyn Persistent>>;

    /// Rebuilds a serialized entity whose state byte has been read.
    fn decode(&self, state: PersistenceState, reader: &mut WireReader<'_>) -> Result<Arc<dyn Persistent>>;
}

/// The [`UserType`] of a statically declared [`DomainType`].
pub struct TypeEntry<T>(PhantomData<fn() -> T>);

impl<T> TypeEntry<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypeEntry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DomainType> UserType for TypeEntry<T> {
    fn discriminator(&self) -> i32 {
        T::DISCRIMINATOR
    }

    fn name(&self) -> &'static str {
        T::NAME
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn new_default(&self, context: &Context) -> Result<Arc<dyn Persistent>> {
        Ok(context.create::<T>()?)
    }

    fn new_by_key(&self, reader: &mut WireReader<'_>) -> Result<Arc<dyn Persistent>> {
        let key = T::Key::decode(reader)?;
        Ok(reader.context().get::<T>(key)?)
    }

    fn new_with_state(
        &self,
        reader: &mut WireReader<'_>,
        state: PersistenceState,
    ) -> Result<Arc<dyn Persistent>> {
        let key = T::Key::decode(reader)?;
        Ok(reader.context().create_with_state::<T>(key, state)?)
    }

    fn decode(&self, state: PersistenceState, reader: &mut WireReader<'_>) -> Result<Arc<dyn Persistent>> {
        Ok(Entity::<T>::decode_body(state, reader)?)
    }
}

/// Bijective map between domain types and discriminators.
///
/// Filled once while the [`Context`] is built and read-only afterwards.
pub struct TypeRegistry {
    domain_name: String,
    by_discriminator: HashMap<i32, Arc<dyn UserType>>,
    by_type: HashMap<TypeId, i32>,
}

impl TypeRegistry {
    pub fn new(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            by_discriminator: HashMap::new(),
            by_type: HashMap::new(),
        }
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Registers `T`. Registering the same type again is a no-op.
    pub fn register<T: DomainType>(&mut self) -> Result<()> {
        let discriminator = T::DISCRIMINATOR;
        if let Some(existing) = self.by_type.get(&TypeId::of::<T>()) {
            if *existing == discriminator {
                return Ok(());
            }
        }
        if discriminator < FIRST_USER_DISCRIMINATOR {
            return Err(OrmError::Config(format!(
                "discriminator {} of {} is in the reserved range (user types start at {})",
                discriminator, T::NAME, FIRST_USER_DISCRIMINATOR
            )));
        }
        if let Some(entry) = self.by_discriminator.get(&discriminator) {
            return Err(OrmError::DuplicateDiscriminator {
                discriminator,
                existing: entry.name(),
            });
        }

        self.by_discriminator
            .insert(discriminator, Arc::new(TypeEntry::<T>::new()));
        self.by_type.insert(TypeId::of::<T>(), discriminator);
        event!(
            Level::DEBUG,
            domain = %self.domain_name,
            type_name = T::NAME,
            discriminator,
            "type registered"
        );
        Ok(())
    }

    pub fn entry(&self, discriminator: i32) -> Result<Arc<dyn UserType>> {
        self.by_discriminator
            .get(&discriminator)
            .cloned()
            .ok_or_else(|| OrmError::UnknownType(format!("discriminator({})", discriminator)))
    }

    pub fn entry_for<T: DomainType>(&self) -> Result<Arc<dyn UserType>> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(discriminator) => self.entry(*discriminator),
            None => Err(OrmError::UnknownType(T::NAME.to_string())),
        }
    }

    pub fn discriminator_of<T: DomainType>(&self) -> Result<i32> {
        self.by_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| OrmError::UnknownType(T::NAME.to_string()))
    }

    pub fn contains(&self, discriminator: i32) -> bool {
        self.by_discriminator.contains_key(&discriminator)
    }

    pub fn len(&self) -> usize {
        self.by_discriminator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_discriminator.is_empty()
    }

    /// Registered discriminators in ascending order.
    pub fn discriminators(&self) -> Vec<i32> {
        let mut all: Vec<i32> = self.by_discriminator.keys().copied().collect();
        all.sort_unstable();
        all
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("domain_name", &self.domain_name)
            .field("discriminators", &self.discriminators())
            .finish()
    }
}
