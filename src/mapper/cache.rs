use super::contract::DataMapper;
use crate::core::{OrmError, Result};
use crate::facade::ContextConfig;
use crate::registry::DomainType;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{Level, event};

/// Builds the data mapper of one type from the context configuration.
pub type MapperFactory<T> =
    Arc<dyn Fn(&ContextConfig) -> Result<Arc<dyn DataMapper<T>>> + Send + Sync>;

type Erased = Arc<dyn Any + Send + Sync>;

/// Per-type mapper resolution.
///
/// Factories are fixed when the context is built. Each one runs on first use
/// only; later lookups take the read lock and clone the cached handle.
#[derive(Default)]
pub struct MapperCache {
    factories: HashMap<i32, Erased>,
    resolved: RwLock<HashMap<i32, Erased>>,
}

impl MapperCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_factory<T: DomainType>(&mut self, factory: MapperFactory<T>) {
        self.factories.insert(T::DISCRIMINATOR, Arc::new(factory));
    }

    pub fn has_factory(&self, discriminator: i32) -> bool {
        self.factories.contains_key(&discriminator)
    }

    pub fn factory_discriminators(&self) -> Vec<i32> {
        self.factories.keys().copied().collect()
    }

    /// The mapper of `T`. Factories must not resolve other mappers.
    pub fn resolve<T: DomainType>(&self, config: &ContextConfig) -> Result<Arc<dyn DataMapper<T>>> {
        let discriminator = T::DISCRIMINATOR;
        if let Some(cached) = self.resolved.read()?.get(&discriminator) {
            return downcast::<T>(cached);
        }

        let mut resolved = self.resolved.write()?;
        if let Some(cached) = resolved.get(&discriminator) {
            return downcast::<T>(cached);
        }
        let factory = self
            .factories
            .get(&discriminator)
            .and_then(|erased| erased.downcast_ref::<MapperFactory<T>>())
            .ok_or_else(|| OrmError::UnknownType(format!("data mapper for {}", T::NAME)))?;
        let mapper = factory(config)?;
        resolved.insert(discriminator, Arc::new(mapper.clone()));
        event!(Level::DEBUG, type_name = T::NAME, "data mapper resolved");
        Ok(mapper)
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.read().map(|cache| cache.len()).unwrap_or_default()
    }
}

fn downcast<T: DomainType>(erased: &Erased) -> Result<Arc<dyn DataMapper<T>>> {
    erased
        .downcast_ref::<Arc<dyn DataMapper<T>>>()
        .cloned()
        .ok_or_else(|| OrmError::UnknownType(format!("data mapper for {}", T::NAME)))
}

impl std::fmt::Debug for MapperCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperCache")
            .field("factories", &self.factories.len())
            .field("resolved", &self.resolved_count())
            .finish()
    }
}
