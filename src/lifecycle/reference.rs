use super::entity::Entity;
use crate::core::{OrmError, Result};
use crate::facade::Context;
use crate::registry::DomainType;
use std::fmt;
use std::sync::{Arc, Weak};

/// Non-owning link to another entity (foreign key, back-reference).
///
/// Holds the target key and a weak handle. When the handle has expired the
/// target is resolved again through the identity map.
pub struct Reference<T: DomainType> {
    target: Option<(T::Key, Weak<Entity<T>>)>,
}

impl<T: DomainType> Reference<T> {
    pub fn empty() -> Self {
        Self { target: None }
    }

    pub fn to(entity: &Arc<Entity<T>>) -> Self {
        Self {
            target: Some((entity.key(), Arc::downgrade(entity))),
        }
    }

    pub fn key(&self) -> Option<&T::Key> {
        self.target.as_ref().map(|(key, _)| key)
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none()
    }

    pub fn points_to(&self, entity: &Entity<T>) -> bool {
        self.key().is_some_and(|key| *key == entity.key())
    }

    /// The target instance, or `None` for an empty reference.
    pub fn resolve(&self, context: &Context) -> Result<Option<Arc<Entity<T>>>> {
        let Some((key, handle)) = &self.target else {
            return Ok(None);
        };
        if let Some(entity) = handle.upgrade() {
            return Ok(Some(entity));
        }
        context.get::<T>(key.clone()).map(Some)
    }

    /// Like [`resolve`](Self::resolve), but an empty reference is an error.
    pub fn require(&self, context: &Context) -> Result<Arc<Entity<T>>> {
        self.resolve(context)?.ok_or_else(|| {
            OrmError::ReferenceIntegrity(format!("empty reference to {}", T::NAME))
        })
    }
}

impl<T: DomainType> Default for Reference<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: DomainType> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

/// References compare by key only.
impl<T: DomainType> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T: DomainType> Eq for Reference<T> {}

impl<T: DomainType> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "Reference<{}>({:?})", T::NAME, key),
            None => write!(f, "Reference<{}>(empty)", T::NAME),
        }
    }
}
