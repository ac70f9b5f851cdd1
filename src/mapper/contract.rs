use crate::core::Result;
use crate::lifecycle::Entity;
use crate::registry::DomainType;

/// Storage collaborator for one domain type.
///
/// The core calls exactly one method per lifecycle operation and never
/// inspects the concurrency stamp itself: mappers read it with
/// [`Entity::version`], compare it against storage, and publish the new one
/// with [`Entity::set_version`]. A stale stamp is reported as
/// [`OrmError::OptimisticConcurrency`](crate::core::OrmError::OptimisticConcurrency).
pub trait DataMapper<T: DomainType>: Send + Sync {
    /// Stores a `New` entity.
    fn insert(&self, entity: &Entity<T>) -> Result<()>;

    /// Fills a `Loading` entity, typically through [`Entity::populate`].
    /// May complete a compound key with [`Entity::sync_key`].
    fn select(&self, entity: &Entity<T>) -> Result<()>;

    /// Writes back a `Changed` entity.
    fn update(&self, entity: &Entity<T>) -> Result<()>;

    /// Removes a stored entity. `Virtual` entities carry an empty stamp.
    fn delete(&self, entity: &Entity<T>) -> Result<()>;
}
