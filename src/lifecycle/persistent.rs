use super::entity::Entity;
use super::events::EventBus;
use crate::codec::WireWriter;
use crate::core::{ConcurrencyStamp, OrmError, PersistenceState, Result};
use crate::identity::CacheKey;
use crate::registry::DomainType;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased view of an [`Entity`], used wherever the concrete domain type
/// is not known statically: the identity map, polymorphic decoding and
/// [`WireValue::Entity`](crate::codec::WireValue::Entity).
pub trait Persistent: Send + Sync + 'static {
    fn discriminator(&self) -> i32;

    fn type_name(&self) -> &'static str;

    fn state(&self) -> PersistenceState;

    fn version(&self) -> ConcurrencyStamp;

    /// Human-readable key, for logs and diagnostics.
    fn key_string(&self) -> String;

    fn cache_key(&self) -> Result<CacheKey>;

    fn events(&self) -> &EventBus;

    fn save(&self) -> Result<()>;

    fn kill(&self) -> Result<()>;

    fn load(&self) -> Result<()>;

    /// `[state][key]`, then version and fields unless `Virtual`.
    fn encode_body(&self, writer: &mut WireWriter<'_>) -> Result<()>;

    /// Serialized form, discriminator included.
    fn to_bytes(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl dyn Persistent {
    /// Recovers the concrete handle; fails with `UnknownType` on a mismatch.
    pub fn downcast<T: DomainType>(self: Arc<Self>) -> Result<Arc<Entity<T>>> {
        let name = self.type_name();
        self.into_any().downcast::<Entity<T>>().map_err(|_| {
            OrmError::UnknownType(format!("{} is not a {}", name, T::NAME))
        })
    }

    pub fn downcast_ref<T: DomainType>(&self) -> Option<&Entity<T>> {
        self.as_any().downcast_ref::<Entity<T>>()
    }
}

impl fmt::Debug for dyn Persistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.key_string())
    }
}

/// Pointer identity of two handles, ignoring vtables.
pub fn same_instance(a: &dyn Persistent, b: &dyn Persistent) -> bool {
    std::ptr::addr_eq(a as *const dyn Persistent, b as *const dyn Persistent)
}
