// ============================================================================
// RustMemORM Library
// ============================================================================

//! Object-persistence runtime in the data-mapper style.
//!
//! Domain values are wrapped in [`Entity`] handles that track their
//! persistence state, lazy-load on first access and call a pluggable
//! [`DataMapper`] on `save`, `kill` and `load`. A [`Context`] ties together
//! the type registry, the identity map and the per-type mappers, and owns the
//! binary wire codec used to serialize entities and values.

pub mod codec;
pub mod core;
pub mod facade;
pub mod identity;
pub mod lifecycle;
pub mod mapper;
pub mod prelude;
pub mod registry;
pub mod relation;
pub mod storage;

mod macros;

#[doc(hidden)]
pub use paste;

pub use crate::codec::{Decimal, WireField, WireList, WireReader, WireValue, WireWriter};
pub use crate::core::{
    ConcurrencyStamp, Identity, Key, Operation, OrmError, PersistenceState, Result,
    StateTransition,
};
pub use crate::facade::{Context, ContextBuilder, ContextConfig};
pub use crate::identity::{CacheKey, IdentityMap};
pub use crate::lifecycle::{Binding, Entity, LifecycleEvent, ListenerControl, Persistent, Phase, Reference};
pub use crate::mapper::DataMapper;
pub use crate::registry::{DomainType, TypeRegistry};
pub use crate::relation::Relation;
pub use crate::storage::{MapperCall, MapperOp, MemoryMapper, MemoryStore};
