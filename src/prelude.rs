//! Everything a domain model and its application code usually need.

pub use crate::codec::{Decimal, WireField, WireValue};
pub use crate::core::{ConcurrencyStamp, Identity, Key, OrmError, PersistenceState, Result};
pub use crate::domain_type;
pub use crate::facade::{Context, ContextConfig};
pub use crate::lifecycle::{Binding, Entity, Persistent, Reference};
pub use crate::mapper::DataMapper;
pub use crate::registry::DomainType;
pub use crate::relation::Relation;
pub use crate::storage::{MapperOp, MemoryStore};
