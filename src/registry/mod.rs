pub mod domain;
pub mod types;

pub use domain::DomainType;
pub use types::{TypeEntry, TypeRegistry, UserType};
