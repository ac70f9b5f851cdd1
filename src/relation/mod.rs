pub mod collection;

pub use collection::{BackReference, Loader, Relation};
