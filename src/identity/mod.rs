pub mod map;

pub use map::{CacheKey, IdentityMap};
