pub mod cache;
pub mod contract;

pub use cache::{MapperCache, MapperFactory};
pub use contract::DataMapper;
