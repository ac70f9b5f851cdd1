pub mod memory;

pub use memory::{MapperCall, MapperOp, MemoryMapper, MemoryStore};
