pub mod config;
pub mod context;

pub use config::ContextConfig;
pub use context::{Context, ContextBuilder};
