pub mod error;
pub mod key;
pub mod state;

pub use error::{OrmError, Result};
pub use key::{ConcurrencyStamp, Identity, Key};
pub use state::{Operation, PersistenceState, StateTransition};
