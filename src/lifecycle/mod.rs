pub mod entity;
pub mod events;
pub mod gate;
pub mod persistent;
pub mod reference;

pub use entity::{Binding, Entity};
pub use events::{EventBus, LifecycleEvent, Listener, ListenerControl, ListenerId, Phase};
pub use gate::OperationGate;
pub use persistent::{Persistent, same_instance};
pub use reference::Reference;
