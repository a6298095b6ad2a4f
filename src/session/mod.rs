//! Listener sessions and the registry that fans out to them

pub mod gate;
pub mod listener;
pub mod registry;

pub use gate::{Activity, ActivityGate};
pub use listener::{ListenerSession, ListenerStream, SessionId, StreamFormat};
pub use registry::SessionRegistry;
