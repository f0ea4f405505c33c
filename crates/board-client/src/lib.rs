pub mod connection;
pub mod endpoint;
pub mod listeners;
pub mod runtime;
pub mod store;

pub use connection::{ConnectionManager, RuntimeEvent, RECONNECT_DELAY};
pub use store::{SessionState, SessionStore};
