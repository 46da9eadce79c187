//! Auth session against the backend OAuth broker

pub mod manager;
pub mod state;
pub mod transport;

pub use manager::{AuthSessionManager, Operation};
pub use state::{SessionPhase, SessionSnapshot};
pub use transport::{BackendTransport, HttpBackend};
