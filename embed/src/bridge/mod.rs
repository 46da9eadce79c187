//! Context handshake with the host frame

pub mod context;
pub mod host;

pub use context::{ContextBridge, ContextState, MessageOutcome};
pub use host::{ChannelHost, HostFrame, MessageEvent, PostedMessage, WindowId};
