//! Procore Embed Library
//!
//! Core of the Signiflow admin app embedded inside the Procore host frame:
//! the context handshake with the host frame and the authenticated session
//! against the backend OAuth broker.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod protocol;
pub mod token;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use auth::{AuthSessionManager, BackendTransport, HttpBackend, SessionPhase, SessionSnapshot};
pub use bridge::{
    ChannelHost, ContextBridge, ContextState, HostFrame, MessageEvent, MessageOutcome, WindowId,
};
pub use config::Config;
pub use error::{BridgeError, SessionError, TransportError};
pub use protocol::{BackendStatus, OAuthInfo, OperatingContext, Provider};
pub use token::{CookieOptions, MemoryTokenStore, TokenStore};
