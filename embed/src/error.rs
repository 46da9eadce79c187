//! Error types shared by the auth session and the context bridge

use crate::protocol::Provider;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Session errors surfaced to the user.
///
/// The `Display` text is the user-facing banner message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    #[error("Failed to reach backend")]
    NetworkUnreachable,

    #[error("{}", provider_login_message(.0))]
    ProviderAuthRequired(Provider),

    #[error("Refresh failed, server error: {0}")]
    ServerError(String),

    #[error("Unexpected backend response: {0}")]
    Unknown(String),
}

fn provider_login_message(provider: &Provider) -> &'static str {
    match provider {
        Provider::Procore => "Procore session expired, manual Procore login required",
        Provider::Signiflow => "Signiflow session expired, manual Signiflow login required",
    }
}

impl SessionError {
    /// Short machine-readable kind, used for metrics labels and `Failed` phases
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NetworkUnreachable => "network_unreachable",
            SessionError::ProviderAuthRequired(Provider::Procore) => "procore_auth_required",
            SessionError::ProviderAuthRequired(Provider::Signiflow) => "signiflow_auth_required",
            SessionError::ServerError(_) => "server_error",
            SessionError::Unknown(_) => "unknown",
        }
    }

    /// Whether the user has to act before the session can recover
    pub fn requires_user_action(&self) -> bool {
        matches!(self, SessionError::ProviderAuthRequired(_))
    }
}

/// Failures talking to the backend broker
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns true if the request may succeed when retried.
    ///
    /// Transport failures, timeouts and 5xx responses are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Unreachable(_) | TransportError::Timeout(_) => true,
            TransportError::Http { status, .. } => *status >= 500,
            TransportError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(_) | TransportError::Timeout(_) => {
                SessionError::NetworkUnreachable
            }
            TransportError::Http { status, body } if status >= 500 => {
                SessionError::ServerError(format!("({status}) {body}"))
            }
            TransportError::Http { status, body } => {
                SessionError::Unknown(format!("({status}) {body}"))
            }
            TransportError::Decode(detail) => SessionError::Unknown(detail),
        }
    }
}

/// Context bridge errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("App not loaded inside Procore iframe")]
    ContextUnavailable,

    #[error("Host frame did not send a context within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Invalid host origin: {0}")]
    InvalidOrigin(String),

    #[error("Failed to post message to host frame: {0}")]
    Post(String),

    #[error("Context bridge has been shut down")]
    ShutDown,
}
