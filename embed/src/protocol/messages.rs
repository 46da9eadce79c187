use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use thiserror::Error;

/// Messages posted from the embedded app to the host frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameMessage {
    /// Readiness announcement sent once after the listener is attached
    Initialize,
}

/// Declared type of an inbound host message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMessageKind {
    Context,
    Setup,
    #[serde(other)]
    Other,
}

impl HostMessageKind {
    pub fn carries_context(&self) -> bool {
        matches!(self, HostMessageKind::Context | HostMessageKind::Setup)
    }

    /// Message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            HostMessageKind::Context => "context",
            HostMessageKind::Setup => "setup",
            HostMessageKind::Other => "other",
        }
    }
}

/// Envelope fields shared by every inbound host message.
///
/// `null` in `context`/`payload` counts as absent.
#[derive(Debug, Deserialize)]
struct HostEnvelope {
    #[serde(rename = "type")]
    kind: HostMessageKind,
    #[serde(default)]
    context: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

/// A validated inbound host message
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    Context(OperatingContext),
    Setup(OperatingContext),
    /// Any other declared type, dropped by the bridge
    Unrecognized,
}

#[derive(Debug, Error, PartialEq)]
pub enum HostMessageError {
    #[error("message is not an object with a string `type`: {0}")]
    Envelope(String),

    #[error("invalid operating context: {0}")]
    Context(String),
}

impl HostMessage {
    /// Validate a raw `postMessage` body.
    ///
    /// The context is taken from `context`, then `payload`, then the whole
    /// body, whichever is present first.
    pub fn parse(data: &Value) -> Result<Self, HostMessageError> {
        let envelope = HostEnvelope::deserialize(data)
            .map_err(|e| HostMessageError::Envelope(e.to_string()))?;

        if !envelope.kind.carries_context() {
            return Ok(HostMessage::Unrecognized);
        }

        let source = envelope
            .context
            .as_ref()
            .or(envelope.payload.as_ref())
            .unwrap_or(data);
        let context = OperatingContext::from_value(source)?;

        Ok(match envelope.kind {
            HostMessageKind::Setup => HostMessage::Setup(context),
            _ => HostMessage::Context(context),
        })
    }

    pub fn kind(&self) -> HostMessageKind {
        match self {
            HostMessage::Context(_) => HostMessageKind::Context,
            HostMessage::Setup(_) => HostMessageKind::Setup,
            HostMessage::Unrecognized => HostMessageKind::Other,
        }
    }

    pub fn into_context(self) -> Option<OperatingContext> {
        match self {
            HostMessage::Context(context) | HostMessage::Setup(context) => Some(context),
            HostMessage::Unrecognized => None,
        }
    }
}

/// Host entity the embedded app operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingContext {
    #[serde(deserialize_with = "id::required")]
    pub company_id: String,
    #[serde(deserialize_with = "id::required")]
    pub project_id: String,
    #[serde(default, deserialize_with = "id::optional")]
    pub object_id: Option<String>,
    pub route: String,
    pub view: String,
    pub api_base_url: String,
}

impl OperatingContext {
    /// Deserialize and check that the record is complete
    pub fn from_value(value: &Value) -> Result<Self, HostMessageError> {
        let context = OperatingContext::deserialize(value)
            .map_err(|e| HostMessageError::Context(e.to_string()))?;
        context.validate()?;
        Ok(context)
    }

    fn validate(&self) -> Result<(), HostMessageError> {
        for (field, value) in [
            ("companyId", &self.company_id),
            ("projectId", &self.project_id),
            ("route", &self.route),
            ("view", &self.view),
        ] {
            if value.trim().is_empty() {
                return Err(HostMessageError::Context(format!("`{field}` is empty")));
            }
        }

        let api = url::Url::parse(&self.api_base_url).map_err(|e| {
            HostMessageError::Context(format!("`apiBaseUrl` is not a URL: {e}"))
        })?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(HostMessageError::Context(format!(
                "`apiBaseUrl` has unsupported scheme `{}`",
                api.scheme()
            )));
        }

        Ok(())
    }
}

/// Procore sends ids as numbers or strings
mod id {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(text) => text,
                RawId::Number(n) => n.to_string(),
            }
        }
    }

    pub fn required<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer)
            .map(String::from)
            .map_err(|_| de::Error::custom("expected a string or integer id"))
    }

    pub fn optional<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawId>::deserialize(deserializer)
            .map(|raw| raw.map(String::from))
            .map_err(|_| de::Error::custom("expected a string or integer id"))
    }
}
