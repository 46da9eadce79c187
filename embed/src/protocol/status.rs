//! Backend OAuth broker payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upstream OAuth provider proxied by the backend broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Construction platform (the host frame's own session)
    Procore,
    /// Signing platform
    Signiflow,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Procore, Provider::Signiflow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Procore => "procore",
            Provider::Signiflow => "signiflow",
        }
    }
}

/// Session state of one upstream provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthInfo {
    pub authenticated: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregate status reported by `GET /api/oauth/status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procore: Option<OAuthInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signiflow: Option<OAuthInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize"
    )]
    pub next_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendStatus {
    /// Provider record by name
    pub fn provider(&self, provider: Provider) -> Option<&OAuthInfo> {
        match provider {
            Provider::Procore => self.procore.as_ref(),
            Provider::Signiflow => self.signiflow.as_ref(),
        }
    }

    /// Aggregate authentication flag.
    ///
    /// When both provider records are present the flag is derived from them
    /// (both must be authenticated); otherwise the server flag is used and an
    /// absent flag counts as unauthenticated.
    pub fn is_authenticated(&self) -> bool {
        match (&self.procore, &self.signiflow) {
            (Some(procore), Some(signiflow)) => {
                let derived = procore.authenticated && signiflow.authenticated;
                if let Some(reported) = self.authenticated
                    && reported != derived
                {
                    warn!(
                        reported,
                        derived, "Backend aggregate authenticated flag disagrees with providers"
                    );
                }
                derived
            }
            _ => self.authenticated.unwrap_or(false),
        }
    }

    /// First provider known to be unauthenticated, Procore before Signiflow
    pub fn first_unauthenticated(&self) -> Option<Provider> {
        Provider::ALL.into_iter().find(|p| {
            self.provider(*p)
                .map(|info| !info.authenticated)
                .unwrap_or(false)
        })
    }

    /// Copy with the aggregate flag pinned to the provider-derived value
    pub fn normalized(mut self) -> Self {
        self.authenticated = Some(self.is_authenticated());
        self
    }
}

/// Body of `POST /api/oauth/refresh`.
///
/// The broker has shipped two shapes; both are accepted. `Legacy` is tried
/// first because `refreshed` is required there while every `Aggregate`
/// field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RefreshResponse {
    #[serde(rename_all = "camelCase")]
    Legacy {
        refreshed: bool,
        #[serde(default)]
        login_required: bool,
        #[serde(default)]
        auth: Option<BackendStatus>,
    },
    Aggregate(BackendStatus),
}

/// Normalised result of a refresh call
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Both providers hold a valid session
    Refreshed(BackendStatus),
    /// One provider needs a manual login
    ProviderAuthRequired(Provider),
    /// The broker could not refresh for a reason unrelated to provider auth
    Rejected(String),
}

impl RefreshResponse {
    pub fn into_outcome(self) -> RefreshOutcome {
        match self {
            RefreshResponse::Legacy {
                refreshed: true,
                auth,
                ..
            } => match auth {
                // A refresh that left a provider signed out is a partial failure
                Some(status) => RefreshOutcome::from_status(status),
                None => RefreshOutcome::Refreshed(BackendStatus {
                    authenticated: Some(true),
                    ..BackendStatus::default()
                }),
            },
            RefreshResponse::Legacy {
                login_required: true,
                auth,
                ..
            } => {
                let provider = auth
                    .as_ref()
                    .and_then(BackendStatus::first_unauthenticated)
                    .unwrap_or(Provider::Procore);
                RefreshOutcome::ProviderAuthRequired(provider)
            }
            RefreshResponse::Legacy { auth, .. } => RefreshOutcome::Rejected(
                auth.and_then(|a| a.error)
                    .unwrap_or_else(|| "refresh not performed".to_string()),
            ),
            RefreshResponse::Aggregate(status) => RefreshOutcome::from_status(status),
        }
    }
}

impl RefreshOutcome {
    fn from_status(status: BackendStatus) -> Self {
        if status.is_authenticated() {
            RefreshOutcome::Refreshed(status)
        } else if let Some(provider) = status.first_unauthenticated() {
            RefreshOutcome::ProviderAuthRequired(provider)
        } else {
            RefreshOutcome::Rejected(
                status
                    .error
                    .unwrap_or_else(|| "refresh not performed".to_string()),
            )
        }
    }
}

/// Timestamps arrive either as RFC 3339 strings or as epoch milliseconds
mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(de::Error::custom),
            Some(Raw::Millis(ms)) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}
