//! Auth token persistence
//!
//! The token is opaque to this crate. `TokenStore` is the seam the shell
//! persists it through; `MemoryTokenStore` keeps it in process and
//! `CookieOptions` renders the equivalent browser cookie headers.

use crate::config::TokenConfig;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Key/value store for the auth token, scoped by TTL
pub trait TokenStore: Send + Sync {
    /// Store `token`, replacing any previous value
    fn set(&self, token: &str);

    /// Current token, `None` once expired or cleared
    fn get(&self) -> Option<String>;

    /// Forget the token
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Scoping applied to the token cookie
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    pub ttl: Duration,
    pub path: String,
    pub same_site: SameSite,
    pub secure: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self::from(&TokenConfig::default())
    }
}

impl From<&TokenConfig> for CookieOptions {
    fn from(config: &TokenConfig) -> Self {
        Self {
            name: config.cookie_name.clone(),
            ttl: config.ttl,
            path: config.path.clone(),
            same_site: SameSite::Lax,
            secure: config.secure,
        }
    }
}

/// Cookie `expires` attribute format (RFC 1123, always GMT)
const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

impl CookieOptions {
    /// `Set-Cookie` value storing `token` until `now + ttl`
    pub fn set_cookie(&self, token: &str, now: DateTime<Utc>) -> String {
        let expires = now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        self.render(&urlencoding::encode(token), expires)
    }

    /// `Set-Cookie` value that expires the token immediately
    pub fn clear_cookie(&self, now: DateTime<Utc>) -> String {
        self.render("", now - chrono::Duration::days(1))
    }

    fn render(&self, value: &str, expires: DateTime<Utc>) -> String {
        let mut cookie = format!(
            "{}={}; expires={}; path={}; SameSite={};",
            urlencoding::encode(&self.name),
            value,
            expires.format(COOKIE_DATE_FORMAT),
            self.path,
            self.same_site.as_str(),
        );
        if self.secure {
            cookie.push_str(" Secure;");
        }
        cookie
    }

    /// Extract the token from a `Cookie` request header
    pub fn parse_cookie_header(&self, header: &str) -> Option<String> {
        let prefix = format!("{}=", urlencoding::encode(&self.name));
        header
            .split(';')
            .map(str::trim)
            .find_map(|pair| pair.strip_prefix(prefix.as_str()))
            .filter(|value| !value.is_empty())
            .and_then(|value| urlencoding::decode(value).ok())
            .map(|value| value.into_owned())
    }
}

struct StoredToken {
    value: String,
    expires_at: Instant,
}

/// In-process `TokenStore` with a fixed TTL
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredToken>>,
    ttl: Duration,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::with_ttl(TokenConfig::default().ttl)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<StoredToken>> {
        // The slot holds plain data, so a poisoned lock is still usable
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for MemoryTokenStore {
    fn set(&self, token: &str) {
        *self.slot() = Some(StoredToken {
            value: token.to_string(),
            expires_at: Instant::now() + self.ttl,
        });
        debug!(ttl_secs = self.ttl.as_secs(), "Stored auth token");
    }

    fn get(&self) -> Option<String> {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(stored) if stored.expires_at > Instant::now() => Some(stored.value.clone()),
            Some(_) => {
                debug!("Auth token expired");
                *slot = None;
                None
            }
            None => None,
        }
    }

    fn clear(&self) {
        *self.slot() = None;
        debug!("Cleared auth token");
    }
}
