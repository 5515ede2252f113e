//! Identity/session provider
//!
//! Resolves the session token carried by an upgrade request to a user
//! identity. The hub trusts the result completely.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tokio_tungstenite::tungstenite::handshake::server::Request;
use tokio_tungstenite::tungstenite::http::header;
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::types::UserId;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session_token";

/// Query parameter fallback for clients that cannot set cookies
pub const TOKEN_PARAM: &str = "token";

/// Default session lifetime, in hours
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Resolves a session token to an authenticated identity
///
/// Called from inside the WebSocket handshake, so implementations must not
/// block on I/O.
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, token: &str) -> Option<UserId>;
}

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// In-memory session table: token -> (user, expiry)
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `token -> user id` pairs, each valid for the default TTL
    pub fn from_pairs(pairs: HashMap<String, String>) -> Self {
        let table = Self::new();
        for (token, user_id) in pairs {
            table.insert(
                token,
                UserId::new(user_id),
                Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            );
        }
        table
    }

    /// Issue a fresh session for `user_id`, returning its token
    pub fn issue(&self, user_id: UserId, ttl: Duration) -> String {
        let token = Uuid::new_v4().to_string();
        self.insert(token.clone(), user_id, ttl);
        token
    }

    /// Register a known token
    pub fn insert(&self, token: String, user_id: UserId, ttl: Duration) {
        let entry = SessionEntry {
            user_id,
            expires_at: Utc::now() + ttl,
        };
        self.write().insert(token, entry);
    }

    /// Remove a session. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.write().remove(token).is_some()
    }

    /// Drop every expired session, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl IdentityProvider for SessionTable {
    fn identify(&self, token: &str) -> Option<UserId> {
        let sessions = self.read();
        let entry = sessions.get(token)?;
        if entry.expires_at <= Utc::now() {
            debug!("Session for {} expired", entry.user_id);
            return None;
        }
        Some(entry.user_id.clone())
    }
}

/// Extract the session token from the `session_token` cookie, falling back
/// to the `token` query parameter
pub fn session_token(request: &Request) -> Option<String> {
    let from_cookie = request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie
        .or_else(|| {
            request
                .uri()
                .query()?
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(name, _)| *name == TOKEN_PARAM)
                .map(|(_, value)| value.to_string())
        })
        .filter(|token| !token.is_empty())
}

/// Authenticate an upgrade request
///
/// Checks the `Origin` header against `allowed_origin` when one is
/// configured, then resolves the session token.
pub fn authenticate(
    provider: &dyn IdentityProvider,
    allowed_origin: Option<&str>,
    request: &Request,
) -> Result<UserId, AuthError> {
    if let Some(allowed) = allowed_origin {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if origin != allowed {
            return Err(AuthError::OriginNotAllowed(origin.to_string()));
        }
    }

    let token = session_token(request).ok_or(AuthError::MissingToken)?;
    provider.identify(&token).ok_or(AuthError::InvalidSession)
}
