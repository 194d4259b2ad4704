//! Wire types for the Supabase auth API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens plus the identity they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    /// Time left before the access token expires (zero if already expired).
    pub fn expires_in(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

/// Token grant response from `/auth/v1/token` (and `/signup` when no
/// confirmation is required).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

/// Token lifetime when the server omits both expiry fields.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

impl TokenResponse {
    /// Out-of-range expiry values fall back to the default lifetime.
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        let after = |secs: i64| {
            Duration::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl))
        };
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| self.expires_in.and_then(after))
            .or_else(|| after(DEFAULT_TOKEN_TTL_SECS))
            .unwrap_or(now);
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Result of a sign-up. When email confirmation is enabled the server
/// returns only the user and no session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub user: User,
    pub session: Option<Session>,
}

impl SignUpOutcome {
    pub fn needs_confirmation(&self) -> bool {
        self.session.is_none()
    }
}
