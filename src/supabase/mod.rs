//! Supabase collaborators: GoTrue for identity, PostgREST for the `todos` table.
//!
//! Both are consumed through traits so the session and todo layers can run
//! against in-memory fakes in tests.

mod auth;
mod rest;
mod types;

pub use auth::GoTrueClient;
pub use rest::SupabaseClient;
pub use types::{Session, SignUpOutcome, User};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::todo::{CategoryFilter, Todo, TodoInsert, TodoPatch};

/// Errors returned by the Supabase collaborators.
#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Error payload from the server; `message` is the human-readable text.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Todo {0} not found")]
    NotFound(Uuid),
}

impl SupabaseError {
    /// Build an `Api` error from a non-success response body.
    pub(crate) fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        SupabaseError::Api {
            status: status.as_u16(),
            message: extract_error_message(status, body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Pull the human-readable message out of a GoTrue or PostgREST error body.
pub(crate) fn extract_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                if !msg.is_empty() {
                    return msg.to_string();
                }
            }
        }
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Identity provider (sign-up, sign-in, refresh, sign-out).
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, SupabaseError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError>;
}

/// Row operations on the `todos` collection. Every call is scoped by the
/// caller's access token; row-level security does the actual filtering.
#[async_trait]
pub trait TodoBackend: Send + Sync {
    /// Select rows ordered by `created_at` descending.
    async fn select(
        &self,
        access_token: &str,
        filter: CategoryFilter,
    ) -> Result<Vec<Todo>, SupabaseError>;

    /// Fetch one row by id.
    async fn get(&self, access_token: &str, id: Uuid) -> Result<Todo, SupabaseError>;

    async fn insert(&self, access_token: &str, row: &TodoInsert<'_>) -> Result<(), SupabaseError>;

    async fn update(
        &self,
        access_token: &str,
        id: Uuid,
        patch: &TodoPatch,
    ) -> Result<(), SupabaseError>;

    async fn delete(&self, access_token: &str, id: Uuid) -> Result<(), SupabaseError>;
}
