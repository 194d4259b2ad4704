//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionState;
use crate::settings::Theme;
use crate::supabase::User;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether a generative API key is configured.
    pub ai_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unresolved,
    SignedOut,
    SignedIn,
}

/// Public view of the session. Tokens never leave the process.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&SessionState> for SessionResponse {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Unresolved => Self {
                status: SessionStatus::Unresolved,
                user: None,
                expires_at: None,
            },
            SessionState::SignedOut => Self {
                status: SessionStatus::SignedOut,
                user: None,
                expires_at: None,
            },
            SessionState::SignedIn(session) => Self {
                status: SessionStatus::SignedIn,
                user: Some(session.user.clone()),
                expires_at: Some(session.expires_at),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user: User,
    /// True when the account must be confirmed by email before signing in.
    pub confirmation_required: bool,
    pub session: SessionResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `all` or a category name. Absent keeps the current filter.
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RewriteRequest {
    /// Text to rewrite. Defaults to the task's content in the loaded list.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionResponse {
    pub suggestion: String,
}

#[derive(Debug, Serialize)]
pub struct UseSuggestionResponse {
    /// Text to prefill the new-task input with, if a suggestion was shown.
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// Stored preference; `null` follows the system setting.
    pub theme: Option<Theme>,
    /// Theme to show, given the caller's system setting.
    pub effective: Theme,
}

impl SettingsResponse {
    pub fn new(theme: Option<Theme>, system_prefers_dark: bool) -> Self {
        Self {
            theme,
            effective: Theme::effective(theme, system_prefers_dark),
        }
    }
}

/// The caller's system color scheme.
#[derive(Debug, Default, Deserialize)]
pub struct SystemThemeQuery {
    #[serde(default)]
    pub system_prefers_dark: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateThemeRequest {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub system_prefers_dark: bool,
}
