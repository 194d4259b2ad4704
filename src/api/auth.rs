//! Sign-up, sign-in and sign-out against the hosted auth provider.
//!
//! The server holds a single session for the process. Protected routes pass
//! through [`require_session`], which rejects requests until someone signs
//! in and exposes the signed-in [`User`] as a request extension.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::routes::AppState;
use super::types::{CredentialsRequest, SessionResponse, SignUpResponse};
use crate::session::SessionError;
use crate::supabase::SupabaseError;

/// Map a session failure onto a response. Auth-provider rejections keep
/// their client status; transport failures become 502.
fn session_error(e: SessionError) -> (StatusCode, String) {
    let status = match &e {
        SessionError::MissingCredentials => StatusCode::BAD_REQUEST,
        SessionError::NotSignedIn => StatusCode::UNAUTHORIZED,
        SessionError::Auth(SupabaseError::Api { status, .. }) => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        SessionError::Auth(_) => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    Json(SessionResponse::from(&state.sessions.current()))
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<SignUpResponse>), (StatusCode, String)> {
    let outcome = state
        .sessions
        .sign_up(&req.email, &req.password)
        .await
        .map_err(session_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            confirmation_required: outcome.needs_confirmation(),
            user: outcome.user,
            session: SessionResponse::from(&state.sessions.current()),
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    state
        .sessions
        .sign_in(&req.email, &req.password)
        .await
        .map_err(session_error)?;

    Ok(Json(SessionResponse::from(&state.sessions.current())))
}

/// Sign out. The local session is gone even when the provider call fails,
/// so that failure is only logged.
pub async fn logout(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    match state.sessions.sign_out().await {
        Ok(()) => {}
        Err(SessionError::Auth(e)) => {
            tracing::warn!("Sign-out request to auth provider failed: {}", e);
        }
        Err(e) => return Err(session_error(e)),
    }

    Ok(Json(SessionResponse::from(&state.sessions.current())))
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match state.sessions.user() {
        Some(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None => (StatusCode::UNAUTHORIZED, "Not signed in").into_response(),
    }
}
