//! Session manager: the authenticated identity and its lifecycle.
//!
//! State starts `Unresolved` and is resolved exactly once (by restoring a
//! persisted refresh token, or to `SignedOut`). Dependents observe it either
//! through [`SessionManager::watch`] or by registering a handler with
//! [`SessionManager::on_change`]; dropping the returned [`Subscription`]
//! unregisters the handler.
//!
//! While signed in, a background task refreshes the access token shortly
//! before it expires.

mod persist;

pub use persist::SessionFile;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::supabase::{AuthProvider, Session, SignUpOutcome, SupabaseError, User};

/// Refresh this long before the access token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Wait between refresh attempts after a transport failure. Retries stop
/// once the access token has expired.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Auth(#[from] SupabaseError),

    #[error("Email and password are required")]
    MissingCredentials,

    #[error("Not signed in")]
    NotSignedIn,
}

/// Current identity state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Initial resolution has not finished yet.
    #[default]
    Unresolved,
    SignedOut,
    SignedIn(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(s) => Some(s),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// What triggered a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    /// Initial resolution finished (to either state).
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

type Handler = Arc<dyn Fn(SessionEvent, &SessionState) + Send + Sync>;
type HandlerMap = Mutex<HashMap<u64, Handler>>;

/// Handle returned by [`SessionManager::on_change`]. Unregisters on drop.
#[must_use = "dropping the subscription unregisters the handler"]
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerMap>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            if let Ok(mut map) = handlers.lock() {
                map.remove(&self.id);
            }
        }
    }
}

/// Tracks the signed-in identity and notifies dependents on change.
pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    store: SessionFile,
    state: watch::Sender<SessionState>,
    handlers: Arc<HandlerMap>,
    next_handler_id: AtomicU64,
    resolved: OnceCell<()>,
    cancel: CancellationToken,
    /// Cancels the refresh loop of the current session. A refresh result is
    /// applied while holding this lock, so it cannot interleave with a
    /// sign-out.
    refresh_cancel: Mutex<Option<CancellationToken>>,
    /// Serializes writes to the session file.
    file_lock: AsyncMutex<()>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthProvider>, store: SessionFile) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Unresolved);
        Arc::new(Self {
            auth,
            store,
            state,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_handler_id: AtomicU64::new(0),
            resolved: OnceCell::new(),
            cancel: CancellationToken::new(),
            refresh_cancel: Mutex::new(None),
            file_lock: AsyncMutex::new(()),
        })
    }

    /// Cached state. Never blocks on the network.
    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().session().map(|s| s.access_token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    /// Observe state as a value.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Register a handler for sign-in, sign-out and token refresh.
    /// Handlers run synchronously and must not call back into the manager.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(SessionEvent, &SessionState) + Send + Sync + 'static,
    {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.handlers.lock() {
            map.insert(id, Arc::new(handler));
        }
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Resolve the initial state. Runs at most once; later calls return the
    /// already-resolved state. Failures resolve to `SignedOut`.
    pub async fn resolve(self: &Arc<Self>) -> SessionState {
        self.resolved
            .get_or_init(|| async {
                if self.current().is_resolved() {
                    // A sign-in raced ahead of resolution; keep it.
                    return;
                }
                match self.restore().await {
                    Some(session) => {
                        tracing::info!(user_id = %session.user.id, "Restored session");
                        self.set_state(
                            SessionState::SignedIn(session.clone()),
                            SessionEvent::InitialSession,
                        );
                        self.schedule_refresh(&session);
                    }
                    None => {
                        self.set_state(SessionState::SignedOut, SessionEvent::InitialSession);
                    }
                }
            })
            .await;
        self.current()
    }

    async fn restore(&self) -> Option<Session> {
        let refresh_token = self.store.load().await?;
        match self.auth.refresh_session(&refresh_token).await {
            Ok(session) => {
                self.persist(&session).await;
                Some(session)
            }
            Err(e) => {
                tracing::warn!("Failed to restore session: {}", e);
                if matches!(e, SupabaseError::Api { .. }) {
                    // The server rejected the token; it will never work again.
                    self.clear_persisted().await;
                }
                None
            }
        }
    }

    /// Create an account. Signs in when the provider returns a session;
    /// otherwise the user must confirm their email first.
    pub async fn sign_up(
        self: &Arc<Self>,
        email: &str,
        password: &str,
    ) -> Result<SignUpOutcome, SessionError> {
        let (email, password) = validate_credentials(email, password)?;
        let outcome = self.auth.sign_up(email, password).await?;
        if let Some(session) = &outcome.session {
            self.establish(session.clone()).await;
        } else {
            tracing::info!(user_id = %outcome.user.id, "Sign-up pending email confirmation");
        }
        Ok(outcome)
    }

    pub async fn sign_in(self: &Arc<Self>, email: &str, password: &str) -> Result<Session, SessionError> {
        let (email, password) = validate_credentials(email, password)?;
        let session = self.auth.sign_in_with_password(email, password).await?;
        self.establish(session.clone()).await;
        Ok(session)
    }

    /// Sign out. Local state is cleared even if the server call fails.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let access_token = self.access_token().ok_or(SessionError::NotSignedIn)?;
        self.cancel_refresh();
        self.set_state(SessionState::SignedOut, SessionEvent::SignedOut);
        self.clear_persisted().await;
        self.auth.sign_out(&access_token).await?;
        Ok(())
    }

    /// Stop background work. No handler runs after this returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.cancel_refresh();
    }

    async fn establish(self: &Arc<Self>, session: Session) {
        tracing::info!(user_id = %session.user.id, "Signed in");
        self.persist(&session).await;
        // Publish first: the refresh loop may sign out straight away.
        self.set_state(SessionState::SignedIn(session.clone()), SessionEvent::SignedIn);
        self.schedule_refresh(&session);
    }

    async fn persist(&self, session: &Session) {
        let _file = self.file_lock.lock().await;
        if let Err(e) = self.store.save(&session.refresh_token).await {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }

    async fn clear_persisted(&self) {
        let _file = self.file_lock.lock().await;
        if let Err(e) = self.store.clear().await {
            tracing::warn!("Failed to clear persisted session: {}", e);
        }
    }

    /// Apply the outcome of a background refresh unless `token` has been
    /// cancelled. Returns false when the loop must stop.
    ///
    /// The file is written before the state changes; a sign-out that lands
    /// in between cancels `token` first and clears the file after this
    /// write, since both go through `file_lock`.
    async fn apply_refresh(&self, token: &CancellationToken, outcome: Option<&Session>) -> bool {
        {
            let _file = self.file_lock.lock().await;
            if token.is_cancelled() {
                return false;
            }
            let written = match outcome {
                Some(session) => self.store.save(&session.refresh_token).await,
                None => self.store.clear().await,
            };
            if let Err(e) = written {
                tracing::warn!("Failed to update persisted session: {}", e);
            }
        }

        let Ok(_slot) = self.refresh_cancel.lock() else {
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        match outcome {
            Some(session) => {
                self.set_state(
                    SessionState::SignedIn(session.clone()),
                    SessionEvent::TokenRefreshed,
                );
                true
            }
            None => {
                self.set_state(SessionState::SignedOut, SessionEvent::SignedOut);
                false
            }
        }
    }

    fn set_state(&self, state: SessionState, event: SessionEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.send_replace(state.clone());

        let handlers: Vec<Handler> = match self.handlers.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event, &state);
        }
    }

    fn cancel_refresh(&self) {
        if let Ok(mut slot) = self.refresh_cancel.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }

    /// Start the refresh loop for `session`, replacing any previous loop.
    fn schedule_refresh(self: &Arc<Self>, session: &Session) {
        let token = self.cancel.child_token();
        if let Ok(mut slot) = self.refresh_cancel.lock() {
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let manager = Arc::downgrade(self);
        let mut session = session.clone();
        tokio::spawn(async move {
            loop {
                let delay = session
                    .expires_in(Utc::now())
                    .saturating_sub(REFRESH_MARGIN);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                let Some(manager) = manager.upgrade() else { return };
                let result = manager.auth.refresh_session(&session.refresh_token).await;
                if token.is_cancelled() {
                    return;
                }

                let remaining = session.expires_in(Utc::now());
                match result {
                    Ok(refreshed) => {
                        if !manager.apply_refresh(&token, Some(&refreshed)).await {
                            return;
                        }
                        tracing::debug!(user_id = %refreshed.user.id, "Refreshed access token");
                        session = refreshed;
                    }
                    Err(SupabaseError::Http(e)) if !remaining.is_zero() => {
                        tracing::warn!("Token refresh failed, retrying: {}", e);
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = tokio::time::sleep(REFRESH_RETRY_DELAY.min(remaining)) => {}
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Token refresh failed, signing out: {}", e);
                        manager.apply_refresh(&token, None).await;
                        return;
                    }
                }
            }
        });
    }
}

fn validate_credentials<'a>(
    email: &'a str,
    password: &'a str,
) -> Result<(&'a str, &'a str), SessionError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(SessionError::MissingCredentials);
    }
    Ok((email, password))
}
