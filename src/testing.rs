//! In-memory collaborators for unit tests.
//!
//! `FakeAuth` issues access tokens of the form `{user_id}:{n}`, and
//! `MemoryBackend` scopes rows by the user id in that prefix, which stands in
//! for row-level security.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::genai::{GenAiError, GenerationOptions, TextGenerator};
use crate::supabase::{AuthProvider, Session, SignUpOutcome, SupabaseError, TodoBackend, User};
use crate::todo::{CategoryFilter, Todo, TodoInsert, TodoPatch};

fn api_error(status: u16, message: &str) -> SupabaseError {
    SupabaseError::Api {
        status,
        message: message.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

struct FakeAuthState {
    accounts: HashMap<String, (String, User)>,
    refresh_tokens: HashMap<String, User>,
    issued: u64,
    ttl: chrono::Duration,
    require_confirmation: bool,
}

pub struct FakeAuth {
    state: Mutex<FakeAuthState>,
    refresh_delay: Mutex<Option<Duration>>,
    refresh_transport_failures: AtomicUsize,
    refreshes: AtomicUsize,
}

/// A transport-level error, as produced when the auth server is unreachable.
pub fn transport_error() -> SupabaseError {
    match reqwest::Client::new().get("http://").build() {
        Err(e) => SupabaseError::Http(e),
        Ok(_) => unreachable!("an empty host never builds"),
    }
}

impl FakeAuth {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeAuthState {
                accounts: HashMap::new(),
                refresh_tokens: HashMap::new(),
                issued: 0,
                ttl: chrono::Duration::hours(1),
                require_confirmation: false,
            }),
            refresh_delay: Mutex::new(None),
            refresh_transport_failures: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Delay every refresh call, keeping it in flight.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    /// Make the next `count` refresh calls fail as if the network were down.
    pub fn fail_refresh_transport(&self, count: usize) {
        self.refresh_transport_failures.store(count, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn register(&self, email: &str, password: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(email.to_string(), (password.to_string(), user.clone()));
        user
    }

    pub fn set_token_ttl(&self, ttl: chrono::Duration) {
        self.state.lock().unwrap().ttl = ttl;
    }

    pub fn require_confirmation(&self, required: bool) {
        self.state.lock().unwrap().require_confirmation = required;
    }

    fn issue(state: &mut FakeAuthState, user: &User) -> Session {
        state.issued += 1;
        let refresh_token = format!("refresh-{}", state.issued);
        state.refresh_tokens.insert(refresh_token.clone(), user.clone());
        Session {
            access_token: format!("{}:{}", user.id, state.issued),
            refresh_token,
            expires_at: Utc::now() + state.ttl,
            user: user.clone(),
        }
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, SupabaseError> {
        let mut state = self.state.lock().unwrap();
        if state.accounts.contains_key(email) {
            return Err(api_error(422, "User already registered"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        state
            .accounts
            .insert(email.to_string(), (password.to_string(), user.clone()));
        let session = if state.require_confirmation {
            None
        } else {
            Some(Self::issue(&mut state, &user))
        };
        Ok(SignUpOutcome { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError> {
        let mut state = self.state.lock().unwrap();
        let user = match state.accounts.get(email) {
            Some((expected, user)) if expected == password => user.clone(),
            _ => return Err(api_error(400, "Invalid login credentials")),
        };
        Ok(Self::issue(&mut state, &user))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .refresh_transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(transport_error());
        }

        let mut state = self.state.lock().unwrap();
        let user = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| api_error(400, "Invalid Refresh Token: Refresh Token Not Found"))?;
        Ok(Self::issue(&mut state, &user))
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), SupabaseError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

/// Which backend call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Select,
    Get,
    Insert,
    Update,
    Delete,
}

pub struct MemoryBackend {
    rows: Mutex<Vec<Todo>>,
    clock: Mutex<DateTime<Utc>>,
    failures: Mutex<HashMap<BackendOp, String>>,
    select_delays: Mutex<VecDeque<Duration>>,
    selects: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            clock: Mutex::new(
                DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now),
            ),
            failures: Mutex::new(HashMap::new()),
            select_delays: Mutex::new(VecDeque::new()),
            selects: AtomicUsize::new(0),
        }
    }

    /// Make the next call of `op` fail with `message`.
    pub fn fail_next(&self, op: BackendOp, message: &str) {
        self.failures.lock().unwrap().insert(op, message.to_string());
    }

    /// Delay upcoming selects, one entry per call.
    pub fn delay_selects(&self, delays: &[Duration]) {
        self.select_delays.lock().unwrap().extend(delays.iter().copied());
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<Todo> {
        self.rows.lock().unwrap().clone()
    }

    pub fn row(&self, id: Uuid) -> Option<Todo> {
        self.rows.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    fn owner(access_token: &str) -> Result<Uuid, SupabaseError> {
        access_token
            .split(':')
            .next()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| api_error(401, "JWT is invalid"))
    }

    fn take_failure(&self, op: BackendOp) -> Result<(), SupabaseError> {
        match self.failures.lock().unwrap().remove(&op) {
            Some(message) => Err(api_error(500, &message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TodoBackend for MemoryBackend {
    async fn select(
        &self,
        access_token: &str,
        filter: CategoryFilter,
    ) -> Result<Vec<Todo>, SupabaseError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let delay = self.select_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.take_failure(BackendOp::Select)?;
        let owner = Self::owner(access_token)?;
        let mut rows: Vec<Todo> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.user_id == owner && filter.matches(t.category))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get(&self, access_token: &str, id: Uuid) -> Result<Todo, SupabaseError> {
        self.take_failure(BackendOp::Get)?;
        let owner = Self::owner(access_token)?;
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id && t.user_id == owner)
            .cloned()
            .ok_or(SupabaseError::NotFound(id))
    }

    async fn insert(&self, access_token: &str, row: &TodoInsert<'_>) -> Result<(), SupabaseError> {
        self.take_failure(BackendOp::Insert)?;
        let owner = Self::owner(access_token)?;
        if row.user_id != owner {
            return Err(api_error(
                403,
                "new row violates row-level security policy for table \"todos\"",
            ));
        }
        let created_at = {
            let mut clock = self.clock.lock().unwrap();
            *clock += chrono::Duration::seconds(1);
            *clock
        };
        self.rows.lock().unwrap().push(Todo {
            id: Uuid::new_v4(),
            user_id: row.user_id,
            content: row.content.to_string(),
            category: row.category,
            priority: row.priority,
            due_date: row.due_date,
            is_completed: false,
            created_at,
        });
        Ok(())
    }

    async fn update(
        &self,
        access_token: &str,
        id: Uuid,
        patch: &TodoPatch,
    ) -> Result<(), SupabaseError> {
        self.take_failure(BackendOp::Update)?;
        let owner = Self::owner(access_token)?;
        let mut rows = self.rows.lock().unwrap();
        // PostgREST updates zero rows silently when the filter matches nothing.
        if let Some(todo) = rows.iter_mut().find(|t| t.id == id && t.user_id == owner) {
            if let Some(content) = &patch.content {
                todo.content = content.clone();
            }
            if let Some(is_completed) = patch.is_completed {
                todo.is_completed = is_completed;
            }
        }
        Ok(())
    }

    async fn delete(&self, access_token: &str, id: Uuid) -> Result<(), SupabaseError> {
        self.take_failure(BackendOp::Delete)?;
        let owner = Self::owner(access_token)?;
        self.rows
            .lock()
            .unwrap()
            .retain(|t| !(t.id == id && t.user_id == owner));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator
// ─────────────────────────────────────────────────────────────────────────────

pub struct FakeGenerator {
    responses: Mutex<VecDeque<Result<String, GenAiError>>>,
    prompts: Mutex<Vec<(String, GenerationOptions)>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, response: Result<&str, GenAiError>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(response.map(str::to_string));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn prompts(&self) -> Vec<(String, GenerationOptions)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenAiError> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), options));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Generated task".to_string()))
    }
}
