//! Task store client: CRUD against the remote `todos` collection plus
//! AI-assisted rewrite and suggestion.
//!
//! # Synchronization
//! - Every mutation is followed by a full re-fetch (resync-after-write).
//! - Write+resync pairs run one at a time through `write_queue`, so two
//!   overlapping mutations cannot interleave their re-fetches.
//! - Every fetch takes a sequence number; a response older than the last
//!   applied one is dropped, so the local list always reflects the most
//!   recently issued fetch.
//! - AI calls share a bounded pool of permits.
//! - `shutdown` cancels every in-flight request; nothing touches local state
//!   afterwards.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{CategoryFilter, NewTodo, Suggestion, Todo, TodoInsert, TodoPatch};
use crate::genai::{prompts, GenAiError, TextGenerator};
use crate::session::SessionManager;
use crate::supabase::{SupabaseError, TodoBackend};

#[derive(Debug, Error)]
pub enum TodoError {
    #[error("{0}")]
    Validation(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Task {0} is already being rewritten")]
    RewriteInProgress(Uuid),

    #[error("{0}")]
    Store(#[from] SupabaseError),

    #[error("Error rewriting task: {0}")]
    Rewrite(GenAiError),

    #[error("Error getting suggestion: {0}")]
    Suggestion(GenAiError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Point-in-time view of the client's local state.
#[derive(Debug, Clone, Serialize)]
pub struct TodoSnapshot {
    pub todos: Vec<Todo>,
    pub filter: CategoryFilter,
    /// False until the first successful fetch.
    pub loaded: bool,
    /// Ids with a rewrite in flight.
    pub rewriting: Vec<Uuid>,
    pub suggestion: Suggestion,
}

#[derive(Debug, Default)]
struct TodoState {
    todos: Vec<Todo>,
    filter: CategoryFilter,
    loaded: bool,
    applied_seq: u64,
    suggestion: Suggestion,
}

/// Marks a task as being rewritten until dropped.
struct RewriteGuard<'a> {
    rewriting: &'a StdMutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for RewriteGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.rewriting.lock() {
            set.remove(&self.id);
        }
    }
}

/// Client for the signed-in user's task list.
pub struct TodoStore {
    session: Arc<SessionManager>,
    backend: Arc<dyn TodoBackend>,
    generator: Arc<dyn TextGenerator>,
    state: RwLock<TodoState>,
    write_queue: Mutex<()>,
    list_seq: AtomicU64,
    rewriting: StdMutex<HashSet<Uuid>>,
    ai_permits: Semaphore,
    cancel: CancellationToken,
}

impl TodoStore {
    pub fn new(
        session: Arc<SessionManager>,
        backend: Arc<dyn TodoBackend>,
        generator: Arc<dyn TextGenerator>,
        max_concurrent_ai: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            backend,
            generator,
            state: RwLock::new(TodoState::default()),
            write_queue: Mutex::new(()),
            list_seq: AtomicU64::new(0),
            rewriting: StdMutex::new(HashSet::new()),
            ai_permits: Semaphore::new(max_concurrent_ai.max(1)),
            cancel: CancellationToken::new(),
        })
    }

    // ==================== Local state ====================

    pub async fn todos(&self) -> Vec<Todo> {
        self.state.read().await.todos.clone()
    }

    pub async fn filter(&self) -> CategoryFilter {
        self.state.read().await.filter
    }

    pub fn rewriting(&self) -> Vec<Uuid> {
        self.rewriting
            .lock()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn suggestion(&self) -> Suggestion {
        self.state.read().await.suggestion.clone()
    }

    pub async fn snapshot(&self) -> TodoSnapshot {
        let state = self.state.read().await;
        TodoSnapshot {
            todos: state.todos.clone(),
            filter: state.filter,
            loaded: state.loaded,
            rewriting: self.rewriting(),
            suggestion: state.suggestion.clone(),
        }
    }

    /// Drop everything held for the previous identity. In-flight fetches
    /// issued before this point are discarded when they land.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let filter = state.filter;
        *state = TodoState {
            filter,
            applied_seq: self.list_seq.load(Ordering::SeqCst),
            ..Default::default()
        };
    }

    // ==================== Reads ====================

    /// Switch the category filter and fetch.
    pub async fn list(&self, filter: CategoryFilter) -> Result<Vec<Todo>, TodoError> {
        self.fetch(Some(filter)).await
    }

    /// Re-fetch with the current filter.
    pub async fn refresh(&self) -> Result<Vec<Todo>, TodoError> {
        self.fetch(None).await
    }

    /// Fetch with `filter` (or the current one). The filter and the sequence
    /// number are taken under one guard, so a higher sequence number always
    /// carries the newer filter.
    async fn fetch(&self, filter: Option<CategoryFilter>) -> Result<Vec<Todo>, TodoError> {
        let (token, user_id) = self.identity()?;
        let (filter, seq) = {
            let mut state = self.state.write().await;
            if let Some(filter) = filter {
                state.filter = filter;
            }
            (state.filter, self.list_seq.fetch_add(1, Ordering::SeqCst) + 1)
        };

        let todos = match self.cancellable(self.backend.select(&token, filter)).await? {
            Ok(todos) => todos,
            Err(e) => {
                tracing::warn!(%filter, "Failed to list todos: {}", e);
                return Err(e.into());
            }
        };

        let mut state = self.state.write().await;
        if self.cancel.is_cancelled() {
            return Err(TodoError::Cancelled);
        }
        if self.session.user().map(|u| u.id) != Some(user_id) {
            tracing::debug!(seq, "Discarding list response for a previous identity");
            return Err(TodoError::NotSignedIn);
        }
        if seq <= state.applied_seq || filter != state.filter {
            tracing::debug!(seq, applied = state.applied_seq, "Discarding stale list response");
            return Ok(state.todos.clone());
        }

        state.applied_seq = seq;
        state.todos = todos.clone();
        state.loaded = true;
        Ok(todos)
    }

    // ==================== Writes ====================

    /// Insert a task owned by the current identity.
    pub async fn add(&self, new: NewTodo) -> Result<(), TodoError> {
        let content = new.content.trim();
        if content.is_empty() {
            return Err(TodoError::Validation(
                "Task content cannot be empty".to_string(),
            ));
        }
        let (category, priority, due_date) = (new.category, new.priority, new.due_date);

        self.write_and_resync("add", |token, user_id| async move {
            let row = TodoInsert {
                user_id,
                content,
                category,
                priority,
                due_date,
            };
            self.backend
                .insert(&token, &row)
                .await
                .map_err(TodoError::from)
        })
        .await
    }

    /// Flip `is_completed` from its current server-side value.
    pub async fn toggle_complete(&self, id: Uuid) -> Result<(), TodoError> {
        self.write_and_resync("toggle", |token, _| async move {
            let current = self.backend.get(&token, id).await?;
            self.backend
                .update(&token, id, &TodoPatch::completed(!current.is_completed))
                .await?;
            Ok::<(), TodoError>(())
        })
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), TodoError> {
        self.write_and_resync("delete", |token, _| async move {
            self.backend
                .delete(&token, id)
                .await
                .map_err(TodoError::from)
        })
        .await
    }

    /// Ask the model for a clearer version of a task and store it.
    /// Content is untouched if either the model or the store fails.
    pub async fn rewrite(&self, id: Uuid, current_content: &str) -> Result<(), TodoError> {
        let _in_flight = self.begin_rewrite(id)?;

        let rewritten = {
            let _permit = self.acquire_ai_permit().await?;
            let raw = self
                .cancellable(self.generator.generate(
                    &prompts::rewrite_prompt(current_content),
                    prompts::REWRITE_OPTIONS,
                ))
                .await?
                .map_err(|e| {
                    tracing::error!(%id, "Rewrite failed: {}", e);
                    TodoError::Rewrite(e)
                })?;
            prompts::clean_rewrite(&raw)
        };

        if rewritten.is_empty() {
            return Err(TodoError::Rewrite(GenAiError::empty_response()));
        }

        self.write_and_resync("rewrite", |token, _| async move {
            self.backend
                .update(&token, id, &TodoPatch::content(rewritten))
                .await
                .map_err(TodoError::from)
        })
        .await?;

        tracing::info!(%id, "Rewrote task");
        Ok(())
    }

    /// Run one write under the queue, then re-fetch. A failed write skips
    /// the re-fetch, leaving local state at the last successful fetch.
    async fn write_and_resync<F, Fut>(&self, op: &'static str, write: F) -> Result<(), TodoError>
    where
        F: FnOnce(String, Uuid) -> Fut,
        Fut: Future<Output = Result<(), TodoError>>,
    {
        let _queued = self.cancellable(self.write_queue.lock()).await?;
        let (token, user_id) = self.identity()?;

        if let Err(e) = self.cancellable(write(token, user_id)).await? {
            tracing::warn!(op, "Write failed: {}", e);
            return Err(e);
        }

        tracing::debug!(op, "Write committed, resyncing");
        self.refresh().await?;
        Ok(())
    }

    // ==================== Suggestions ====================

    /// Ask the model for a new task related to `existing`. Not persisted.
    pub async fn suggest<S: AsRef<str>>(&self, existing: &[S]) -> Result<String, TodoError> {
        let _permit = self.acquire_ai_permit().await?;
        let raw = self
            .cancellable(self.generator.generate(
                &prompts::suggest_prompt(existing),
                prompts::SUGGEST_OPTIONS,
            ))
            .await?
            .map_err(TodoError::Suggestion)?;

        let suggestion = prompts::clean_suggestion(&raw);
        if suggestion.is_empty() {
            return Err(TodoError::Suggestion(GenAiError::empty_response()));
        }
        Ok(suggestion)
    }

    /// Suggest from the loaded tasks and show the result. On failure the
    /// panel shows a placeholder and the error is returned.
    pub async fn request_suggestion(&self) -> Result<String, TodoError> {
        let existing: Vec<String> = {
            let mut state = self.state.write().await;
            state.suggestion = Suggestion {
                text: String::new(),
                visible: true,
            };
            state.todos.iter().map(|t| t.content.clone()).collect()
        };

        let result = self.suggest(&existing).await;
        if matches!(result, Err(TodoError::Cancelled)) {
            return result;
        }

        let mut state = self.state.write().await;
        match &result {
            Ok(text) => state.suggestion.text = text.clone(),
            Err(e) => {
                tracing::warn!("Suggestion failed: {}", e);
                state.suggestion.text = prompts::SUGGESTION_FAILED.to_string();
            }
        }
        result
    }

    /// Take the shown suggestion as new-task input and hide the panel.
    pub async fn use_suggestion(&self) -> Option<String> {
        let mut state = self.state.write().await;
        let suggestion = &state.suggestion;
        if !suggestion.visible
            || suggestion.text.is_empty()
            || suggestion.text == prompts::SUGGESTION_FAILED
        {
            return None;
        }
        state.suggestion.visible = false;
        Some(state.suggestion.text.clone())
    }

    pub async fn dismiss_suggestion(&self) {
        self.state.write().await.suggestion.visible = false;
    }

    // ==================== Lifecycle ====================

    /// Follow the session: re-fetch when an identity signs in, clear on
    /// sign-out. Token refreshes for the same identity are ignored.
    pub fn attach(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let mut rx = self.session.watch();

        tokio::spawn(async move {
            let mut last_user = None;
            let mut pending = true;
            loop {
                if !pending {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                pending = false;

                let user = rx.borrow_and_update().user().map(|u| u.id);
                if user == last_user {
                    continue;
                }
                last_user = user;

                let Some(store) = weak.upgrade() else { return };
                match user {
                    Some(user_id) => {
                        store.clear().await;
                        if let Err(e) = store.refresh().await {
                            tracing::warn!(%user_id, "Initial todo fetch failed: {}", e);
                        }
                    }
                    None => store.clear().await,
                }
            }
        })
    }

    /// Cancel every in-flight request.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ==================== Helpers ====================

    fn identity(&self) -> Result<(String, Uuid), TodoError> {
        let state = self.session.current();
        let session = state.session().ok_or(TodoError::NotSignedIn)?;
        Ok((session.access_token.clone(), session.user.id))
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, TodoError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TodoError::Cancelled),
            out = fut => Ok(out),
        }
    }

    async fn acquire_ai_permit(&self) -> Result<SemaphorePermit<'_>, TodoError> {
        self.cancellable(self.ai_permits.acquire())
            .await?
            .map_err(|_| TodoError::Cancelled)
    }

    fn begin_rewrite(&self, id: Uuid) -> Result<RewriteGuard<'_>, TodoError> {
        let mut set = self
            .rewriting
            .lock()
            .map_err(|_| TodoError::RewriteInProgress(id))?;
        if !set.insert(id) {
            return Err(TodoError::RewriteInProgress(id));
        }
        Ok(RewriteGuard {
            rewriting: &self.rewriting,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genai::GenAiErrorKind;
    use crate::session::{SessionFile, SessionState};
    use crate::testing::{BackendOp, FakeAuth, FakeGenerator, MemoryBackend};
    use crate::todo::{Category, Priority};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        backend: Arc<MemoryBackend>,
        generator: Arc<FakeGenerator>,
        sessions: Arc<SessionManager>,
        store: Arc<TodoStore>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let auth = Arc::new(FakeAuth::new());
        auth.register("a@b.c", "secret");
        let sessions = SessionManager::new(auth, SessionFile::new(dir.path()));
        sessions.resolve().await;
        sessions.sign_in("a@b.c", "secret").await.unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let generator = Arc::new(FakeGenerator::new());
        let store = TodoStore::new(
            Arc::clone(&sessions),
            backend.clone(),
            generator.clone(),
            2,
        );
        Harness {
            _dir: dir,
            backend,
            generator,
            sessions,
            store,
        }
    }

    async fn add(h: &Harness, content: &str, category: Category) -> Todo {
        h.store
            .add(NewTodo::new(content).with_category(category))
            .await
            .unwrap();
        h.store
            .todos()
            .await
            .into_iter()
            .find(|t| t.content == content)
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_then_list_includes_new_task() {
        let h = harness().await;
        let due = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        h.store
            .add(
                NewTodo::new("  buy milk ")
                    .with_category(Category::Shopping)
                    .with_priority(Priority::High)
                    .with_due_date(due),
            )
            .await
            .unwrap();

        let todos = h.store.todos().await;
        assert_eq!(todos.len(), 1);
        let todo = &todos[0];
        assert_eq!(todo.content, "buy milk");
        assert_eq!(todo.category, Category::Shopping);
        assert_eq!(todo.priority, Priority::High);
        assert_eq!(todo.due_date, Some(due));
        assert!(!todo.is_completed);
        assert_eq!(Some(todo.user_id), h.sessions.user().map(|u| u.id));
        assert!(h.store.snapshot().await.loaded);
    }

    #[tokio::test]
    async fn test_add_rejects_empty_content_without_remote_call() {
        let h = harness().await;
        let err = h.store.add(NewTodo::new("   ")).await.unwrap_err();
        assert!(matches!(err, TodoError::Validation(_)));
        assert!(h.backend.rows().is_empty());
        assert_eq!(h.backend.select_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_flips_only_completion_and_is_idempotent_in_pairs() {
        let h = harness().await;
        let before = add(&h, "walk dog", Category::Health).await;

        h.store.toggle_complete(before.id).await.unwrap();
        let after = h.store.todos().await.remove(0);
        assert!(after.is_completed);
        assert_eq!(
            Todo {
                is_completed: false,
                ..after.clone()
            },
            before
        );

        h.store.toggle_complete(before.id).await.unwrap();
        assert_eq!(h.store.todos().await.remove(0), before);
    }

    #[tokio::test]
    async fn test_toggle_unknown_id_fails() {
        let h = harness().await;
        let err = h.store.toggle_complete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TodoError::Store(SupabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_task() {
        let h = harness().await;
        let a = add(&h, "a", Category::Work).await;
        let b = add(&h, "b", Category::Work).await;

        h.store.delete(a.id).await.unwrap();
        let ids: Vec<Uuid> = h.store.todos().await.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id]);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_filtered() {
        let h = harness().await;
        add(&h, "first", Category::Work).await;
        add(&h, "second", Category::Personal).await;
        add(&h, "third", Category::Work).await;

        let all = h.store.list(CategoryFilter::All).await.unwrap();
        let contents: Vec<&str> = all.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["third", "second", "first"]);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let work = h.store.list(CategoryFilter::Only(Category::Work)).await.unwrap();
        assert_eq!(work.len(), 2);
        assert!(work.iter().all(|t| t.category == Category::Work));
        assert_eq!(h.store.filter().await, CategoryFilter::Only(Category::Work));

        // Writes resync with the active filter.
        h.store.add(NewTodo::new("fourth")).await.unwrap();
        assert_eq!(h.store.todos().await.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_racing_filter_change_keeps_rows_matching_filter() {
        let h = harness().await;
        add(&h, "gym", Category::Health).await;
        add(&h, "report", Category::Work).await;

        let before = h.backend.select_count();
        h.backend.delay_selects(&[Duration::from_millis(50)]);
        let refresher = {
            let store = Arc::clone(&h.store);
            tokio::spawn(async move { store.refresh().await })
        };
        let backend = &h.backend;
        wait_until(|| async move { backend.select_count() > before }).await;

        let work = h.store.list(CategoryFilter::Only(Category::Work)).await.unwrap();
        assert_eq!(work.len(), 1);
        refresher.await.unwrap().unwrap();

        let snapshot = h.store.snapshot().await;
        assert_eq!(snapshot.filter, CategoryFilter::Only(Category::Work));
        assert!(snapshot.todos.iter().all(|t| t.category == Category::Work));
        assert_eq!(snapshot.todos.len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_content_only() {
        let h = harness().await;
        let before = add(&h, "buy milk", Category::Shopping).await;
        h.generator.respond(Ok("\"Purchase milk from the store\""));

        h.store.rewrite(before.id, &before.content).await.unwrap();

        let after = h.store.todos().await.remove(0);
        assert_eq!(after.content, "Purchase milk from the store");
        assert_eq!(after.id, before.id);
        assert_eq!(after.category, before.category);
        assert_eq!(after.priority, before.priority);
        assert_eq!(after.due_date, before.due_date);

        let sent = h.generator.prompts();
        assert!(sent[0].0.ends_with("Rewrite this todo task: \"buy milk\""));
        assert_eq!(sent[0].1, prompts::REWRITE_OPTIONS);
        assert!(h.store.rewriting().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_ai_failure_leaves_content() {
        let h = harness().await;
        let before = add(&h, "buy milk", Category::Shopping).await;
        h.generator.respond(Err(GenAiError::http(
            429,
            "Gemini API error: Resource has been exhausted".to_string(),
        )));

        let err = h.store.rewrite(before.id, &before.content).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error rewriting task: Gemini API error: Resource has been exhausted"
        );
        assert_eq!(h.store.todos().await.remove(0).content, "buy milk");
        assert_eq!(h.backend.row(before.id).unwrap().content, "buy milk");
        assert!(h.store.rewriting().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_empty_after_cleanup_is_rejected() {
        let h = harness().await;
        let before = add(&h, "buy milk", Category::Shopping).await;
        h.generator.respond(Ok("\"\""));

        let err = h.store.rewrite(before.id, &before.content).await.unwrap_err();
        assert!(matches!(err, TodoError::Rewrite(ref e) if e.kind == GenAiErrorKind::EmptyResponse));
        assert_eq!(h.backend.row(before.id).unwrap().content, "buy milk");
    }

    #[tokio::test]
    async fn test_failed_write_keeps_last_good_state() {
        let h = harness().await;
        let todo = add(&h, "buy milk", Category::Shopping).await;
        let selects = h.backend.select_count();

        h.backend.fail_next(BackendOp::Update, "permission denied for table todos");
        h.generator.respond(Ok("Purchase milk"));
        let err = h.store.rewrite(todo.id, &todo.content).await.unwrap_err();
        assert_eq!(err.to_string(), "permission denied for table todos");

        h.backend.fail_next(BackendOp::Delete, "network unreachable");
        assert!(h.store.delete(todo.id).await.is_err());

        // No resync after a failed write.
        assert_eq!(h.backend.select_count(), selects);
        assert_eq!(h.store.todos().await, vec![todo]);
    }

    #[tokio::test]
    async fn test_failed_list_keeps_last_good_state() {
        let h = harness().await;
        let todo = add(&h, "buy milk", Category::Shopping).await;

        h.backend.fail_next(BackendOp::Select, "connection reset");
        assert!(h.store.refresh().await.is_err());
        assert_eq!(h.store.todos().await, vec![todo]);
    }

    #[tokio::test]
    async fn test_suggest_then_add() {
        let h = harness().await;
        h.generator.respond(Ok("  Buy dog food\n"));

        let suggestion = h.store.suggest(&["buy milk", "walk dog"]).await.unwrap();
        assert_eq!(suggestion, "Buy dog food");
        let sent = h.generator.prompts();
        assert!(sent[0].0.contains("\"buy milk, walk dog\""));
        assert_eq!(sent[0].1, prompts::SUGGEST_OPTIONS);

        h.store.add(NewTodo::new(suggestion)).await.unwrap();
        assert_eq!(h.store.todos().await[0].content, "Buy dog food");
    }

    #[tokio::test]
    async fn test_suggestion_panel_lifecycle() {
        let h = harness().await;
        add(&h, "buy milk", Category::Shopping).await;
        h.generator.respond(Ok("Buy bread"));

        h.store.request_suggestion().await.unwrap();
        assert_eq!(
            h.store.suggestion().await,
            Suggestion {
                text: "Buy bread".to_string(),
                visible: true
            }
        );
        assert!(h.generator.prompts()[0].0.contains("\"buy milk\""));

        assert_eq!(h.store.use_suggestion().await.as_deref(), Some("Buy bread"));
        assert!(!h.store.suggestion().await.visible);
        assert_eq!(h.store.use_suggestion().await, None);
    }

    #[tokio::test]
    async fn test_suggestion_failure_shows_placeholder() {
        let h = harness().await;
        h.generator.respond(Err(GenAiError::http(
            500,
            "Gemini API error: Internal error".to_string(),
        )));

        let err = h.store.request_suggestion().await.unwrap_err();
        assert!(err.to_string().starts_with("Error getting suggestion:"));

        let suggestion = h.store.suggestion().await;
        assert!(suggestion.visible);
        assert_eq!(suggestion.text, prompts::SUGGESTION_FAILED);
        assert_eq!(h.store.use_suggestion().await, None);

        h.store.dismiss_suggestion().await;
        assert!(!h.store.suggestion().await.visible);
    }

    #[tokio::test]
    async fn test_concurrent_rewrite_of_same_task_is_rejected() {
        let h = harness().await;
        let todo = add(&h, "buy milk", Category::Shopping).await;
        h.generator.set_delay(Duration::from_millis(50));

        let (first, second) = tokio::join!(
            h.store.rewrite(todo.id, &todo.content),
            h.store.rewrite(todo.id, &todo.content),
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(TodoError::RewriteInProgress(id)) if id == todo.id));
        assert!(h.store.rewriting().is_empty());
    }

    #[tokio::test]
    async fn test_ai_calls_are_bounded() {
        let h = harness().await;
        let mut todos = Vec::new();
        for name in ["a", "b", "c", "d"] {
            todos.push(add(&h, name, Category::Work).await);
        }
        h.generator.set_delay(Duration::from_millis(30));

        let (a, b, c, d) = tokio::join!(
            h.store.rewrite(todos[0].id, "a"),
            h.store.rewrite(todos[1].id, "b"),
            h.store.rewrite(todos[2].id, "c"),
            h.store.rewrite(todos[3].id, "d"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
        assert_eq!(h.generator.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_stale_list_response_is_discarded() {
        let h = harness().await;
        add(&h, "report", Category::Work).await;
        add(&h, "gym", Category::Health).await;

        // The first (work-only) fetch lands after the second (all) fetch.
        h.backend
            .delay_selects(&[Duration::from_millis(80), Duration::from_millis(0)]);
        let (work, all) = tokio::join!(
            h.store.list(CategoryFilter::Only(Category::Work)),
            h.store.list(CategoryFilter::All),
        );
        assert_eq!(all.unwrap().len(), 2);
        // The late response is not applied.
        assert_eq!(work.unwrap().len(), 2);

        let snapshot = h.store.snapshot().await;
        assert_eq!(snapshot.filter, CategoryFilter::All);
        assert_eq!(snapshot.todos.len(), 2);
    }

    #[tokio::test]
    async fn test_requires_session() {
        let h = harness().await;
        h.sessions.sign_out().await.unwrap();

        assert!(matches!(h.store.refresh().await, Err(TodoError::NotSignedIn)));
        assert!(matches!(
            h.store.add(NewTodo::new("x")).await,
            Err(TodoError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_rewrite() {
        let h = harness().await;
        let todo = add(&h, "buy milk", Category::Shopping).await;
        h.generator.set_delay(Duration::from_secs(10));

        let handle = {
            let store = Arc::clone(&h.store);
            let id = todo.id;
            tokio::spawn(async move { store.rewrite(id, "buy milk").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.store.shutdown();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TodoError::Cancelled)));
        assert_eq!(h.backend.row(todo.id).unwrap().content, "buy milk");
        assert!(h.store.rewriting().is_empty());
    }

    #[tokio::test]
    async fn test_attach_follows_session() {
        let h = harness().await;
        add(&h, "buy milk", Category::Shopping).await;
        h.store.clear().await;

        let store = &h.store;
        let _watcher = store.attach();
        wait_until(|| async move { store.todos().await.len() == 1 }).await;

        h.sessions.sign_out().await.unwrap();
        assert_eq!(h.sessions.current(), SessionState::SignedOut);
        wait_until(|| async move { store.todos().await.is_empty() }).await;
        assert!(!store.snapshot().await.loaded);

        h.sessions.sign_in("a@b.c", "secret").await.unwrap();
        wait_until(|| async move { store.todos().await.len() == 1 }).await;

        h.store.shutdown();
        h.sessions.shutdown();
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }
}
