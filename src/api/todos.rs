//! Task list and suggestion endpoints.
//!
//! Every mutating endpoint answers with the snapshot taken after the
//! post-write re-fetch, so the caller always sees server state.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::routes::AppState;
use super::types::{ListQuery, RewriteRequest, SuggestionResponse, UseSuggestionResponse};
use crate::genai::GenAiErrorKind;
use crate::supabase::{SupabaseError, User};
use crate::todo::{CategoryFilter, NewTodo, TodoError, TodoSnapshot};

type ApiError = (StatusCode, String);

fn todo_error(e: TodoError) -> ApiError {
    let status = match &e {
        TodoError::Validation(_) => StatusCode::BAD_REQUEST,
        TodoError::NotSignedIn => StatusCode::UNAUTHORIZED,
        TodoError::RewriteInProgress(_) => StatusCode::CONFLICT,
        TodoError::Store(SupabaseError::NotFound(_)) => StatusCode::NOT_FOUND,
        TodoError::Store(SupabaseError::Api { status: 401, .. }) => StatusCode::UNAUTHORIZED,
        TodoError::Store(_) => StatusCode::BAD_GATEWAY,
        TodoError::Rewrite(g) | TodoError::Suggestion(g) => match g.kind {
            GenAiErrorKind::MissingApiKey => StatusCode::SERVICE_UNAVAILABLE,
            GenAiErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        },
        TodoError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string())
}

/// GET /api/todos?category=
pub async fn list_todos(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TodoSnapshot>, ApiError> {
    let result = match query.category.as_deref() {
        Some(category) => {
            let filter: CategoryFilter = category
                .parse()
                .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;
            state.todos.list(filter).await
        }
        None => state.todos.refresh().await,
    };
    result.map_err(todo_error)?;
    Ok(Json(state.todos.snapshot().await))
}

/// POST /api/todos
pub async fn add_todo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(new): Json<NewTodo>,
) -> Result<(StatusCode, Json<TodoSnapshot>), ApiError> {
    tracing::debug!(user_id = %user.id, category = %new.category, "Adding task");
    state.todos.add(new).await.map_err(todo_error)?;
    Ok((StatusCode::CREATED, Json(state.todos.snapshot().await)))
}

/// POST /api/todos/:id/toggle
pub async fn toggle_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TodoSnapshot>, ApiError> {
    state.todos.toggle_complete(id).await.map_err(todo_error)?;
    Ok(Json(state.todos.snapshot().await))
}

/// DELETE /api/todos/:id
pub async fn delete_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TodoSnapshot>, ApiError> {
    state.todos.delete(id).await.map_err(todo_error)?;
    Ok(Json(state.todos.snapshot().await))
}

/// POST /api/todos/:id/rewrite
pub async fn rewrite_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<RewriteRequest>>,
) -> Result<Json<TodoSnapshot>, ApiError> {
    let content = match body.and_then(|Json(req)| req.content) {
        Some(content) => content,
        None => state
            .todos
            .todos()
            .await
            .into_iter()
            .find(|t| t.id == id)
            .map(|t| t.content)
            .ok_or_else(|| todo_error(TodoError::Store(SupabaseError::NotFound(id))))?,
    };

    state.todos.rewrite(id, &content).await.map_err(todo_error)?;
    Ok(Json(state.todos.snapshot().await))
}

/// POST /api/suggestion
/// Suggest a task from the loaded list. On failure the panel keeps a
/// placeholder and the error is returned.
pub async fn request_suggestion(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let suggestion = state.todos.request_suggestion().await.map_err(todo_error)?;
    Ok(Json(SuggestionResponse { suggestion }))
}

/// POST /api/suggestion/use
pub async fn use_suggestion(State(state): State<Arc<AppState>>) -> Json<UseSuggestionResponse> {
    Json(UseSuggestionResponse {
        content: state.todos.use_suggestion().await,
    })
}

/// DELETE /api/suggestion
pub async fn dismiss_suggestion(State(state): State<Arc<AppState>>) -> StatusCode {
    state.todos.dismiss_suggestion().await;
    StatusCode::NO_CONTENT
}
