//! Router assembly and server startup.

use std::sync::Arc;

use axum::middleware;
use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::genai::GeminiClient;
use crate::session::{SessionFile, SessionManager, SessionState};
use crate::settings::{SettingsStore, SharedSettingsStore};
use crate::supabase::{GoTrueClient, SupabaseClient};
use crate::todo::TodoStore;

use super::auth;
use super::settings as settings_api;
use super::todos;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The process-wide identity
    pub sessions: Arc<SessionManager>,
    /// Task list of the signed-in identity
    pub todos: Arc<TodoStore>,
    /// Persisted preferences
    pub settings: SharedSettingsStore,
    /// Whether a generative API key is configured
    pub ai_configured: bool,
}

/// Build the router over an existing state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/session", get(auth::get_session))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .nest("/api/settings", settings_api::routes());

    let protected_routes = Router::new()
        .route("/api/todos", get(todos::list_todos).post(todos::add_todo))
        .route("/api/todos/:id", delete(todos::delete_todo))
        .route("/api/todos/:id/toggle", post(todos::toggle_todo))
        .route("/api/todos/:id/rewrite", post(todos::rewrite_todo))
        .route(
            "/api/suggestion",
            post(todos::request_suggestion).delete(todos::dismiss_suggestion),
        )
        .route("/api/suggestion/use", post(todos::use_suggestion))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    let auth_client = Arc::new(GoTrueClient::with_client(
        http.clone(),
        &config.supabase.url,
        &config.supabase.anon_key,
    ));
    let backend = Arc::new(SupabaseClient::with_client(
        http.clone(),
        &config.supabase.url,
        &config.supabase.anon_key,
    ));
    let gemini = GeminiClient::with_client(http, &config.gemini);
    let ai_configured = gemini.is_configured();
    if !ai_configured {
        tracing::warn!("GEMINI_API_KEY not set; rewrite and suggestion requests will fail");
    }

    let state_dir = config.state_dir();
    let sessions = SessionManager::new(auth_client, SessionFile::new(&state_dir));
    let todos = TodoStore::new(
        Arc::clone(&sessions),
        backend,
        Arc::new(gemini),
        config.max_concurrent_ai,
    );
    let follower = todos.attach();
    let settings = Arc::new(SettingsStore::new(&state_dir).await);

    match sessions.resolve().await {
        SessionState::SignedIn(session) => {
            tracing::info!(user_id = %session.user.id, "Resumed previous session")
        }
        _ => tracing::info!("No active session; sign in via /api/auth/login"),
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        sessions,
        todos,
        settings,
        ai_configured,
    });
    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Cancelling in-flight requests...");
    state.todos.shutdown();
    state.sessions.shutdown();
    if let Err(e) = follower.await {
        tracing::warn!("Session follower ended abnormally: {}", e);
    }

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ai_configured: state.ai_configured,
    })
}
