//! API endpoints for user preferences.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};

use super::routes::AppState;
use super::types::{SettingsResponse, SystemThemeQuery, UpdateThemeRequest};

/// Create the settings API routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_settings))
        .route("/theme", put(update_theme))
        .route("/theme/toggle", post(toggle_theme))
}

/// GET /api/settings?system_prefers_dark=
async fn get_settings(
    State(state): State<Arc<AppState>>,
    Query(system): Query<SystemThemeQuery>,
) -> Json<SettingsResponse> {
    let settings = state.settings.get().await;
    Json(SettingsResponse::new(settings.theme, system.system_prefers_dark))
}

/// PUT /api/settings/theme
/// Store a theme preference; `null` goes back to following the system.
async fn update_theme(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateThemeRequest>,
) -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    state
        .settings
        .set_theme(req.theme)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(theme = ?req.theme, "Theme preference updated");
    Ok(Json(SettingsResponse::new(req.theme, req.system_prefers_dark)))
}

/// POST /api/settings/theme/toggle?system_prefers_dark=
/// Switch away from whatever theme is currently shown.
async fn toggle_theme(
    State(state): State<Arc<AppState>>,
    Query(system): Query<SystemThemeQuery>,
) -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    let theme = state
        .settings
        .toggle_theme(system.system_prefers_dark)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(?theme, "Theme toggled");
    Ok(Json(SettingsResponse::new(Some(theme), system.system_prefers_dark)))
}
