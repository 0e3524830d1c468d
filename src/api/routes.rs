use axum::{
    routing::{get, post},
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
};
use serde_json::{json, Value};
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::models::{ScrapeRequest, ScrapeResponse};
use crate::api::response;
use crate::auth::{authorize, validate_channel_id};
use crate::error::{AppError, Result};
use crate::scraper::scrape_channel;
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/scrape", post(scrape_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Auth and input checks run before any browser is launched.
async fn scrape_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScrapeResponse>)> {
    let start_time = std::time::Instant::now();

    let header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    authorize(state.config.api_secret.as_deref(), header)?;

    let Json(req) = payload.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let channel_id = validate_channel_id(req.channel_id.as_deref())?;

    info!(channel_id, "Processing scrape request");
    let result = scrape_channel(state.launcher.as_ref(), &state.config, channel_id).await?;

    info!(
        channel_id,
        days = result.daily_stats.len(),
        elapsed = ?start_time.elapsed(),
        "Scrape completed"
    );
    Ok(response::success(result))
}
