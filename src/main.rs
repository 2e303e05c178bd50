use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod cache;
mod config;
mod deck;
mod error;
mod models;
mod pipeline;
mod projections;
mod rematch;
mod upstream;


use config::ServiceConfig;
use deck::{DeckState, SlideDeck, SlideOrder};
use error::RequestError;
use models::{DeckQuery, StatsQuery, ViewModel, WrapQuery, WrapResponse};
use pipeline::AggregationPipeline;
use rematch::{RematchRequest, RematchResult};
use upstream::{CachedHistogramSource, CachedProfileSource, MonkeytypeClient};

/// Year-in-review HTTP API.
/// Every request re-derives its view from upstream data; nothing is persisted.
#[derive(Clone)]
struct AppState {
    pipeline: AggregationPipeline,
    slide_order: SlideOrder,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let config = ServiceConfig::from_env().map_err(|e| e.to_string())?;
    init_tracing(config.log_json);

    let client = Arc::new(
        MonkeytypeClient::new(&config.upstream_base_url, config.upstream_timeout)
            .map_err(|e| e.to_string())?,
    );
    let profiles = Arc::new(CachedProfileSource::new(
        client.clone(),
        config.profile_cache_ttl,
    ));
    let histograms = Arc::new(CachedHistogramSource::new(
        client,
        config.histogram_cache_ttl,
    ));

    let state = AppState {
        pipeline: AggregationPipeline::new(profiles, histograms),
        slide_order: config.slide_order.clone(),
    };
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|e| format!("bind {} failed: {e}", config.bind))?;
    info!(addr = %config.bind, upstream = %config.upstream_base_url, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"))
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/api/wrap", get(get_wrap))
        .route("/api/deck", get(get_deck))
        .route("/api/rematch", post(post_rematch))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "Typing Wrap API v0.1.0"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Aggregated view model for one user
async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ViewModel>, RequestError> {
    let view = aggregate(&state, query.username.as_deref(), query.key.as_deref()).await?;
    Ok(Json(view))
}

/// View model plus the deck positioned at the deep-linked step
async fn get_wrap(
    State(state): State<AppState>,
    Query(query): Query<WrapQuery>,
) -> Result<Json<WrapResponse>, RequestError> {
    let view = aggregate(&state, query.username.as_deref(), query.key.as_deref()).await?;
    let deck = SlideDeck::init_from_param(state.slide_order.clone(), query.step.as_deref());

    Ok(Json(WrapResponse {
        view,
        deck: deck.state(),
    }))
}

/// Stateless navigation: rebuild from `step`, apply `action`
async fn get_deck(
    State(state): State<AppState>,
    Query(query): Query<DeckQuery>,
) -> Json<DeckState> {
    let mut deck = SlideDeck::init_from_param(state.slide_order.clone(), query.step.as_deref());
    match query.action.as_deref().map(str::trim) {
        Some("next") => deck.next(),
        Some("previous") | Some("prev") => deck.previous(),
        _ => {}
    }
    Json(deck.state())
}

async fn post_rematch(Json(req): Json<RematchRequest>) -> Json<RematchResult> {
    Json(rematch::score(&req))
}

async fn aggregate(
    state: &AppState,
    username: Option<&str>,
    credential: Option<&str>,
) -> Result<ViewModel, RequestError> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("wrap_request", request_id = %request_id);

    state
        .pipeline
        .run(username.unwrap_or_default(), credential)
        .instrument(span)
        .await
        .map_err(|error| {
            warn!(request_id = %request_id, code = error.code(), error = %error, "wrap request failed");
            RequestError { request_id, error }
        })
}
