use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::api::page;
use crate::charts::{ChartComposer, ChartOptions, SvgChartSink};
use crate::middleware::request_logging_simple;
use crate::models::Config;
use crate::scrapers::DataSourceError;
use crate::signals::{DerivedSignalSet, EmptySeriesError, SignalEngine};
use crate::store::SeriesStore;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SeriesStore>,
    pub engine: SignalEngine,
    pub default_region: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<SeriesStore>, config: &Config) -> Self {
        Self {
            store,
            engine: SignalEngine::new(config.sicktime_days),
            default_region: Arc::from(config.default_region.as_str()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/regions", get(get_regions))
        .route("/api/signals/:place", get(get_signals))
        .route("/:place", get(place_page))
        .layer(middleware::from_fn(request_logging_simple))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct ViewQuery {
    /// Log y-axis on the cumulative panels. Read leniently so a bad value
    /// still renders the page.
    log: Option<String>,
}

impl ViewQuery {
    fn log_scale(&self) -> bool {
        self.log.as_deref().is_some_and(|v| {
            matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
        })
    }
}

async fn index(
    State(state): State<AppState>,
    Query(view): Query<ViewQuery>,
) -> Result<Html<String>, PageError> {
    let region = state.default_region.to_string();
    render_dashboard(&state, region, &view).await.map_err(PageError)
}

async fn place_page(
    State(state): State<AppState>,
    Path(place): Path<String>,
    Query(view): Query<ViewQuery>,
) -> Result<Html<String>, PageError> {
    render_dashboard(&state, place, &view).await.map_err(PageError)
}

async fn render_dashboard(
    state: &AppState,
    requested: String,
    view: &ViewQuery,
) -> Result<Html<String>, ApiError> {
    let snapshot = state.store.ensure_fresh().await?;

    let region = if snapshot.contains(&requested) {
        requested
    } else {
        warn!(
            requested = %requested,
            fallback = %state.default_region,
            "Unknown region, showing default"
        );
        state.default_region.to_string()
    };

    let signals = state.engine.derive(&snapshot.resolve_region(&region))?;
    let log_scale = view.log_scale();
    let composer = ChartComposer::new(ChartOptions {
        log_scale,
        ..ChartOptions::default()
    });
    let chart = composer.render(&signals, &SvgChartSink::default())?;

    debug!(region = %region, points = signals.len(), log_scale, "Rendered dashboard");
    Ok(Html(page::dashboard(&region, snapshot.regions(), &chart, log_scale)))
}

async fn get_regions(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let snapshot = state.store.ensure_fresh().await?;
    Ok(Json(snapshot.regions().to_vec()))
}

async fn get_signals(
    State(state): State<AppState>,
    Path(place): Path<String>,
) -> Result<Json<DerivedSignalSet>, ApiError> {
    let snapshot = state.store.ensure_fresh().await?;
    if !snapshot.contains(&place) {
        return Err(ApiError::UnknownRegion(place));
    }
    let signals = state.engine.derive(&snapshot.resolve_region(&place))?;
    Ok(Json(signals))
}

async fn health_check(State(state): State<AppState>) -> String {
    match state.store.last_refresh() {
        Some(at) => format!("🚀 Coronaboard operational - series cached at {}", at.to_rfc3339()),
        None => "🚀 Coronaboard operational - series not loaded yet".to_string(),
    }
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    /// Upstream fetch or decode failed
    DataUnavailable(DataSourceError),
    /// Region has fewer than two usable dates
    NoData(EmptySeriesError),
    UnknownRegion(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NoData(_) | ApiError::UnknownRegion(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ApiError::DataUnavailable(_) => "data unavailable",
            ApiError::NoData(_) => "no data",
            ApiError::UnknownRegion(_) => "unknown region",
            ApiError::Internal(_) => "internal server error",
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::DataUnavailable(e) => e.to_string(),
            ApiError::NoData(e) => e.to_string(),
            ApiError::UnknownRegion(name) => format!("no region named {:?}", name),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }

    fn log(&self) {
        match self {
            ApiError::DataUnavailable(e) => warn!(error = %e, "Serving 503, series unavailable"),
            ApiError::Internal(e) => tracing::error!("Internal error: {:#}", e),
            ApiError::NoData(_) | ApiError::UnknownRegion(_) => {}
        }
    }
}

impl From<DataSourceError> for ApiError {
    fn from(err: DataSourceError) -> Self {
        ApiError::DataUnavailable(err)
    }
}

impl From<EmptySeriesError> for ApiError {
    fn from(err: EmptySeriesError) -> Self {
        ApiError::NoData(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<DataSourceError>() {
            Ok(e) => return ApiError::DataUnavailable(e),
            Err(err) => err,
        };
        match err.downcast::<EmptySeriesError>() {
            Ok(e) => ApiError::NoData(e),
            Err(err) => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let body = Json(json!({
            "error": self.title(),
            "detail": self.detail(),
        }));
        (self.status(), body).into_response()
    }
}

/// Same errors, rendered as an HTML page for the dashboard routes.
#[derive(Debug)]
struct PageError(ApiError);

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let PageError(err) = self;
        err.log();
        let body = Html(page::message(err.title(), &err.detail()));
        (err.status(), body).into_response()
    }
}
