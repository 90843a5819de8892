use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use market_data::{FallbackProvider, SourceHealth};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::EngineError;
use crate::prediction::{AssetVolatility, EngineStatus, Prediction, PredictionService};
use crate::regime::MarketRegime;

/// Application state shared across handlers
pub struct AppState {
    pub predictions: PredictionService,
    pub market_data: Arc<FallbackProvider>,
}

/// Query params for the prediction endpoint
#[derive(Debug, Deserialize)]
pub struct PredictionQuery {
    #[serde(default = "default_horizon")]
    horizon: i64,
}

fn default_horizon() -> i64 {
    1
}

fn error_response(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::UnknownAsset(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidHorizon(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("Request failed ({}): {}", status, e);
    (status, e.to_string())
}

/// GET /predictions/:symbol?horizon=N
pub async fn get_prediction(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<PredictionQuery>,
) -> Result<Json<Prediction>, (StatusCode, String)> {
    state
        .predictions
        .get_prediction(&symbol, query.horizon)
        .map(Json)
        .map_err(error_response)
}

/// GET /volatilities
pub async fn get_volatilities(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, AssetVolatility>> {
    Json(state.predictions.get_all_volatilities())
}

#[derive(Debug, Serialize)]
pub struct RegimeResponse {
    pub regime: Option<MarketRegime>,
}

/// GET /regime - None until the first cycle completes
pub async fn get_regime(State(state): State<Arc<AppState>>) -> Json<RegimeResponse> {
    Json(RegimeResponse {
        regime: state.predictions.regime(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub engine: EngineStatus,
    pub sources: Vec<SourceHealth>,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engine = state.predictions.status();
    let status = if engine.cycle == 0 {
        "starting"
    } else if engine.degraded_assets.is_empty() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        engine,
        sources: state.market_data.health_check().await,
    })
}

/// Build the read API router
pub fn router(predictions: PredictionService, market_data: Arc<FallbackProvider>) -> Router {
    let state = Arc::new(AppState {
        predictions,
        market_data,
    });

    Router::new()
        .route("/predictions/:symbol", get(get_prediction))
        .route("/volatilities", get(get_volatilities))
        .route("/regime", get(get_regime))
        .route("/health", get(health_check))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
