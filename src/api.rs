use crate::aspects::AspectResolver;
use crate::aspects::catalog::CATALOG_VERSION;
use crate::error::{ErrorClass, LookupError, ValidationError};
use crate::market::MarketValueService;
use crate::models::{ApiError, AttributeSet, LookupOptions, MarketValue, Resolved, ValuationRequest};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<AspectResolver>,
    pub market: Arc<MarketValueService>,
    pub prometheus: Option<PrometheusHandle>,
    pub metrics_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/aspects", get(aspect_set))
        .route("/aspects/makes", get(makes))
        .route("/aspects/models", get(models))
        .route("/aspects/years", get(years))
        .route("/market-value", get(market_value))
        .route("/cache", delete(clear_cache))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "motorval-api",
        "catalog_version": CATALOG_VERSION,
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let Some(handle) = &state.prometheus else {
        return (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response();
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct AspectQuery {
    #[serde(default)]
    make: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

async fn aspect_set(
    State(state): State<AppState>,
    Query(query): Query<AspectQuery>,
) -> Result<Json<AttributeSet>, AppError> {
    crate::metrics::inc_requests("/aspects");
    let set = state
        .resolver
        .resolve_set(query.make.as_deref(), query.model.as_deref())
        .await?;
    Ok(Json(set))
}

async fn makes(State(state): State<AppState>) -> Json<Resolved> {
    crate::metrics::inc_requests("/aspects/makes");
    Json(state.resolver.resolve_makes().await)
}

async fn models(
    State(state): State<AppState>,
    Query(query): Query<AspectQuery>,
) -> Result<Json<Resolved>, AppError> {
    crate::metrics::inc_requests("/aspects/models");
    let make = query.make.unwrap_or_default();
    Ok(Json(state.resolver.resolve_models(&make).await?))
}

async fn years(
    State(state): State<AppState>,
    Query(query): Query<AspectQuery>,
) -> Result<Json<Resolved>, AppError> {
    crate::metrics::inc_requests("/aspects/years");
    let make = query.make.unwrap_or_default();
    let model = query.model.unwrap_or_default();
    Ok(Json(state.resolver.resolve_years(&make, &model).await?))
}

/// Query strings carry everything as text; numbers are checked here so
/// bad input gets the same error body as every other validation failure.
#[derive(Debug, Default, Deserialize)]
struct MarketValueQuery {
    #[serde(default)]
    make: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    year: String,
    #[serde(default)]
    mileage: Option<String>,
    #[serde(default)]
    trim: Option<String>,
    #[serde(default, alias = "zip_code")]
    zip: Option<String>,
    #[serde(default)]
    force_refresh: Option<String>,
}

impl MarketValueQuery {
    fn into_parts(self) -> Result<(ValuationRequest, LookupOptions), ValidationError> {
        let mileage = match self.mileage.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                ValidationError::new("mileage", format!("`{raw}` is not a whole number"))
            })?),
            None => None,
        };
        let force_refresh = matches!(
            self.force_refresh.as_deref().map(str::trim),
            Some("1" | "true" | "yes")
        );
        let request = ValuationRequest {
            make: self.make,
            model: self.model,
            year: self.year,
            mileage,
            trim: self.trim,
            zip_code: self.zip,
        };
        Ok((request, LookupOptions { force_refresh }))
    }
}

async fn market_value(
    State(state): State<AppState>,
    Query(query): Query<MarketValueQuery>,
) -> Result<Json<MarketValue>, AppError> {
    crate::metrics::inc_requests("/market-value");
    let (request, options) = query.into_parts()?;
    let value = state.market.get_market_value(&request, options).await?;
    Ok(Json(value))
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    crate::metrics::inc_requests("/cache");
    state.resolver.refresh();
    state.market.clear().await;
    info!(target = "motorval.api", "caches cleared");
    StatusCode::NO_CONTENT
}

#[derive(Debug)]
pub enum AppError {
    Lookup(LookupError),
}

impl From<LookupError> for AppError {
    fn from(value: LookupError) -> Self {
        Self::Lookup(value)
    }
}

impl From<ValidationError> for AppError {
    fn from(value: ValidationError) -> Self {
        Self::Lookup(LookupError::Validation(value))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Lookup(err) => {
                let class = err.class();
                let status = match class {
                    ErrorClass::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorClass::InvalidInput => StatusCode::BAD_REQUEST,
                };
                let error = match class {
                    ErrorClass::RateLimited => "rate_limited",
                    ErrorClass::Unavailable => "unavailable",
                    ErrorClass::InvalidInput => "invalid_input",
                };
                let payload = ApiError {
                    error: error.to_string(),
                    detail: Some(err.to_string()),
                };
                let mut response = (status, Json(payload)).into_response();
                if let Some(secs) = err.retry_after_secs() {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
        }
    }
}
