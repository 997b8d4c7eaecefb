use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use pricing_core::{ModelMetrics, ProductAttributes};
use pricing_service::{
    ModelStatus, PricePrediction, PricingError, PricingService, ProductPage, ProductQuery,
    ProductSummary, UploadReport,
};
use pricing_trainer::DataError;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// HTTP-facing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bearer token required by `/train` and `/upload-data`; open when unset
    pub admin_token: Option<String>,
    /// CORS origins; any origin when empty
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            admin_token: None,
            allowed_origins: Vec::new(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PricingService>,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
    /// Digest of the admin token; compared in constant time
    admin_token_hash: Option<blake3::Hash>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: Arc<PricingService>, config: &ApiConfig) -> Self {
        Self {
            service,
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
            admin_token_hash: config
                .admin_token
                .as_deref()
                .filter(|token| !token.is_empty())
                .map(|token| blake3::hash(token.as_bytes())),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check the bearer token when one is configured
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.admin_token_hash else {
            return Ok(());
        };

        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match provided {
            Some(token) if blake3::hash(token.as_bytes()) == *expected => Ok(()),
            Some(_) => Err(ApiError::new(StatusCode::FORBIDDEN, "invalid admin token")),
            None => Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "admin bearer token required",
            )),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    endpoints: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    model_loaded: bool,
    model: ModelStatus,
    req_total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub message: String,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub stats: UploadReport,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    missing_columns: Option<Vec<String>>,
    validation_errors: Option<Vec<String>>,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
            missing_columns: None,
            validation_errors: None,
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<PricingError> for ApiError {
    fn from(err: PricingError) -> Self {
        let message = err.to_string();
        match err {
            PricingError::Data(DataError::MissingColumns { missing }) => Self {
                missing_columns: Some(missing),
                ..Self::bad_request(message)
            },
            PricingError::Data(DataError::Validation { errors }) => Self {
                validation_errors: Some(errors),
                ..Self::bad_request(message)
            },
            PricingError::Data(_) | PricingError::InvalidQuery(_) => Self::bad_request(message),
            PricingError::Prediction(pricing_service::PredictionError::UnseenCategory {
                ..
            }) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, message),
            PricingError::Prediction(_) => Self::bad_request(message),
            PricingError::ModelNotLoaded => Self::service_unavailable(message),
            PricingError::MetricsUnavailable | PricingError::ProductNotFound(_) => {
                Self::not_found(message)
            }
            PricingError::Config(_)
            | PricingError::Training(_)
            | PricingError::Storage(_)
            | PricingError::Internal(_) => {
                warn!(error = %message, "Request failed");
                Self::internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
            missing_columns: self.missing_columns,
            validation_errors: self.validation_errors,
        });
        (self.status, payload).into_response()
    }
}

pub async fn start_server<F>(
    state: AppState,
    config: &ApiConfig,
    addr: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(Arc::new(state), config)?;
    let listener = bind_listener(addr).await?;
    info!("Pricing API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("pricing API server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind API listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind API listener on {addr}"))
    }
}

pub fn build_router(state: SharedState, config: &ApiConfig) -> Result<Router> {
    let cors = cors_layer(&config.allowed_origins)?;

    let router = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/predict", post(handle_predict))
        .route("/train", post(handle_train))
        .route("/metrics", get(handle_metrics))
        .route("/upload-data", post(handle_upload))
        .route("/products", get(handle_list_products))
        .route("/products/:id", get(handle_get_product))
        .route("/prometheus", get(handle_prometheus));

    Ok(router
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let values = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(values)))
}

async fn handle_root(State(state): State<SharedState>) -> Json<RootResponse> {
    state.record_request();
    Json(RootResponse {
        message: "Dynamic Pricing API",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "GET /health",
            "POST /predict",
            "POST /train",
            "GET /metrics",
            "POST /upload-data",
            "GET /products",
            "GET /products/:id",
            "GET /prometheus",
        ],
    })
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request();
    let model = state.service.status();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_seconds(),
        model_loaded: model.loaded,
        model,
        req_total,
    })
}

async fn handle_predict(
    State(state): State<SharedState>,
    Json(attrs): Json<ProductAttributes>,
) -> Result<Json<PricePrediction>, ApiError> {
    state.record_request();
    let prediction = state.service.predict(&attrs)?;
    Ok(Json(prediction))
}

async fn handle_train(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<TrainResponse>, ApiError> {
    state.record_request();
    state.authorize(&headers)?;

    let service = state.service.clone();
    let metrics = tokio::task::spawn_blocking(move || service.train())
        .await
        .map_err(|err| ApiError::internal(format!("training task failed: {err}")))??;

    Ok(Json(TrainResponse {
        message: "Model retrained successfully".to_string(),
        metrics,
    }))
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Json<ModelMetrics>, ApiError> {
    state.record_request();
    Ok(Json(state.service.metrics()?))
}

async fn handle_upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    state.record_request();
    state.authorize(&headers)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if let Some(file_name) = field.file_name() {
            if !file_name.to_ascii_lowercase().ends_with(".csv") {
                return Err(ApiError::bad_request("only CSV files are accepted"));
            }
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("failed to read upload: {err}")))?;
        upload = Some(bytes);
        break;
    }

    let bytes = upload.ok_or_else(|| ApiError::bad_request("missing multipart field 'file'"))?;

    let service = state.service.clone();
    let stats = tokio::task::spawn_blocking(move || service.upload(&bytes))
        .await
        .map_err(|err| ApiError::internal(format!("upload task failed: {err}")))??;

    let message = match stats.retraining_error {
        None => "Data uploaded and model retrained successfully",
        Some(_) => "Data uploaded but model retraining failed",
    };

    Ok(Json(UploadResponse {
        message: message.to_string(),
        stats,
    }))
}

async fn handle_list_products(
    State(state): State<SharedState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ProductPage>, ApiError> {
    state.record_request();
    Ok(Json(state.service.list_products(&query)?))
}

async fn handle_get_product(
    State(state): State<SharedState>,
    Path(product_id): Path<i64>,
) -> Result<Json<ProductSummary>, ApiError> {
    state.record_request();
    Ok(Json(state.service.get_product(product_id)?))
}

async fn handle_prometheus(State(state): State<SharedState>) -> Response {
    state.record_request();
    match &state.prometheus {
        Some(handle) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            handle.render(),
        )
            .into_response(),
        None => ApiError::not_found("metrics exporter not enabled").into_response(),
    }
}
