use crate::{
    app::{AppContext, AppError, Health},
    catalog::Interaction,
    search::{SearchRequest, SearchResponse},
    vectorize::{BatchReport, VectorizeOptions, VectorizeOutcome},
};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::signal;

#[derive(Clone)]
pub struct SharedState {
    app: Arc<AppContext>,
}

pub fn router(app: Arc<AppContext>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/products/search", post(search))
        .route("/api/products/vectorize", post(vectorize))
        .route("/api/products/vectorize_batch", post(vectorize_batch))
        .route("/api/interactions", get(interactions))
        .route("/api/health", get(health))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

pub async fn start_daemon(app: AppContext, bind: &str) -> anyhow::Result<()> {
    let app = Arc::new(app);

    let sweep_every = Duration::from_secs(app.config().server.rate_limit.sweep_interval_secs);
    let limiter = app.limiter().clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            limiter.sweep();
        }
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Embedding(_) => {
                log::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
            AppError::ProviderDisabled | AppError::Catalog(_) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_request(rejection: impl std::fmt::Display) -> HttpError {
    HttpError(AppError::BadRequest(rejection.to_string()))
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// Rate limit key: the token identity, else the forwarded client address.
fn caller_key(app: &AppContext, headers: &HeaderMap) -> Result<String, HttpError> {
    let identity = app.identify(authorization(headers))?;
    if identity != crate::auth::Identity::Anonymous {
        return Ok(identity.rate_limit_key());
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    Ok(match forwarded {
        Some(addr) => format!("ip:{addr}"),
        None => identity.rate_limit_key(),
    })
}

async fn search(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let app = &state.app;

    let key = caller_key(app, &headers)?;
    app.check_rate_limit(&key)?;

    let Json(request) = payload.map_err(bad_request)?;
    log::debug!("payload: {request:?}");

    Ok(Json(app.search(&request).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct VectorizeRequest {
    id: u64,
    #[serde(default)]
    force: bool,
}

async fn vectorize(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    payload: Result<Json<VectorizeRequest>, JsonRejection>,
) -> Result<Json<VectorizeOutcome>, HttpError> {
    let app = &state.app;
    app.authorize(authorization(&headers))?;

    let Json(request) = payload.map_err(bad_request)?;

    Ok(Json(app.vectorize_product(request.id, request.force).await?))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VectorizeBatchRequest {
    #[serde(default)]
    ids: Option<Vec<u64>>,
    #[serde(default)]
    force: bool,
}

async fn vectorize_batch(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    payload: Result<Json<VectorizeBatchRequest>, JsonRejection>,
) -> Result<Json<BatchReport>, HttpError> {
    let app = &state.app;
    app.authorize(authorization(&headers))?;

    let Json(request) = payload.map_err(bad_request)?;

    let report = app
        .vectorize_batch(VectorizeOptions {
            ids: request.ids,
            force: request.force,
        })
        .await?;

    Ok(Json(report))
}

#[derive(Debug, Clone, Deserialize)]
struct InteractionsParams {
    session_id: String,
    limit: Option<usize>,
}

async fn interactions(
    State(state): State<Arc<SharedState>>,
    params: Result<Query<InteractionsParams>, QueryRejection>,
) -> Result<Json<Vec<Interaction>>, HttpError> {
    let Query(params) = params.map_err(bad_request)?;

    Ok(Json(
        state
            .app
            .interactions(&params.session_id, params.limit)
            .await?,
    ))
}

async fn health(State(state): State<Arc<SharedState>>) -> Result<Json<Health>, HttpError> {
    Ok(Json(state.app.health().await?))
}
