#[cfg(test)]
#[path = "server_test.rs"]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use futures::TryStreamExt;
use serde_derive::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::configuration::ServerEnv;
use crate::domain::models::EvalRequest;
use crate::domain::models::EvalResponse;
use crate::domain::models::ProviderBox;
use crate::domain::models::RunMode;
use crate::domain::models::SendPayload;
use crate::domain::models::ValidationDetails;
use crate::domain::services::AdmissionGate;
use crate::domain::services::EvalTarget;
use crate::domain::services::EvaluationEngine;
use crate::domain::services::InMemoryRateLimitStore;
use crate::domain::services::RateLimitStoreBox;
use crate::domain::services::RateLimited;
use crate::domain::services::EVAL_CONCURRENCY;
use crate::domain::services::REFILL_WINDOW;
use crate::infrastructure::providers::ProviderManager;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request body")]
    InvalidBody(ValidationDetails),
    #[error("{0}")]
    RateLimited(RateLimited),
    #[error("MISTRAL_API_KEY missing")]
    MissingCredential,
    #[error("{0}")]
    Dataset(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ValidationDetails>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) => return StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => return StatusCode::TOO_MANY_REQUESTS,
            ApiError::MissingCredential => return StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Dataset(_) => return StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => return StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            ApiError::RateLimited(limited) => Some(limited.retry_after_secs),
            _ => None,
        };

        let error = self.to_string();
        let details = match self {
            ApiError::InvalidBody(details) => Some(details),
            _ => None,
        };

        let mut response = (status, Json(ErrorBody { error, details })).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        return response;
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> ApiError {
        return ApiError::Internal(err.to_string());
    }
}

pub type EnvResolver = Arc<dyn Fn() -> Result<ServerEnv> + Send + Sync>;

/// Shared by every request. The rate limit store and admission gate live for
/// the whole process; configuration is re-read per request.
#[derive(Clone)]
pub struct AppState {
    pub rate_limits: RateLimitStoreBox,
    pub gate: AdmissionGate,
    pub env: EnvResolver,
}

impl AppState {
    pub fn new(env: &ServerEnv) -> AppState {
        return AppState {
            rate_limits: Arc::new(InMemoryRateLimitStore::new(
                env.rate_limit_capacity,
                REFILL_WINDOW,
            )),
            gate: AdmissionGate::new(EVAL_CONCURRENCY),
            env: Arc::new(ServerEnv::resolve),
        };
    }

    fn resolve_env(&self) -> Result<ServerEnv, ApiError> {
        return (self.env)().map_err(|err| {
            tracing::error!(error = ?err, "Invalid server configuration");
            return ApiError::Internal(err.to_string());
        });
    }
}

/// Picks the provider, failing before any streaming when live mode has no
/// credential.
fn provider_for(env: &ServerEnv) -> Result<ProviderBox, ApiError> {
    if !env.use_mock && env.mistral_api_key.is_none() {
        tracing::error!("Live mode requested without an API key");
        return Err(ApiError::MissingCredential);
    }

    return Ok(ProviderManager::get(env)?);
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`, else the socket peer.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_str = |name: &str| {
        return headers
            .get(name)
            .and_then(|val| return val.to_str().ok())
            .map(|val| return val.trim().to_string());
    };

    if let Some(forwarded) = header_str("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next().map(|ip| return ip.trim()) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = header_str("x-real-ip").filter(|ip| return !ip.is_empty()) {
        return real_ip;
    }

    if let Some(peer) = peer {
        return peer.ip().to_string();
    }

    return "unknown".to_string();
}

async fn chat_stream(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = client_key(&headers, connect_info.map(|ConnectInfo(addr)| return addr));
    if let Err(limited) = state.rate_limits.check(&key) {
        tracing::warn!(client = key, retry_after = limited.retry_after_secs, "Rate limited");
        return Err(ApiError::RateLimited(limited));
    }

    let payload = SendPayload::parse(&body).map_err(ApiError::InvalidBody)?;
    let env = state.resolve_env()?;
    let provider = provider_for(&env)?;
    tracing::debug!(
        client = key,
        provider = %provider.name(),
        messages = payload.messages.len(),
        "Streaming chat"
    );

    let stream = provider.stream_response(&payload).await.map_err(|err| {
        tracing::error!(error = ?err, "Failed to open provider stream");
        return ApiError::Internal(err.to_string());
    })?;
    let stream = stream.inspect_err(|err| {
        tracing::error!(error = ?err, "Provider stream failed");
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|err| return ApiError::Internal(err.to_string()))?;

    return Ok(response);
}

#[derive(Debug, Serialize)]
struct ConfigBody {
    model: String,
    temperature: f64,
    mode: RunMode,
}

async fn chat_config(State(state): State<AppState>) -> Result<Json<ConfigBody>, ApiError> {
    let env = state.resolve_env()?;

    return Ok(Json(ConfigBody {
        model: env.model.to_string(),
        temperature: env.temperature,
        mode: env.mode(),
    }));
}

async fn eval_run(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EvalResponse>, ApiError> {
    let req = EvalRequest::parse(&body).map_err(ApiError::InvalidBody)?;
    let env = state.resolve_env()?;
    let provider = provider_for(&env)?;

    let engine = EvaluationEngine::with_gate(env.datasets_dir.clone(), state.gate.clone());
    let items = engine.load_dataset(&req.dataset).await.map_err(|err| {
        tracing::error!(dataset = req.dataset, error = ?err, "Failed to load dataset");
        return ApiError::Dataset(err.to_string());
    })?;

    let target = EvalTarget {
        provider: provider.as_ref(),
        mode: env.mode(),
        default_model: env.model.to_string(),
    };
    let res = engine.run_items(&items, &req, &target).await.map_err(|err| {
        tracing::error!(dataset = req.dataset, error = ?err, "Evaluation failed");
        return ApiError::Internal(err.to_string());
    })?;

    return Ok(Json(res));
}

pub fn router(state: AppState) -> Router {
    return Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/config", get(chat_config))
        .route("/api/eval/run", post(eval_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
}

pub async fn serve(listen_addr: &str) -> Result<()> {
    let env = ServerEnv::resolve()?;
    let state = AppState::new(&env);
    let app = router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = listen_addr, mode = %env.mode(), "Serving");
    println!(
        "{} listening on http://{} ({} mode)",
        env.app_name,
        listener.local_addr()?,
        env.mode()
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    return Ok(());
}
