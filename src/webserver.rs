//! HTTP transport.
//!
//! Routes:
//! - `POST /api/v1/generate`
//! - `POST /api/v1/validate`
//! - `POST /api/v1/withdrawal`
//! - `GET  /api/v1/health`
//!
//! Every operation answers `200` with `{result, reason}` in the body, including failures. A body
//! that is not valid JSON for the route is rejected with `400`, and a request that outlives the
//! configured timeout gets `503` (its outcome is unknown; retries are safe because stores upsert
//! by serial).

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::configs::HttpConfig;
use crate::error::{CaError, CaResult};
use crate::pki_generator::Generator;
use crate::protocol::{
    CertificateRequest, HealthResponse, IssueRequest, IssueResponse, Protocol, StatusResponse,
};
use crate::storage::CertificateStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct AppState<G, S> {
    protocol: Protocol<G, S>,
    request_timeout: Duration,
}

impl<G, S> Clone for AppState<G, S> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

/// Build the API router around `protocol`.
pub fn router<G, S>(protocol: Protocol<G, S>, request_timeout: Duration) -> Router
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    let state = AppState {
        protocol,
        request_timeout,
    };
    Router::new()
        .route("/api/v1/generate", post(generate::<G, S>))
        .route("/api/v1/validate", post(validate::<G, S>))
        .route("/api/v1/withdrawal", post(withdrawal::<G, S>))
        .route("/api/v1/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(rejection: JsonRejection) -> Response {
    warn!(error = %rejection.body_text(), "rejected malformed request body");
    let body = serde_json::json!({
        "result": false,
        "reason": rejection.body_text(),
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

async fn respond<T, F>(limit: Duration, work: F, on_timeout: impl FnOnce() -> T) -> Response
where
    T: Serialize,
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(body) => Json(body).into_response(),
        Err(_) => {
            warn!(timeout_secs = limit.as_secs_f64(), "request timed out");
            (StatusCode::SERVICE_UNAVAILABLE, Json(on_timeout())).into_response()
        }
    }
}

const TIMED_OUT: &str = "request timed out, outcome unknown";

async fn generate<G, S>(
    State(state): State<AppState<G, S>>,
    payload: Result<Json<IssueRequest>, JsonRejection>,
) -> Response
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection),
    };
    let (uid, did) = (request.uid.clone(), request.did.clone());
    respond(
        state.request_timeout,
        state.protocol.issue(request),
        move || IssueResponse::failed(uid, did, TIMED_OUT),
    )
    .await
}

async fn validate<G, S>(
    State(state): State<AppState<G, S>>,
    payload: Result<Json<CertificateRequest>, JsonRejection>,
) -> Response
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection),
    };
    let (uid, did) = (request.uid.clone(), request.did.clone());
    respond(
        state.request_timeout,
        state.protocol.validate(request),
        move || StatusResponse::failed(uid, did, TIMED_OUT),
    )
    .await
}

async fn withdrawal<G, S>(
    State(state): State<AppState<G, S>>,
    payload: Result<Json<CertificateRequest>, JsonRejection>,
) -> Response
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection),
    };
    let (uid, did) = (request.uid.clone(), request.did.clone());
    respond(
        state.request_timeout,
        state.protocol.withdraw(request),
        move || StatusResponse::failed(uid, did, TIMED_OUT),
    )
    .await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Serve `app` according to `config` until `shutdown` resolves.
///
/// TLS (rustls) is used when both `tls_cert_path` and `tls_key_path` are configured.
pub async fn serve<F>(app: Router, config: &HttpConfig, shutdown: F) -> CaResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ip: IpAddr = config.listen.parse().map_err(|e| {
        CaError::Config(format!("Invalid listen address {}: {}", config.listen, e))
    })?;
    let addr = SocketAddr::new(ip, config.port);

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        info!("shutting down HTTP server");
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match config.tls_paths() {
        Some((cert, key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
                CaError::Config(format!(
                    "Failed to load TLS certificate {} / key {}: {}",
                    cert.display(),
                    key.display(),
                    e
                ))
            })?;
            info!(%addr, "HTTPS server listening");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!(%addr, "HTTP server listening (TLS disabled)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }
    Ok(())
}
