//! HTTP server module
//!
//! Forward-auth server built on `hyper`. A reverse proxy sends each inbound
//! request's method and URI to `GET /auth`; the server answers 200 (with the
//! caller's identity when a token was checked) or 401.
//!
//! # Endpoints
//!
//! * `GET /auth` - forward-auth check of `X-Forwarded-Method` / `X-Forwarded-Uri`
//! * `GET /health` - health check
//! * `GET /metrics` - Prometheus metrics, when enabled
//! * Anything else returns 404

use crate::access::{bearer_token, AccessDecision, AccessError, AccessGuard};
use crate::auth::TenantAuthResolver;
use crate::config::Config;
use crate::metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Method of the original request, set by the proxy
pub const FORWARDED_METHOD: &str = "x-forwarded-method";
/// URI of the original request, set by the proxy
pub const FORWARDED_URI: &str = "x-forwarded-uri";

pub const AUTH_SUBJECT: &str = "x-auth-subject";
pub const AUTH_ISSUER: &str = "x-auth-issuer";
pub const AUTH_TENANT: &str = "x-auth-tenant";

const INVALID_TOKEN_CHALLENGE: &str = r#"Bearer error="invalid_token""#;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Invalid access rules: {0}")]
    Access(#[from] AccessError),
}

/// Shared per-connection state
struct AppState {
    resolver: Arc<TenantAuthResolver>,
    guard: AccessGuard,
    metrics_enabled: bool,
}

/// Forward-auth HTTP server
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to the configured address
    ///
    /// Port 0 lets the OS pick a port; see [`local_addr`](Self::local_addr).
    pub async fn bind(
        config: &Config,
        resolver: Arc<TenantAuthResolver>,
    ) -> Result<Self, ServerError> {
        let guard = AccessGuard::from_config(&config.access)?;

        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(AppState {
                resolver,
                guard,
                metrics_enabled: config.metrics.enabled,
            }),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` completes
    ///
    /// Connections already accepted run to completion on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Starting server on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                }
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/auth") => forward_auth(ForwardedRequest::from(&req), &state).await,
        (&Method::GET, "/health") => health_handler(),
        (&Method::GET, "/metrics") if state.metrics_enabled => metrics_handler(),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// The original request, as described by the proxy
#[derive(Debug)]
struct ForwardedRequest {
    method: String,
    uri: String,
    authorization: Option<String>,
}

impl From<&Request<Incoming>> for ForwardedRequest {
    fn from(req: &Request<Incoming>) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            method: header(FORWARDED_METHOD).unwrap_or_else(|| req.method().to_string()),
            uri: header(FORWARDED_URI).unwrap_or_else(|| "/".to_string()),
            authorization: header(AUTHORIZATION.as_str()),
        }
    }
}

/// Check the original request described by the forwarded headers
async fn forward_auth(forwarded: ForwardedRequest, state: &AppState) -> Response<Full<Bytes>> {
    let ForwardedRequest {
        method,
        uri,
        authorization,
    } = forwarded;

    match state.guard.decide(&method, &uri) {
        AccessDecision::Public | AccessDecision::Open => {
            debug!("Allowing {} {} without authentication", method, uri);
            text(StatusCode::OK, "")
        }
        AccessDecision::Authenticate => {
            let Some(token) = bearer_token(authorization.as_deref()) else {
                debug!("Rejecting {} {}: no bearer token", method, uri);
                return unauthorized();
            };

            match state.resolver.authenticate(token).await {
                Ok(principal) => {
                    let mut response = text(StatusCode::OK, "");
                    let headers = response.headers_mut();
                    let identity = [
                        (AUTH_SUBJECT, Some(principal.subject.as_str())),
                        (AUTH_ISSUER, Some(principal.issuer.as_str())),
                        (AUTH_TENANT, principal.tenant.as_deref()),
                    ];
                    for (name, value) in identity {
                        if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
                            headers.insert(HeaderName::from_static(name), value);
                        }
                    }
                    response
                }
                Err(_) => unauthorized(),
            }
        }
    }
}

fn unauthorized() -> Response<Full<Bytes>> {
    let mut response = text(StatusCode::UNAUTHORIZED, "Unauthorized");
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static(INVALID_TOKEN_CHALLENGE),
    );
    response
}

fn health_handler() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(br#"{"status":"ok"}"#)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn metrics_handler() -> Response<Full<Bytes>> {
    match metrics::encode_text() {
        Ok((body, content_type)) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
