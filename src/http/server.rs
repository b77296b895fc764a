//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, panic capture)
//! - Bound each request by the overall deadline, answered as a 504
//! - Bind server to listener with graceful shutdown
//! - Dispatch requests to the routing engine
//! - Forward requests to the backend and hand responses to the rewriter

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ProxyConfig, RewriteConfig};
use crate::http::login::LoginFlow;
use crate::http::request::{request_id, ProxyRequestId};
use crate::http::response::{error_chain, panic_response, ProxyError};
use crate::http::upstream::UpstreamClient;
use crate::observability::metrics;
use crate::rewrite::{
    BackendOrigin, HeaderRewriter, OriginError, ResponseInterceptor, RewriteContext, UrlRewriter,
};
use crate::routing::{Dispatch, Router as ProxyRouter};

/// Failures while assembling the server.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid backend origin: {0}")]
    Origin(#[from] OriginError),

    #[error("failed to compile rewrite rules: {0}")]
    Rules(#[from] regex::Error),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub upstream: Arc<UpstreamClient>,
    pub interceptor: Arc<ResponseInterceptor>,
    pub login: Arc<LoginFlow>,
    pub rewrite_config: Arc<RewriteConfig>,
    /// Host used for the proxy origin when a request carries none.
    pub fallback_host: Arc<str>,
    pub expose_errors: bool,
    /// Deadline for a whole request, from receipt to a complete response.
    pub request_timeout: Duration,
}

/// HTTP server for the mirroring proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let origin = BackendOrigin::parse(&config.backend.origin)?;
        let urls = Arc::new(UrlRewriter::new(&origin)?);
        let headers = HeaderRewriter::new(Arc::clone(&urls), config.cookies.clone());

        let state = AppState {
            router: Arc::new(ProxyRouter::from_config(&config.routes, &config.login)),
            upstream: Arc::new(UpstreamClient::new(origin, &config.backend)?),
            interceptor: Arc::new(ResponseInterceptor::new(
                urls,
                headers.clone(),
                config.rewrite.max_body_bytes,
                Duration::from_secs(config.backend.request_timeout_secs),
            )),
            login: Arc::new(LoginFlow::new(headers)),
            rewrite_config: Arc::new(config.rewrite.clone()),
            fallback_host: Arc::from(config.listener.bind_address.as_str()),
            expose_errors: config.observability.expose_errors,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state);
        with_middleware(router, config.observability.expose_errors)
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backend = %self.config.backend.origin,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Wrap `router` in the request-id, tracing and panic-capture layers.
fn with_middleware(router: Router, expose_errors: bool) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(ProxyRequestId))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    request_id = %request_id(request.headers()),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CatchPanicLayer::custom(
            move |panic: Box<dyn Any + Send + 'static>| panic_response(panic, expose_errors),
        ));

    router.layer(middleware)
}

/// Main proxy handler.
/// Looks up the route, forwards the request and shapes the response.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let matched = state.router.match_request(&request);
    let route = matched.name.to_string();
    let dispatch = matched.dispatch;

    let ctx = RewriteContext::from_request(
        request.headers(),
        request.uri(),
        &state.rewrite_config,
        &state.fallback_host,
    );

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        route = %route,
        dispatch = ?dispatch,
        proxy_origin = %ctx.proxy_origin(),
        "Proxying request"
    );

    let outcome = tokio::time::timeout(
        state.request_timeout,
        forward(&state, request, dispatch, &ctx, addr),
    )
    .await
    .unwrap_or_else(|_| Err(ProxyError::BackendTimeout(state.request_timeout)));

    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                route = %route,
                status = e.status().as_u16(),
                error = %e,
                "Request failed"
            );
            metrics::record_upstream_error(e.kind());
            e.to_response(state.expose_errors)
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), &route, start_time);
    response
}

async fn forward(
    state: &AppState,
    request: Request<Body>,
    dispatch: Dispatch,
    ctx: &RewriteContext,
    client: SocketAddr,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.rewrite_config.max_request_body_bytes)
        .await
        .map_err(|e| ProxyError::RequestBody(error_chain(&e)))?;

    let force_identity = dispatch != Dispatch::PassThrough;
    let headers = state
        .upstream
        .outbound_headers(&parts.headers, ctx, Some(client), force_identity);

    let upstream = state
        .upstream
        .forward(parts.method.clone(), &parts.uri, headers, body)
        .await?;

    match dispatch {
        Dispatch::Login => Ok(state.login.respond(upstream.headers(), ctx)),
        Dispatch::PassThrough => Ok(state.interceptor.pass_through(upstream, ctx)),
        Dispatch::Rewrite => state.interceptor.intercept(&parts.method, upstream, ctx).await,
    }
}
