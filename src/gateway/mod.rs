//! HTTP surface of the gateway.
//!
//! Assembles the axum router (endpoint methods, health paths, CORS,
//! static-header middleware, body limit), owns the shared state handed to
//! handlers, and drives the correlator loop that drains the child's stdout.

pub mod correlator;
pub mod handlers;
pub mod timeout;

use crate::child::ChildHandle;
use crate::config::{GatewayConfig, MAX_BODY_BYTES};
use crate::error::{Error, Result};
use crate::session::SessionRegistry;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub child: ChildHandle,
}

pub struct Gateway {
    state: AppState,
}

impl Gateway {
    /// Wire the gateway: fresh session registry plus the correlator task
    /// draining the child's parsed stdout lines.
    pub fn new(config: GatewayConfig, child: ChildHandle, lines: mpsc::Receiver<Value>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        tokio::spawn(correlator::run(
            registry.clone(),
            lines,
            config.response_mode,
        ));
        Self {
            state: AppState {
                config: Arc::new(config),
                registry,
                child,
            },
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry.clone()
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        let config = &self.state.config;

        let mut router = Router::new().route(
            &config.endpoint,
            get(handlers::handle_get)
                .post(handlers::handle_post)
                .delete(handlers::handle_delete)
                .options(handlers::handle_options)
                .fallback(handlers::handle_method_not_allowed),
        );

        for path in &config.health_endpoints {
            router = router.route(path, get(handlers::handle_health));
        }

        // Static headers sit outside CORS: the CORS layer answers real
        // preflight requests itself without invoking the inner service, and
        // those responses must carry the static headers too.
        router
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn_with_state(
                        self.state.clone(),
                        apply_static_headers,
                    ))
                    .layer(cors_layer(config))
                    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
            )
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown future resolves.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Gateway listening on {}", addr);
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Server(format!("Server error: {e}")))
    }
}

/// Permissive-by-configuration CORS: fixed method/header lists, credentials
/// on, origin from configuration. A `*` origin mirrors the request origin,
/// which is the only way to combine a wildcard with credentials on the wire.
fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let origin = match config.cors_origin.as_str() {
        "*" => AllowOrigin::mirror_request(),
        other => HeaderValue::from_str(other)
            .map(AllowOrigin::exact)
            .unwrap_or_else(|_| AllowOrigin::mirror_request()),
    };

    let mut expose = vec![
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static("x-api-key"),
    ];
    if let Ok(session_header) = HeaderName::try_from(config.session_header.as_str()) {
        expose.push(session_header);
    }

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers(expose)
        .allow_credentials(true)
        .allow_origin(origin)
}

/// Caller-supplied static headers go on every response.
async fn apply_static_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in &state.config.static_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
    response
}
