//! HTTP interface. Thin handlers delegate to the resolver/streaming/health
//! services; this module wires routes, shared state, and the security
//! filter chain (`received → ip-check → rate-check → handler →
//! response-redact → audit-write`).

pub mod handlers;
pub mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::extractor::ExtractorAdapter;
use crate::health::SystemProbe;
use crate::metrics::StreamingMetricsAggregator;
use crate::resolver::VideoResolver;
use crate::security::{AuditLog, IpPolicy, RateLimiter};
use crate::streaming::StreamingEngine;

/// Shared application state, handed to every handler via axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub resolver: Arc<VideoResolver>,
    pub streaming: Arc<StreamingEngine>,
    pub metrics: Arc<StreamingMetricsAggregator>,
    pub probe: Arc<SystemProbe>,
    pub ip_policy: Arc<IpPolicy>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditLog>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub async fn new(
        config: Config,
        cache: Arc<dyn CacheStore>,
        extractor: Arc<ExtractorAdapter>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let resolver = Arc::new(VideoResolver::new(
            cache.clone(),
            extractor.clone(),
            config.ttl.clone(),
        ));
        let streaming = Arc::new(StreamingEngine::new());
        let metrics = Arc::new(StreamingMetricsAggregator::new());
        let probe = Arc::new(SystemProbe::new(cache.clone(), &config.extractor));
        let ip_policy = Arc::new(IpPolicy::new(
            &config.security.allowlist,
            &config.security.blocklist,
            config.security.trusted_proxies.clone(),
        )?);
        let rate_limiter = Arc::new(RateLimiter::new(
            cache.clone(),
            std::time::Duration::from_secs(config.security.rate_limit_window_secs),
            config.security.rate_limit_max_requests,
        ));
        let audit = Arc::new(AuditLog::spawn(config.security.audit_log_path.clone()));

        let state = AppState {
            config: config.clone(),
            resolver,
            streaming,
            metrics,
            probe,
            ip_policy,
            rate_limiter,
            audit,
        };

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let app = Self::create_router(state);

        Ok(Self { app, addr })
    }

    fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/", get(handlers::meta::service_metadata))
            .route("/health", get(handlers::health::health))
            .nest("/api/v2", Self::api_v2_routes())
            .layer(axum::middleware::from_fn(
                crate::security::security_headers_middleware,
            ))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::security_chain,
            ))
            .layer(axum::middleware::from_fn(middleware::request_id_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    fn api_v2_routes() -> Router<AppState> {
        Router::new()
            .route("/system/health", get(handlers::health::health))
            .route("/videos/:platform/:video_id", get(handlers::videos::get_video_info))
            .route(
                "/stream/direct/:platform/:video_id",
                get(handlers::stream::stream_direct),
            )
            .route(
                "/stream/proxy/:platform/:video_id",
                get(handlers::stream::stream_proxy),
            )
            .route("/stream/metrics", get(handlers::stream::metrics))
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Exposes the built router without binding a listener, for
    /// embedding in another service or driving with `tower::ServiceExt`.
    pub fn into_router(self) -> Router {
        self.app
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
