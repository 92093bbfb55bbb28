//! Smoke tests for the endpoints that don't require an external extractor
//! binary or Redis instance: service metadata, health, metrics, and the
//! security filter chain's blocklist denial.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use streamrelay::cache::{CacheError, CacheStore};
use streamrelay::config::Config;
use streamrelay::extractor::ExtractorAdapter;
use streamrelay::web::WebServer;
use tower::ServiceExt;

struct InMemoryCache {
    counter: AtomicI64,
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
    async fn del(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
    async fn incr(&self, _key: &str, _ttl: Duration) -> Result<i64, CacheError> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

async fn build_router(config: Config) -> axum::Router {
    let cache = std::sync::Arc::new(InMemoryCache {
        counter: AtomicI64::new(0),
    });
    let extractor = std::sync::Arc::new(ExtractorAdapter::new(config.extractor.clone()));
    WebServer::new(config, cache, extractor)
        .await
        .expect("router construction should not fail")
        .into_router()
}

fn request_with_peer(uri: &str, peer: IpAddr) -> Request<Body> {
    let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(peer, 54321)));
    req
}

#[tokio::test]
async fn service_metadata_lists_supported_platforms() {
    let router = build_router(Config::default()).await;
    let response = router
        .oneshot(request_with_peer("/", "203.0.113.1".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let router = build_router(Config::default()).await;
    let response = router
        .oneshot(request_with_peer("/health", "203.0.113.1".parse().unwrap()))
        .await
        .unwrap();
    assert!(response.status() == axum::http::StatusCode::OK
        || response.status() == axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_returns_snapshot_envelope() {
    let router = build_router(Config::default()).await;
    let response = router
        .oneshot(request_with_peer(
            "/api/v2/stream/metrics",
            "203.0.113.1".parse().unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn blocklisted_client_is_denied_before_reaching_handler() {
    let mut config = Config::default();
    config.security.blocklist = vec!["10.0.0.0/8".to_string()];
    let router = build_router(config).await;

    let response = router
        .oneshot(request_with_peer(
            "/api/v2/stream/metrics",
            "10.1.2.3".parse().unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn security_headers_present_on_every_response() {
    let router = build_router(Config::default()).await;
    let response = router
        .oneshot(request_with_peer("/", "203.0.113.1".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("X-Content-Type-Options").unwrap(),
        "nosniff"
    );
    assert!(response.headers().contains_key("X-Request-Id"));
}
