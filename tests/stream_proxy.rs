//! End-to-end test of the video-info and stream-proxy routes, against a
//! fake extractor binary (a shell script emitting canned `--dump-json`
//! output) and a mocked upstream media origin.

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use streamrelay::cache::{CacheError, CacheStore};
use streamrelay::config::Config;
use streamrelay::extractor::ExtractorAdapter;
use streamrelay::web::WebServer;
use tempfile::NamedTempFile;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

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

/// Writes an executable shell script standing in for yt-dlp: whatever
/// `--dump-json` is requested, it prints a single-format video report
/// pointing at `media_url`.
fn fake_extractor_script(media_url: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp script");
    writeln!(
        file,
        "#!/bin/sh\ncat <<'EOF'\n{{\"id\":\"abc123\",\"title\":\"Test Video\",\"description\":\"\",\"duration\":42,\"uploader\":\"tester\",\"formats\":[{{\"format_id\":\"best\",\"url\":\"{media_url}\",\"height\":720,\"ext\":\"mp4\",\"vcodec\":\"avc1\",\"acodec\":\"mp4a\",\"tbr\":1500.0}}]}}\nEOF\n"
    )
    .unwrap();
    let mut perms = file.as_file().metadata().unwrap().permissions();
    perms.set_mode(0o755);
    file.as_file().set_permissions(perms).unwrap();
    file
}

fn request_with_peer(uri: &str, peer: IpAddr) -> Request<Body> {
    let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(peer, 54321)));
    req
}

#[tokio::test]
async fn video_info_and_stream_proxy_round_trip() {
    let media_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"fake-media-bytes".to_vec())
                .insert_header("content-type", "video/mp4"),
        )
        .mount(&media_server)
        .await;

    let media_url = format!("{}/video.mp4", media_server.uri());
    let script = fake_extractor_script(&media_url);

    let mut config = Config::default();
    config.extractor.binary_path = script.path().to_path_buf();

    let cache = std::sync::Arc::new(InMemoryCache {
        counter: AtomicI64::new(0),
    });
    let extractor = std::sync::Arc::new(ExtractorAdapter::new(config.extractor.clone()));
    let router = WebServer::new(config, cache, extractor)
        .await
        .expect("router construction should not fail")
        .into_router();

    let info_response = router
        .clone()
        .oneshot(request_with_peer(
            "/api/v2/videos/youtube/abc123",
            "203.0.113.1".parse().unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(info_response.status(), StatusCode::OK);

    let proxy_response = router
        .oneshot(request_with_peer(
            "/api/v2/stream/proxy/youtube/abc123?quality=720p",
            "203.0.113.1".parse().unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(proxy_response.status(), StatusCode::OK);
    assert_eq!(
        proxy_response.headers().get("content-type").unwrap(),
        "video/mp4"
    );

    let body = axum::body::to_bytes(proxy_response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"fake-media-bytes");
}
