//! Integration Tests for the Caching Proxy
//!
//! Drives the full axum router against an in-process fake origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, Response, StatusCode},
    Router,
};
use bytes::Bytes;
use httpcache_proxy::{
    cache::{CacheStore, DiskStore, MemoryStore},
    create_router,
    error::{CacheError, Result},
    upstream::{OriginForwarder, OriginRequest, OriginResponse},
    AppState, CachingHandler, HandlerOptions,
};
use serde_json::Value;
use tower::ServiceExt;

// == Fake Origin ==

#[derive(Clone)]
struct Route {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: Bytes,
}

/// Serves fixed routes, answers matching If-None-Match with 304 and counts calls.
#[derive(Default)]
struct FakeOrigin {
    routes: Mutex<HashMap<String, Route>>,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl FakeOrigin {
    fn route(&self, path: &str, status: u16, headers: &[(&'static str, &'static str)], body: &'static str) {
        self.route_body(path, status, headers, Bytes::from_static(body.as_bytes()));
    }

    fn route_body(&self, path: &str, status: u16, headers: &[(&'static str, &'static str)], body: Bytes) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                headers: headers.to_vec(),
                body,
            },
        );
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl OriginForwarder for FakeOrigin {
    async fn forward(&self, request: OriginRequest) -> Result<OriginResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Upstream("connection refused".to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.path()).cloned();
        let Some(route) = route else {
            return Ok(OriginResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            });
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &route.headers {
            headers.append(*name, HeaderValue::from_static(*value));
        }

        let etag = headers.get("etag").cloned();
        let matches = match (etag, request.headers.get("if-none-match")) {
            (Some(etag), Some(candidate)) => etag == candidate,
            _ => false,
        };
        if matches {
            return Ok(OriginResponse {
                status: StatusCode::NOT_MODIFIED,
                headers,
                body: Bytes::new(),
            });
        }

        Ok(OriginResponse {
            status: StatusCode::from_u16(route.status).unwrap(),
            headers,
            body: route.body,
        })
    }
}

// == Helper Functions ==

fn create_test_app(store: Arc<dyn CacheStore>, options: HandlerOptions) -> (Router, Arc<FakeOrigin>) {
    let origin = Arc::new(FakeOrigin::default());
    let handler = CachingHandler::new(store, origin.clone(), options);
    (create_router(AppState::new(handler)), origin)
}

fn shared_app() -> (Router, Arc<FakeOrigin>) {
    create_test_app(Arc::new(MemoryStore::new()), HandlerOptions::shared())
}

async fn send(app: &Router, method: &str, path: &str, headers: &[(&str, &str)]) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "proxy.test");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get(app: &Router, path: &str) -> Response<Body> {
    send(app, "GET", path, &[]).await
}

fn x_cache(response: &Response<Body>) -> String {
    response.headers()["x-cache"].to_str().unwrap().to_string()
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// == Fresh Hits ==

#[tokio::test]
async fn test_miss_then_hit_with_age() {
    let (app, origin) = shared_app();
    origin.route("/a", 200, &[("cache-control", "max-age=120")], "alpha");

    let first = get(&app, "/a").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(x_cache(&first), "MISS");
    assert_eq!(body_bytes(first).await, Bytes::from_static(b"alpha"));

    let second = get(&app, "/a").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "HIT");
    let age: u64 = second.headers()["age"].to_str().unwrap().parse().unwrap();
    assert!(age > 0);
    assert_eq!(body_bytes(second).await, Bytes::from_static(b"alpha"));

    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn test_head_and_get_are_separate() {
    let (app, origin) = shared_app();
    origin.route("/h", 200, &[("cache-control", "max-age=120")], "body");

    get(&app, "/h").await;
    let head = send(&app, "HEAD", "/h", &[]).await;
    assert_eq!(x_cache(&head), "MISS");
    assert_eq!(origin.calls(), 2);
}

// == Revalidation ==

#[tokio::test]
async fn test_stale_entry_revalidated_with_304() {
    let (app, origin) = shared_app();
    origin.route(
        "/b",
        200,
        &[("cache-control", "max-age=0"), ("etag", "\"v1\"")],
        "original body",
    );

    let first = get(&app, "/b").await;
    assert_eq!(x_cache(&first), "MISS");

    let second = get(&app, "/b").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(x_cache(&second), "REVALIDATED");
    assert_eq!(second.headers()["etag"], "\"v1\"");
    assert_eq!(body_bytes(second).await, Bytes::from_static(b"original body"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_client_conditional_gets_304() {
    let (app, origin) = shared_app();
    origin.route("/etag", 200, &[("cache-control", "max-age=60"), ("etag", "\"x\"")], "data");

    get(&app, "/etag").await;
    let response = send(&app, "GET", "/etag", &[("if-none-match", "\"x\"")]).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(x_cache(&response), "HIT");
    assert!(body_bytes(response).await.is_empty());
}

// == Shared / Private Modes ==

#[tokio::test]
async fn test_shared_mode_authorized_response_not_stored() {
    let (app, origin) = shared_app();
    origin.route("/c", 200, &[("cache-control", "max-age=60")], "per-user");

    let authed = send(&app, "GET", "/c", &[("authorization", "Bearer x")]).await;
    assert_eq!(authed.status(), StatusCode::OK);

    let anonymous = get(&app, "/c").await;
    assert_eq!(x_cache(&anonymous), "MISS");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_shared_mode_private_response_not_served() {
    let (app, origin) = shared_app();
    origin.route("/p", 200, &[("cache-control", "private, max-age=60")], "mine");

    get(&app, "/p").await;
    let second = get(&app, "/p").await;
    assert_eq!(x_cache(&second), "MISS");
}

#[tokio::test]
async fn test_private_mode_serves_private_response() {
    let (app, origin) = create_test_app(Arc::new(MemoryStore::new()), HandlerOptions::private());
    origin.route("/p", 200, &[("cache-control", "private, max-age=60")], "mine");

    get(&app, "/p").await;
    let second = get(&app, "/p").await;
    assert_eq!(x_cache(&second), "HIT");
    assert_eq!(origin.calls(), 1);
}

// == Invalidation ==

#[tokio::test]
async fn test_post_invalidates_cached_get() {
    let (app, origin) = shared_app();
    origin.route("/doc", 200, &[("cache-control", "max-age=60")], "doc");

    get(&app, "/doc").await;
    let post = send(&app, "POST", "/doc", &[]).await;
    assert_eq!(x_cache(&post), "SKIP");

    let after = get(&app, "/doc").await;
    assert_eq!(x_cache(&after), "MISS");
    assert_eq!(origin.calls(), 3);
}

// == Origin Failures ==

#[tokio::test]
async fn test_stale_if_error_serves_stale_entry() {
    let (app, origin) = shared_app();
    origin.route(
        "/e",
        200,
        &[("cache-control", "max-age=0, stale-if-error=3600"), ("etag", "\"v1\"")],
        "cached",
    );

    get(&app, "/e").await;
    origin.set_down(true);

    let response = get(&app, "/e").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(x_cache(&response), "STALE");
    assert!(response.headers().get_all("warning").iter().count() >= 1);
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"cached"));
}

#[tokio::test]
async fn test_origin_failure_without_stale_entry_is_bad_gateway() {
    let (app, origin) = shared_app();
    origin.set_down(true);

    let response = get(&app, "/down").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_only_if_cached_miss_is_gateway_timeout() {
    let (app, origin) = shared_app();

    let response = send(&app, "GET", "/none", &[("cache-control", "only-if-cached")]).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn test_missing_host_is_bad_request() {
    let (app, _) = shared_app();

    let response = app
        .oneshot(Request::builder().uri("/a").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == Disk Store ==

#[tokio::test]
async fn test_disk_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (app, origin) = create_test_app(Arc::new(DiskStore::new(dir.path())), HandlerOptions::shared());
    origin.route("/disk", 200, &[("cache-control", "max-age=300")], "persisted");
    assert_eq!(x_cache(&get(&app, "/disk").await), "MISS");
    assert_eq!(x_cache(&get(&app, "/disk").await), "HIT");

    // a fresh handler over the same directory still has the entry
    let (restarted, origin) = create_test_app(Arc::new(DiskStore::new(dir.path())), HandlerOptions::shared());
    let response = get(&restarted, "/disk").await;
    assert_eq!(x_cache(&response), "HIT");
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"persisted"));
    assert_eq!(origin.calls(), 0);
}

#[tokio::test]
async fn test_disk_store_failure_degrades_to_forwarding() {
    let dir = tempfile::tempdir().unwrap();
    // the root is missing, so every store operation fails
    let store = DiskStore::new(dir.path().join("missing"));

    let (app, origin) = create_test_app(Arc::new(store), HandlerOptions::shared());
    origin.route("/f", 200, &[("cache-control", "max-age=300")], "still served");

    let first = get(&app, "/f").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_bytes(first).await, Bytes::from_static(b"still served"));
    let second = get(&app, "/f").await;
    assert_eq!(x_cache(&second), "MISS");
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn test_dump_http_passes_error_bodies_through() {
    let origin = Arc::new(FakeOrigin::default());
    let handler = CachingHandler::new(Arc::new(MemoryStore::new()), origin.clone(), HandlerOptions::shared());
    let mut state = AppState::new(handler);
    state.dump_http = true;
    let app = create_router(state);

    let large = Bytes::from(vec![b'x'; 100_000]);
    origin.route_body("/big", 404, &[], large.clone());
    origin.route("/small", 500, &[], "oops");

    let response = get(&app, "/big").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await, large);

    let response = get(&app, "/small").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body_bytes(response).await[..], b"oops");
}
