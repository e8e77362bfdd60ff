use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode, header::LOCATION},
    response::{Html, IntoResponse, Redirect},
    routing::get,
};
use tempfile::TempDir;
use tower::ServiceExt;
use tphtml_cache::{
    application::upstream::Upstream,
    cache::{
        CACHE_STATUS_HEADER, CacheConfig, CacheState, DiskStore, PageCache, SessionCookieAuth,
    },
    infra::http::{HttpState, build_router},
};

async fn spawn_site(hits: Arc<AtomicUsize>) -> reqwest::Url {
    let site = Router::new()
        .route(
            "/archives/{page}",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                Html(format!("<p>render {n}</p>"))
            }),
        )
        .route("/old", get(|| async { Redirect::permanent("/archives/1.html") }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
        )
        .with_state(hits);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, site).await.expect("upstream server");
    });

    reqwest::Url::parse(&format!("http://{addr}/")).expect("upstream url")
}

fn proxy_router(base: reqwest::Url, root: &std::path::Path) -> Router {
    let upstream = Upstream::new(base, Duration::from_secs(5)).expect("client");
    let cache = CacheState::new(
        PageCache::new(DiskStore::new(root)),
        Arc::new(CacheConfig::from_allow_path("/archives/", Some(86_400))),
        Arc::new(SessionCookieAuth::new(vec!["__typecho_uid".to_string()])),
    );
    build_router(HttpState { upstream, cache })
}

async fn fetch(
    app: &Router,
    uri: &str,
) -> (StatusCode, Option<String>, axum::http::HeaderMap, String) {
    let request = Request::builder()
        .uri(uri)
        .header("host", "blog.example")
        .body(Body::empty())
        .expect("request should build");
    let response = app.clone().oneshot(request).await.expect("router should respond");
    let status = response.status();
    let cache = response
        .headers()
        .get(CACHE_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (
        status,
        cache,
        headers,
        String::from_utf8(body.to_vec()).expect("utf-8"),
    )
}

#[tokio::test]
async fn upstream_pages_are_cached_across_requests() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_site(hits.clone()).await;
    let dir = TempDir::new().expect("temp dir");
    let app = proxy_router(base, dir.path());

    let (status, cache, _, body) = fetch(&app, "/archives/1.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("miss"));
    assert_eq!(body, "<p>render 0</p>");

    let (status, cache, _, body) = fetch(&app, "/archives/1.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("hit"));
    assert!(body.starts_with("<p>render 0</p><!--TpHtmlCache "));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn redirects_and_errors_pass_through_uncached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_site(hits).await;
    let dir = TempDir::new().expect("temp dir");
    let app = proxy_router(base, dir.path());

    let (status, cache, headers, _) = fetch(&app, "/old").await;
    assert_eq!(status, StatusCode::PERMANENT_REDIRECT);
    assert_eq!(cache.as_deref(), Some("bypass"));
    assert_eq!(headers[LOCATION], "/archives/1.html");

    let (status, _, _, body) = fetch(&app, "/broken").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "boom");
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let dir = TempDir::new().expect("temp dir");
    let base = reqwest::Url::parse(&format!("http://{addr}/")).expect("url");
    let app = proxy_router(base, dir.path());

    let (status, cache, _, _) = fetch(&app, "/archives/1.html").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(cache.as_deref(), Some("miss-uncached"));
    assert_eq!(
        std::fs::read_dir(dir.path()).expect("read root").count(),
        0,
        "failed generation must not be stored"
    );
}
