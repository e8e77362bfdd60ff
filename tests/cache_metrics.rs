use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::COOKIE},
    middleware,
    response::Html,
    routing::get,
};
use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;
use tower::ServiceExt;
use tphtml_cache::cache::{
    CacheConfig, CacheKey, CacheState, DiskStore, PageCache, SessionCookieAuth, page_cache_layer,
};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("temp dir");
    let store = DiskStore::new(dir.path());
    let stale = store
        .store(&CacheKey::from_uri("/archives/old.html"), b"old")
        .expect("seed stale entry");
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .expect("open stale entry")
        .set_modified(SystemTime::now() - Duration::from_secs(90_000))
        .expect("age stale entry");

    // A regular file where a shard directory belongs makes one write fail.
    let broken = CacheKey::from_uri("/archives/broken.html");
    std::fs::write(broken.shard_dir(dir.path()), b"not a directory").expect("block shard");

    let cache_state = CacheState::new(
        PageCache::new(store),
        Arc::new(CacheConfig::from_allow_path("/archives/", Some(86_400))),
        Arc::new(SessionCookieAuth::new(vec!["__typecho_uid".to_string()])),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/{*path}",
            get(move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Html("page")
                }
            }),
        )
        .layer(middleware::from_fn_with_state(cache_state, page_cache_layer));

    let requests = [
        ("/archives/1.html", None),
        ("/archives/1.html", None),
        ("/archives/old.html", None),
        ("/archives/broken.html", None),
        ("/about/", None),
        ("/archives/1.html", Some("__typecho_uid=1")),
    ];

    for (uri, cookie) in requests {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        let request = builder.body(Body::empty()).expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tphtml_cache_hit_total",
        "tphtml_cache_miss_total",
        "tphtml_cache_stale_total",
        "tphtml_cache_bypass_total",
        "tphtml_cache_store_total",
        "tphtml_cache_store_error_total",
        "tphtml_cache_lookup_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
