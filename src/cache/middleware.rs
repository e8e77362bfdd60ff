//! Page cache middleware.
//!
//! Serves fresh entries for anonymous GET/HEAD requests straight from disk and
//! captures cacheable misses after the inner handler has produced them.
//! HEAD requests may be answered from the cache but never populate it.
//! Bodies that cannot be buffered within `max_body_bytes` are streamed on
//! unchanged and left uncached.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE},
        response::Parts,
    },
    middleware::Next,
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use tracing::{debug, instrument, warn};

use super::{
    PageCache,
    advisory::{self, Advisory},
    auth::CallerAuth,
    config::{CacheConfig, ConfigSource},
    engine::{Generated, Prepared},
    policy::Bypass,
};

const TARGET: &str = "tphtml_cache::cache::middleware";

/// Response header reporting how the cache handled the request.
///
/// Values: `hit`, `miss` (generated and stored), `miss-uncached` (generated
/// but not stored) and `bypass`.
pub const CACHE_STATUS_HEADER: &str = "x-tphtml-cache";
const STATUS_MISS: &str = "miss";
const STATUS_MISS_UNCACHED: &str = "miss-uncached";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Default ceiling on captured bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state for [`page_cache_layer`].
#[derive(Clone)]
pub struct CacheState {
    pub cache: PageCache,
    pub config: Arc<dyn ConfigSource>,
    pub auth: Arc<dyn CallerAuth>,
    /// Link offered in the "not configured" notice.
    pub settings_url: Option<Arc<str>>,
    pub max_body_bytes: usize,
}

impl CacheState {
    pub fn new(
        cache: PageCache,
        config: Arc<dyn ConfigSource>,
        auth: Arc<dyn CallerAuth>,
    ) -> Self {
        Self {
            cache,
            config,
            auth,
            settings_url: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Middleware applying the page cache to every request it wraps.
#[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
pub async fn page_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let authenticated = state.auth.is_authenticated(request.headers());
    let config = state.config.current();

    match state.cache.prepare(&uri, &config, authenticated).await {
        Prepared::Hit(body) => cached_response(body),
        Prepared::Bypass(reason) => {
            let response = with_status_header(next.run(request).await, "bypass");
            if reason == Bypass::Authenticated {
                with_advisories(&state, &config, response).await
            } else {
                response
            }
        }
        Prepared::Capture(ticket) => {
            let response = next.run(request).await;
            if method == Method::HEAD || !should_capture(&response, state.max_body_bytes) {
                return with_status_header(response, STATUS_MISS_UNCACHED);
            }

            let (parts, body) = response.into_parts();
            match collect_within(body, state.max_body_bytes).await {
                Collected::Complete(bytes) => {
                    let generated = Generated::complete(bytes);
                    let stored = state.cache.finish(ticket, &generated).await;
                    debug!(target: TARGET, op = "capture", stored, bytes = generated.body.len());

                    let status = if stored { STATUS_MISS } else { STATUS_MISS_UNCACHED };
                    with_status_header(
                        Response::from_parts(parts, Body::from(generated.body)),
                        status,
                    )
                }
                Collected::Oversized(body) => {
                    debug!(
                        target: TARGET,
                        op = "capture",
                        result = "oversized",
                        cache_key = %ticket.key(),
                        limit = state.max_body_bytes
                    );
                    with_status_header(Response::from_parts(parts, body), STATUS_MISS_UNCACHED)
                }
                Collected::Failed(body) => {
                    warn!(
                        target: TARGET,
                        op = "capture",
                        result = "body_error",
                        cache_key = %ticket.key(),
                        "Generated body failed mid-stream; nothing cached"
                    );
                    with_status_header(Response::from_parts(parts, body), STATUS_MISS_UNCACHED)
                }
            }
        }
    }
}

/// Outcome of buffering a response body under a size limit.
enum Collected {
    Complete(Bytes),
    /// The limit was exceeded; the body replays what was read, then the rest.
    Oversized(Body),
    /// The body errored; the body replays what was read, then the error.
    Failed(Body),
}

/// Buffer `body` chunk by chunk without ever losing bytes already read.
async fn collect_within(body: Body, limit: usize) -> Collected {
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = rest.next().await {
        match chunk {
            Ok(chunk) => {
                total = total.saturating_add(chunk.len());
                chunks.push(chunk);
                if total > limit {
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(rest);
                    return Collected::Oversized(Body::from_stream(replay));
                }
            }
            Err(err) => {
                let replay = stream::iter(
                    chunks
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(err))),
                );
                return Collected::Failed(Body::from_stream(replay));
            }
        }
    }

    Collected::Complete(match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.swap_remove(0),
        _ => {
            let mut joined = BytesMut::with_capacity(total);
            for chunk in &chunks {
                joined.extend_from_slice(chunk);
            }
            joined.freeze()
        }
    })
}

/// Only complete, anonymous-safe HTML pages of bounded size are stored.
fn should_capture(response: &Response, max_body_bytes: usize) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    // A stored page is replayed to every visitor, so per-user cookies must never be captured.
    if response.headers().contains_key(SET_COOKIE) {
        return false;
    }

    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_none_or(|value| value.starts_with("text/html"));
    if !is_html {
        return false;
    }

    response
        .body()
        .size_hint()
        .upper()
        .is_none_or(|upper| upper <= max_body_bytes as u64)
}

fn cached_response(body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("hit"));
    response
}

fn with_status_header(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
    response
}

/// Prepend operator notices to an HTML page; other responses pass through.
async fn with_advisories(state: &CacheState, config: &CacheConfig, response: Response) -> Response {
    if !is_html_page(&response) {
        return response;
    }

    let cache = state.cache.clone();
    let config = config.clone();
    let settings_url = state.settings_url.clone();
    let advisories = tokio::task::spawn_blocking(move || {
        cache.advisories(&config, true, settings_url.as_deref())
    })
    .await
    .unwrap_or_default();
    if advisories.is_empty() {
        return response;
    }

    let (parts, body) = response.into_parts();
    if body
        .size_hint()
        .upper()
        .is_some_and(|upper| upper > state.max_body_bytes as u64)
    {
        debug!(target: TARGET, op = "advisory", result = "skipped_oversized");
        return Response::from_parts(parts, body);
    }

    match collect_within(body, state.max_body_bytes).await {
        Collected::Complete(bytes) => rebuild_with_advisories(parts, &advisories, &bytes),
        Collected::Oversized(body) => {
            debug!(target: TARGET, op = "advisory", result = "skipped_oversized");
            Response::from_parts(parts, body)
        }
        Collected::Failed(body) => {
            warn!(
                target: TARGET,
                op = "advisory",
                result = "body_error",
                "Page body failed mid-stream; operator notice skipped"
            );
            Response::from_parts(parts, body)
        }
    }
}

fn is_html_page(response: &Response) -> bool {
    response.status() == StatusCode::OK
        && response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"))
}

fn rebuild_with_advisories(mut parts: Parts, advisories: &[Advisory], body: &[u8]) -> Response {
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(advisory::prepend(advisories, body)))
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    fn chunked(chunks: Vec<Result<&'static str, std::io::Error>>) -> Body {
        Body::from_stream(stream::iter(chunks))
    }

    async fn drain(body: Body) -> (Vec<u8>, bool) {
        let mut data = Vec::new();
        let mut failed = false;
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(_) => failed = true,
            }
        }
        (data, failed)
    }

    fn html(body: &'static str) -> Response {
        ([(CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
    }

    #[test]
    fn captures_plain_html_pages() {
        assert!(should_capture(&html("<p>hi</p>"), 1024));
    }

    #[test]
    fn response_without_content_type_is_captured() {
        let response = Response::new(Body::from("raw"));
        assert!(should_capture(&response, 1024));
    }

    #[test]
    fn skips_non_ok_status() {
        let response = (StatusCode::NOT_FOUND, html("missing")).into_response();
        assert!(!should_capture(&response, 1024));
    }

    #[test]
    fn skips_responses_setting_cookies() {
        let mut response = html("<p>hi</p>");
        response
            .headers_mut()
            .insert(SET_COOKIE, HeaderValue::from_static("sid=1"));
        assert!(!should_capture(&response, 1024));
    }

    #[test]
    fn skips_non_html_bodies() {
        let response = ([(CONTENT_TYPE, "application/json")], "{}").into_response();
        assert!(!should_capture(&response, 1024));
    }

    #[test]
    fn skips_bodies_over_the_limit() {
        assert!(!should_capture(&html("0123456789"), 4));
    }

    #[test]
    fn cached_response_is_labelled_html_hit() {
        let response = cached_response(Bytes::from_static(b"page"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "hit");
        assert_eq!(response.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn collects_chunked_bodies_within_the_limit() {
        let body = chunked(vec![Ok("<p>"), Ok("hi"), Ok("</p>")]);
        match collect_within(body, 64).await {
            Collected::Complete(bytes) => assert_eq!(&bytes[..], b"<p>hi</p>"),
            _ => panic!("expected a complete body"),
        }
    }

    #[tokio::test]
    async fn oversized_streams_are_replayed_in_full() {
        let body = chunked(vec![Ok("0123456789"), Ok("abcdefghij")]);
        match collect_within(body, 4).await {
            Collected::Oversized(body) => {
                let (data, failed) = drain(body).await;
                assert_eq!(data, b"0123456789abcdefghij");
                assert!(!failed);
            }
            _ => panic!("expected an oversized body"),
        }
    }

    #[tokio::test]
    async fn failing_streams_replay_the_prefix_then_the_error() {
        let body = chunked(vec![Ok("<p>partial"), Err(std::io::Error::other("reset"))]);
        match collect_within(body, 1024).await {
            Collected::Failed(body) => {
                let (data, failed) = drain(body).await;
                assert_eq!(data, b"<p>partial");
                assert!(failed);
            }
            _ => panic!("expected a failed body"),
        }
    }
}
