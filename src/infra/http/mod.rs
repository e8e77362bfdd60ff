//! HTTP surface of the bundled server: a caching reverse proxy.

mod middleware;

pub use middleware::RequestContext;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
};

use crate::{
    application::upstream::Upstream,
    cache::{CacheState, page_cache_layer},
};

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub upstream: Upstream,
    pub cache: CacheState,
}

/// Every path is forwarded upstream; the page cache wraps the whole surface.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .fallback(proxy)
        .with_state(state.upstream)
        .layer(axum_middleware::from_fn_with_state(
            state.cache,
            page_cache_layer,
        ))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn proxy(State(upstream): State<Upstream>, request: Request<Body>) -> Response {
    match upstream.forward(request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
