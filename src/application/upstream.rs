//! Upstream page generator.
//!
//! The bundled server does not render pages itself; every request is forwarded
//! to the dynamic site and its response becomes the generated output that the
//! page cache may capture.

use std::time::Duration;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{CONTENT_LENGTH, HOST},
    },
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use reqwest::{Client, Url, redirect};
use thiserror::Error;
use tracing::debug;

use super::error::ErrorReport;

const TARGET: &str = "tphtml_cache::application::upstream";
const FORWARDED_HOST: &str = "x-forwarded-host";
const HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid upstream target `{target}`: {reason}")]
    Target { target: String, reason: String },
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),
    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to read upstream response: {0}")]
    ResponseBody(#[source] reqwest::Error),
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_GATEWAY;
        let report = ErrorReport::from_error("application::upstream", status, &self);
        let mut response = (status, "Bad gateway").into_response();
        report.attach(&mut response);
        response
    }
}

/// HTTP client bound to the site being cached.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client,
    base: Url,
}

impl Upstream {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(UpstreamError::Client)?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Replay `request` against the upstream and hand back its response verbatim.
    ///
    /// Redirects are returned to the caller instead of being followed.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = target_url(&self.base, path_and_query)?;

        let mut headers = parts.headers;
        let original_host = headers.remove(HOST);
        strip_hop_headers(&mut headers);
        if let Some(host) = original_host {
            headers.insert(FORWARDED_HOST, host);
        }

        let body = body
            .collect()
            .await
            .map_err(UpstreamError::RequestBody)?
            .to_bytes();

        let upstream = self
            .client
            .request(parts.method, target.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(UpstreamError::Request)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_headers(&mut headers);
        headers.remove(CONTENT_LENGTH);
        let bytes = upstream.bytes().await.map_err(UpstreamError::ResponseBody)?;

        debug!(
            target: TARGET,
            op = "forward",
            status = status.as_u16(),
            upstream = %target,
            bytes = bytes.len(),
        );

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Join the request path onto the base URL, keeping any base path prefix.
fn target_url(base: &Url, path_and_query: &str) -> Result<Url, UpstreamError> {
    let target = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path_and_query.trim_start_matches('/')
    );
    Url::parse(&target).map_err(|err| UpstreamError::Target {
        target,
        reason: err.to_string(),
    })
}

fn strip_hop_headers(headers: &mut HeaderMap<HeaderValue>) {
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}
