//! Caller authentication as seen by the cache.
//!
//! The cache does not authenticate anyone; it only needs to know whether the
//! host application would treat the caller as logged in.

use axum::http::{HeaderMap, header::COOKIE};

/// Reports whether a request comes from an authenticated caller.
pub trait CallerAuth: Send + Sync {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool;
}

/// Treats a caller as authenticated when any of the named session cookies is present and non-empty.
#[derive(Debug, Clone)]
pub struct SessionCookieAuth {
    cookie_names: Vec<String>,
}

impl SessionCookieAuth {
    pub fn new(cookie_names: Vec<String>) -> Self {
        Self { cookie_names }
    }
}

impl CallerAuth for SessionCookieAuth {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| {
                !value.is_empty() && self.cookie_names.iter().any(|wanted| wanted == name)
            })
    }
}

/// Every caller is anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CallerAuth for Anonymous {
    fn is_authenticated(&self, _headers: &HeaderMap) -> bool {
        false
    }
}
