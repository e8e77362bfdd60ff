//! Inline notices for authenticated viewers.
//!
//! Cache misconfiguration never fails a page. Logged-in operators see a short
//! notice at the top of the page instead; anonymous visitors see nothing.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// No allow-list configured yet.
    NotConfigured { settings_url: Option<String> },
    /// The cache root cannot be written to.
    StoreUnwritable,
}

impl Advisory {
    /// Render as an inline HTML fragment.
    pub fn to_html(&self) -> String {
        match self {
            Advisory::StoreUnwritable => format!(
                "<span style=\"{STYLE} color:#ff0000\">Page cache directory is not writable; pages are not being cached</span>"
            ),
            Advisory::NotConfigured {
                settings_url: Some(url),
            } => format!(
                "<span style=\"{STYLE} color:#1abc9c\">Page cache has not been configured yet. <a href=\"{}\">Configure it now</a></span>",
                escape_attr(url)
            ),
            Advisory::NotConfigured { settings_url: None } => format!(
                "<span style=\"{STYLE} color:#1abc9c\">Page cache has not been configured yet</span>"
            ),
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::NotConfigured { .. } => f.write_str("page cache not configured"),
            Advisory::StoreUnwritable => f.write_str("page cache directory not writable"),
        }
    }
}

const STYLE: &str = "text-align: center;display: block;margin: auto;font-size: 1.5em;";

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Concatenate the notices, in order, ahead of `body`.
pub fn prepend(advisories: &[Advisory], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + advisories.len() * 160);
    for advisory in advisories {
        out.extend_from_slice(advisory.to_html().as_bytes());
    }
    out.extend_from_slice(body);
    out
}
