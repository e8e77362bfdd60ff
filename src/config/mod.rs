//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, DEFAULT_MAX_BODY_BYTES};

mod cli;

pub use cli::{
    CacheOverrides, CheckArgs, CliArgs, Command, RootArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tphtml-cache";
const ENV_PREFIX: &str = "TPHTML_CACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_ROOT: &str = "cache";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_COOKIES: [&str; 2] = ["__typecho_uid", "__typecho_authCode"];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub upstream: UpstreamSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub allowed_prefixes: Vec<String>,
    pub ttl_seconds: Option<u64>,
    pub settings_url: Option<String>,
    pub max_body_bytes: NonZeroUsize,
}

impl CacheSettings {
    /// Snapshot handed to the policy and store.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.allowed_prefixes.clone(), self.ttl_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Base URL of the site being cached. Only `serve` requires it.
    pub url: Option<reqwest::Url>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_cookies: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Init(args)) | Some(Command::Teardown(args)) => raw.apply_root_override(args),
        Some(Command::Check(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    upstream: RawUpstreamSettings,
    auth: RawAuthSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.url = Some(url.clone());
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
        if let Some(allow_path) = overrides.cache_allow_path.as_ref() {
            self.cache.allow_path = Some(allow_path.clone());
        }
        if let Some(seconds) = overrides.cache_time {
            self.cache.cache_time = Some(seconds.to_string());
        }
    }

    fn apply_root_override(&mut self, overrides: &RootArgs) {
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            upstream,
            auth,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            upstream: build_upstream_settings(upstream)?,
            auth: build_auth_settings(auth),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "path must not be empty"));
    }

    let allowed_prefixes = cache
        .allow_path
        .as_deref()
        .map(|allow_path| CacheConfig::from_allow_path(allow_path, None).allowed_prefixes)
        .unwrap_or_default();

    let ttl_seconds = match cache.cache_time.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(value.parse::<u64>().map_err(|err| {
            LoadError::invalid(
                "cache.cache_time",
                format!("expected a non-negative number of seconds: {err}"),
            )
        })?),
    };

    let settings_url = cache.settings_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_body_bytes = cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_bytes = NonZeroUsize::new(max_body_bytes)
        .ok_or_else(|| LoadError::invalid("cache.max_body_bytes", "must be greater than zero"))?;

    Ok(CacheSettings {
        root,
        allowed_prefixes,
        ttl_seconds,
        settings_url,
        max_body_bytes,
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let url = match upstream.url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => {
            let url = reqwest::Url::parse(value)
                .map_err(|err| LoadError::invalid("upstream.url", format!("invalid URL: {err}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "upstream.url",
                    "scheme must be http or https",
                ));
            }
            Some(url)
        }
    };

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    let session_cookies = auth
        .session_cookies
        .unwrap_or_else(|| DEFAULT_SESSION_COOKIES.map(str::to_string).to_vec())
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    AuthSettings { session_cookies }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root: Option<PathBuf>,
    allow_path: Option<String>,
    cache_time: Option<String>,
    settings_url: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    session_cookies: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
