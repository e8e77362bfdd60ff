use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the tphtml-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "tphtml-cache",
    version,
    about = "Disk-backed page cache for dynamic sites"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TPHTML_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the upstream site through the page cache.
    Serve(Box<ServeArgs>),
    /// Create the cache directory and its placeholder index.
    Init(RootArgs),
    /// Remove the cache directory and every cached page.
    Teardown(RootArgs),
    /// Show how the current configuration treats a request path.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache root directory.
    #[arg(long = "cache-root", value_name = "PATH")]
    pub cache_root: Option<PathBuf>,

    /// Override the comma separated list of cacheable path fragments.
    #[arg(long = "cache-allow-path", value_name = "PATHS")]
    pub cache_allow_path: Option<String>,

    /// Override the cache lifetime in seconds (0 disables caching).
    #[arg(long = "cache-time", value_name = "SECONDS")]
    pub cache_time: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the upstream site URL.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RootArgs {
    /// Override the cache root directory.
    #[arg(long = "cache-root", value_name = "PATH")]
    pub cache_root: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Request path (and optional query string) to evaluate.
    #[arg(value_name = "PATH")]
    pub path: String,
}
