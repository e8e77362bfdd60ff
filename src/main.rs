use std::{process, sync::Arc};

use tphtml_cache::{
    application::{error::AppError, upstream::Upstream},
    cache::{
        CacheKey, CacheResult, CacheState, DiskStore, MissReason, PageCache, SessionCookieAuth,
        SharedCacheConfig, lifecycle, policy,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Init(_) => run_init(&settings),
        config::Command::Teardown(_) => run_teardown(&settings),
        config::Command::Check(args) => run_check(&settings, &args.path),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let base = settings.upstream.url.clone().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "`upstream.url` is required to serve",
        ))
    })?;
    let upstream = Upstream::new(base, settings.upstream.timeout)?;

    lifecycle::initialize(&settings.cache.root)?;

    let cache_config = settings.cache.cache_config();
    if !cache_config.is_configured() {
        warn!(
            target: "tphtml_cache::serve",
            "No cacheable paths configured; every request will bypass the cache"
        );
    }

    let mut cache_state = CacheState::new(
        PageCache::new(DiskStore::new(settings.cache.root.clone())),
        Arc::new(SharedCacheConfig::new(cache_config)),
        Arc::new(SessionCookieAuth::new(settings.auth.session_cookies.clone())),
    );
    cache_state.settings_url = settings.cache.settings_url.as_deref().map(Arc::from);
    cache_state.max_body_bytes = settings.cache.max_body_bytes.get();

    let router = http::build_router(HttpState {
        upstream: upstream.clone(),
        cache: cache_state,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target: "tphtml_cache::serve",
        addr = %settings.server.addr,
        upstream = %upstream.base(),
        root = %settings.cache.root.display(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target: "tphtml_cache::serve", "Server stopped");
    Ok(())
}

fn run_init(settings: &config::Settings) -> Result<(), AppError> {
    lifecycle::initialize(&settings.cache.root)?;
    Ok(())
}

fn run_teardown(settings: &config::Settings) -> Result<(), AppError> {
    lifecycle::teardown(&settings.cache.root)?;
    Ok(())
}

fn run_check(settings: &config::Settings, path: &str) -> Result<(), AppError> {
    if path.is_empty() {
        return Err(AppError::validation("path must not be empty"));
    }

    let cache_config = settings.cache.cache_config();
    let store = DiskStore::new(settings.cache.root.clone());
    let key = CacheKey::from_uri(path);

    println!("path:     {path}");
    match policy::evaluate(path, &cache_config, false) {
        policy::Decision::Bypass(reason) => {
            println!("decision: bypass ({})", reason.as_str());
        }
        policy::Decision::Cache { ttl_seconds } => {
            let state = match store.lookup(&key, ttl_seconds) {
                CacheResult::Hit(_) => "fresh",
                CacheResult::Miss(MissReason::Stale) => "stale",
                CacheResult::Miss(MissReason::Absent) => "absent",
                CacheResult::Miss(MissReason::Unreadable) => "unreadable",
            };
            println!("decision: cache (ttl {ttl_seconds}s)");
            println!("entry:    {state}");
        }
    }
    println!("key:      {key}");
    println!("file:     {}", store.entry_path(&key).display());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target: "tphtml_cache::serve",
            error = %err,
            "Failed to listen for Ctrl-C; running until killed"
        );
        std::future::pending::<()>().await;
    }
    info!(target: "tphtml_cache::serve", "Shutdown signal received");
}
