mod api;
mod config;
mod range;
mod scan;
mod state;
mod utils;
mod watch;

use std::time::Duration;

use axum::Router;
use api::api_router;
use config::{config_path_from_env, load_or_create_config, resolve_music_root, resolve_path};
use library::{Library, LibraryOptions};
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let Some(music_root) = resolve_music_root(&config_path, &config.music_root) else {
        return Err(format!("music_root is not set in {}", config_path.display()).into());
    };
    if !music_root.is_dir() {
        warn!("Music directory not found: {}", music_root.display());
    }

    let cache_value = config.cache_path.trim();
    let cache_value = if cache_value.is_empty() {
        "catalog.json"
    } else {
        cache_value
    };
    let cache_path = resolve_path(&config_path, cache_value);
    if let Some(parent) = cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let port = if config.port == 0 { 3000 } else { config.port };
    let bind_addr = format!("0.0.0.0:{}", port);
    if config.token().is_none() {
        info!("No api_token configured; the API is open");
    }

    let library = Library::open_with(
        &music_root,
        &cache_path,
        LibraryOptions {
            save_interval: Duration::from_secs(config.cache_save_interval_secs),
            ..LibraryOptions::default()
        },
    );
    let state = AppState::new(library.clone(), config);

    let initial_scan = state.clone();
    let options = state.config.scan.clone();
    tokio::spawn(async move {
        scan::run_scan(initial_scan, options).await;
    });

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.watcher.write().take();
    if let Err(err) = library.close().await {
        warn!("Failed to write catalog cache on shutdown: {}", err);
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
