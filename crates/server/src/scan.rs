use library::{LibraryError, ScanOptions};
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::watch::configure_watcher;

/// Starts a background scan. Returns false when one is already running.
pub fn start_scan(state: &AppState, options: ScanOptions) -> bool {
    if state.library.is_scanning() {
        return false;
    }
    let state = state.clone();
    tokio::spawn(async move {
        run_scan(state, options).await;
    });
    true
}

pub async fn run_scan(state: AppState, options: ScanOptions) {
    match state.library.scan(&options).await {
        Ok(summary) => {
            let stats = state.library.stats();
            info!(
                "Library ready: {} artists, {} albums, {} tracks ({} pruned)",
                stats.artists, stats.albums, stats.tracks, summary.pruned
            );
            if options.watch_folders || state.config.watch_enabled() {
                configure_watcher(&state);
            } else {
                debug!("Folder watching disabled");
            }
        }
        Err(LibraryError::ScanInProgress) => debug!("Scan request ignored; already scanning"),
        Err(err) => warn!("Library scan failed: {}", err),
    }
}
