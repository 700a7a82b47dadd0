pub mod catalog;
pub mod media;
pub mod scan;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, HealthResponse};
use crate::utils::{extract_token, json_error_response};

/// Routes served under `/api/v1`.
pub fn api_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/tracks", get(catalog::list_tracks))
        .route("/artists", get(catalog::list_artists))
        .route("/albums", get(catalog::list_albums))
        .route("/playlists", get(catalog::list_playlists))
        .route("/scan", post(scan::start_scan))
        .route("/scan/status", get(scan::scan_status))
        .route("/stream/:track_id", get(media::stream_track))
        .route("/covers/:track_id", get(media::get_cover))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn require_token(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(expected) = state.config.token() else {
        return next.run(req).await;
    };
    match extract_token(req.headers()) {
        Some(token) if token == expected => next.run(req).await,
        _ => json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        name: state.config.server_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use library::{Library, LibraryOptions};
    use metadata::{MetadataError, MetadataExtractor, TagInfo};
    use tempfile::TempDir;

    use crate::config::ServerConfig;
    use crate::state::AppState;

    /// Tags come from `artist__album__title` file stems. Files by the
    /// artist `slow` take a while to read.
    pub struct StemExtractor;

    impl MetadataExtractor for StemExtractor {
        fn extract(&self, path: &Path) -> Result<TagInfo, MetadataError> {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default();
            let parts: Vec<&str> = stem.split("__").collect();
            if parts.len() != 3 {
                return Err(MetadataError::Unsupported(stem.to_string()));
            }
            if parts[0] == "slow" {
                std::thread::sleep(std::time::Duration::from_millis(300));
            }
            Ok(TagInfo {
                artist: Some(parts[0].to_string()),
                album: Some(parts[1].to_string()),
                title: Some(parts[2].to_string()),
                duration_ms: Some(1_000),
                ..TagInfo::default()
            })
        }
    }

    pub struct TestServer {
        pub base: String,
        pub state: AppState,
        pub root: PathBuf,
        _dir: TempDir,
    }

    /// Serves a library over `files` (name, bytes) on an ephemeral port.
    pub async fn serve(files: &[(&str, &[u8])], token: Option<&str>) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        std::fs::create_dir_all(&root).unwrap();
        for (name, bytes) in files {
            std::fs::write(root.join(name), bytes).unwrap();
        }
        let library = Library::open_with(
            &root,
            dir.path().join("catalog.json"),
            LibraryOptions {
                extractor: Arc::new(StemExtractor),
                ..LibraryOptions::default()
            },
        );
        let config = ServerConfig {
            api_token: token.map(str::to_string),
            watch_music: false,
            ..ServerConfig::default()
        };
        let state = AppState::new(library, config);
        let app = axum::Router::new().nest("/api/v1", super::api_router(state.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestServer {
            base: format!("http://{}/api/v1", addr),
            state,
            root,
            _dir: dir,
        }
    }
}
