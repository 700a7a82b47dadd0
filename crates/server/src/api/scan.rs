use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use library::ScanOptions;

use crate::state::{AppState, ScanStartedResponse, ScanStatusResponse};
use crate::utils::json_error_response;

/// An empty body scans with the configured options.
pub async fn start_scan(
    State(state): State<AppState>,
    options: Option<Json<ScanOptions>>,
) -> Response {
    let options = options
        .map(|Json(options)| options)
        .unwrap_or_else(|| state.config.scan.clone());
    if crate::scan::start_scan(&state, options) {
        (StatusCode::ACCEPTED, Json(ScanStartedResponse { started: true })).into_response()
    } else {
        json_error_response(StatusCode::CONFLICT, "scan already in progress")
    }
}

pub async fn scan_status(State(state): State<AppState>) -> Json<ScanStatusResponse> {
    let stats = state.library.stats();
    Json(ScanStatusResponse {
        scanning: state.library.is_scanning(),
        tracks: stats.tracks,
        artists: stats.artists,
        albums: stats.albums,
        last_scan: state.library.last_scan(),
    })
}
