use std::io::SeekFrom;

use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::range::{requested_range, RangeError};
use crate::state::AppState;
use crate::utils::json_error_response;

/// Streams a track's file, honouring a single `Range`. The stream counts as
/// active playback until the body is dropped.
pub async fn stream_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let Some(path) = state.library.track_path(&track_id) else {
        return json_error_response(StatusCode::NOT_FOUND, "track not found");
    };
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            warn!("Failed to open {}: {}", path.display(), err);
            return json_error_response(StatusCode::NOT_FOUND, "file not found");
        }
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(err) => {
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("io error: {}", err),
            )
        }
    };

    let range_header = headers.get(header::RANGE).and_then(|value| value.to_str().ok());
    let range = match requested_range(range_header, size) {
        Ok(range) => range,
        Err(RangeError::Unsatisfiable | RangeError::Invalid) => {
            let mut response = json_error_response(
                StatusCode::RANGE_NOT_SATISFIABLE,
                "range not satisfiable",
            );
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }
    };

    let (status, start, len) = match range {
        Some(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.len()),
        None => (StatusCode::OK, 0, size),
    };
    if start > 0 {
        if let Err(err) = file.seek(SeekFrom::Start(start)).await {
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("io error: {}", err),
            );
        }
    }
    debug!(track_id = %track_id, start, len, "Streaming track");

    let guard = state.library.gauge().track();
    let stream = ReaderStream::new(file.take(len)).map(move |chunk| {
        let _streaming = &guard;
        chunk
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Some(range) = range {
        if let Ok(value) = HeaderValue::from_str(&range.content_range(size)) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }
    response
}

pub async fn get_cover(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<String>,
) -> Response {
    let Some(path) = state.library.track_path(&track_id) else {
        return json_error_response(StatusCode::NOT_FOUND, "track not found");
    };
    match tokio::task::spawn_blocking(move || metadata::read_cover(&path)).await {
        Ok(Ok(Some(cover))) => {
            let mime = cover.mime.as_deref().unwrap_or("application/octet-stream");
            cover_response(cover.data, mime)
        }
        Ok(Ok(None)) => json_error_response(StatusCode::NOT_FOUND, "cover not found"),
        Ok(Err(err)) => {
            debug!(track_id = %track_id, "No readable cover: {}", err);
            json_error_response(StatusCode::NOT_FOUND, "cover not found")
        }
        Err(err) => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("cover task failed: {}", err),
        ),
    }
}

fn cover_response(data: Vec<u8>, mime: &str) -> Response {
    let mut response = Response::new(Body::from(data));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    response
}

#[cfg(test)]
mod tests {
    use library::ScanOptions;

    use crate::api::testing::serve;

    const AUDIO: &[u8] = b"0123456789abcdefghij";

    #[tokio::test]
    async fn full_and_partial_streams() {
        let server = serve(&[("A__B__One.mp3", AUDIO)], None).await;
        server.state.library.scan(&ScanOptions::default()).await.unwrap();
        let track_id = server.state.library.store().tracks()[0].id.clone();
        let url = format!("{}/stream/{}", server.base, track_id);
        let client = reqwest::Client::new();

        let full = client.get(&url).send().await.unwrap();
        assert_eq!(full.status(), 200);
        assert_eq!(full.headers()["accept-ranges"], "bytes");
        assert_eq!(full.headers()["content-type"], "audio/mpeg");
        assert_eq!(full.bytes().await.unwrap().as_ref(), AUDIO);

        let partial = client
            .get(&url)
            .header("Range", "bytes=5-9")
            .send()
            .await
            .unwrap();
        assert_eq!(partial.status(), 206);
        assert_eq!(partial.headers()["content-range"], "bytes 5-9/20");
        assert_eq!(partial.bytes().await.unwrap().as_ref(), b"56789");

        let past_end = client
            .get(&url)
            .header("Range", "bytes=50-")
            .send()
            .await
            .unwrap();
        assert_eq!(past_end.status(), 416);
        assert_eq!(past_end.headers()["content-range"], "bytes */20");
    }

    #[tokio::test]
    async fn stream_guard_is_released_with_the_body() {
        let server = serve(&[("A__B__One.mp3", AUDIO)], None).await;
        server.state.library.scan(&ScanOptions::default()).await.unwrap();
        let track_id = server.state.library.store().tracks()[0].id.clone();

        let response = reqwest::get(format!("{}/stream/{}", server.base, track_id))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        drop(response);
        for _ in 0..100 {
            if server.state.library.gauge().active() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.state.library.gauge().active(), 0);
    }

    #[tokio::test]
    async fn unknown_tracks_and_missing_covers_are_404() {
        let server = serve(&[("A__B__One.mp3", AUDIO)], None).await;
        server.state.library.scan(&ScanOptions::default()).await.unwrap();
        let track_id = server.state.library.store().tracks()[0].id.clone();

        let missing = reqwest::get(format!("{}/stream/nope", server.base)).await.unwrap();
        assert_eq!(missing.status(), 404);
        let cover = reqwest::get(format!("{}/covers/{}", server.base, track_id))
            .await
            .unwrap();
        assert_eq!(cover.status(), 404);
    }
}
