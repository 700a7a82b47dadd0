use axum::{
    extract::{Query, State},
    Json,
};
use common::{Album, Artist, Playlist, Track};

use crate::state::{AppState, ListQuery, ListResponse};

pub async fn list_tracks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ListResponse<Track>> {
    let (items, total) = state
        .library
        .list_tracks(query.search(), query.limit(), query.offset());
    Json(ListResponse { items, total })
}

pub async fn list_artists(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ListResponse<Artist>> {
    let (items, total) = state
        .library
        .list_artists(query.search(), query.limit(), query.offset());
    Json(ListResponse { items, total })
}

pub async fn list_albums(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ListResponse<Album>> {
    let (items, total) = state
        .library
        .list_albums(query.search(), query.limit(), query.offset());
    Json(ListResponse { items, total })
}

pub async fn list_playlists(State(state): State<AppState>) -> Json<ListResponse<Playlist>> {
    let items = state.library.playlists();
    let total = items.len();
    Json(ListResponse { items, total })
}

#[cfg(test)]
mod tests {
    use library::ScanOptions;
    use serde_json::Value;

    use crate::api::testing::serve;

    async fn get(url: String) -> Value {
        reqwest::get(url).await.unwrap().json().await.unwrap()
    }

    #[tokio::test]
    async fn pages_and_sentinel_limit() {
        let files: Vec<(String, Vec<u8>)> = (0..5)
            .map(|i| (format!("Band__Record__Song {i}.mp3"), vec![0u8; 8]))
            .collect();
        let refs: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
            .collect();
        let server = serve(&refs, None).await;
        server.state.library.scan(&ScanOptions::default()).await.unwrap();

        let page = get(format!("{}/tracks?limit=2&offset=1", server.base)).await;
        assert_eq!(page["total"], 5);
        assert_eq!(page["items"].as_array().unwrap().len(), 2);

        let all = get(format!("{}/tracks?limit=-1", server.base)).await;
        assert_eq!(all["items"].as_array().unwrap().len(), 5);

        let artists = get(format!("{}/artists", server.base)).await;
        assert_eq!(artists["total"], 1);
        assert_eq!(artists["items"][0]["name"], "Band");

        let albums = get(format!("{}/albums?search=record", server.base)).await;
        assert_eq!(albums["total"], 1);
        let none = get(format!("{}/albums?search=missing", server.base)).await;
        assert_eq!(none["total"], 0);
    }

    #[tokio::test]
    async fn playlists_come_from_m3u_files() {
        let server = serve(
            &[
                ("A__B__One.mp3", b"one"),
                ("A__B__Two.mp3", b"two"),
                ("mix.m3u", b"A__B__Two.mp3\nA__B__One.mp3\nmissing.mp3\n"),
            ],
            None,
        )
        .await;
        server.state.library.scan(&ScanOptions::default()).await.unwrap();

        let body = get(format!("{}/playlists", server.base)).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["name"], "mix");
        assert_eq!(body["items"][0]["track_ids"].as_array().unwrap().len(), 2);
    }
}
