use async_trait::async_trait;
use common::{Album, Artist, Playlist, Track};
use library::ScanOptions;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{CatalogProvider, CatalogQuery, Page, PlaylistSource, ScanStatus, ServerInfo};

const API_PREFIX: &str = "/api/v1";

/// A provider reached over the HTTP contract served by the `server` crate.
pub struct RemoteProvider {
    http: Client,
    base_url: String,
    token: Option<String>,
}

/// Servers answer `/playlists` in more than one shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum PlaylistPayload {
    List(Vec<Playlist>),
    Items { items: Vec<Playlist> },
    Playlists { playlists: Vec<Playlist> },
}

impl PlaylistPayload {
    fn into_vec(self) -> Vec<Playlist> {
        match self {
            PlaylistPayload::List(items)
            | PlaylistPayload::Items { items }
            | PlaylistPayload::Playlists { playlists: items } => items,
        }
    }
}

impl RemoteProvider {
    pub fn new(url: &str, token: Option<String>) -> Result<Self, ProviderError> {
        let base_url = url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::InvalidUrl("URL cannot be empty".into()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProviderError::InvalidUrl(
                "URL must start with http:// or https://".into(),
            ));
        }
        let http = Client::builder()
            .user_agent(format!("sonance/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.filter(|token| !token.is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}/{}", self.base_url, API_PREFIX, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = self.authorize(request).send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                ProviderError::Unreachable(err.to_string())
            } else {
                ProviderError::Request(err)
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(ProviderError::AuthRequired),
            StatusCode::CONFLICT => Err(ProviderError::ScanInProgress),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(ProviderError::ServerError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = self.endpoint(path);
        debug!(url = %url, "Fetching");
        let response = self.send(self.http.get(&url).query(query)).await?;
        response
            .json()
            .await
            .map_err(|err| ProviderError::Parse(format!("{}: {}", path, err)))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &CatalogQuery,
    ) -> Result<Page<T>, ProviderError> {
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(search) = &query.search {
            params.push(("search", search.clone()));
        }
        self.get_json(path, &params).await
    }
}

#[async_trait]
impl CatalogProvider for RemoteProvider {
    async fn test_connection(&self) -> Result<ServerInfo, ProviderError> {
        self.get_json("health", &[]).await
    }

    async fn get_tracks(&self, query: &CatalogQuery) -> Result<Page<Track>, ProviderError> {
        self.get_page("tracks", query).await
    }

    async fn get_artists(&self, query: &CatalogQuery) -> Result<Page<Artist>, ProviderError> {
        self.get_page("artists", query).await
    }

    async fn get_albums(&self, query: &CatalogQuery) -> Result<Page<Album>, ProviderError> {
        self.get_page("albums", query).await
    }

    async fn start_scan(&self, options: &ScanOptions) -> Result<(), ProviderError> {
        let url = self.endpoint("scan");
        debug!(url = %url, "Requesting scan");
        self.send(self.http.post(&url).json(options)).await?;
        Ok(())
    }

    async fn get_scan_status(&self) -> Result<ScanStatus, ProviderError> {
        self.get_json("scan/status", &[]).await
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }

    fn playlists(&self) -> Option<&dyn PlaylistSource> {
        Some(self)
    }
}

#[async_trait]
impl PlaylistSource for RemoteProvider {
    async fn get_playlists(&self) -> Result<Vec<Playlist>, ProviderError> {
        let payload: PlaylistPayload = self.get_json("playlists", &[]).await?;
        Ok(payload.into_vec())
    }
}
