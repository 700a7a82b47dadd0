use async_trait::async_trait;
use common::{Album, Artist, Playlist, Track};
use library::{ScanOptions, ScanSummary};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Page request understood by every provider. `limit == ALL` asks for the
/// complete set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogQuery {
    pub limit: i64,
    pub offset: usize,
    pub search: Option<String>,
}

impl CatalogQuery {
    pub const ALL: i64 = -1;

    pub fn all() -> Self {
        Self {
            limit: Self::ALL,
            offset: 0,
            search: None,
        }
    }

    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.min(i64::MAX as usize) as i64,
            offset,
            search: None,
        }
    }

    /// `None` when the whole set was requested.
    pub fn limit(&self) -> Option<usize> {
        if self.limit < 0 {
            None
        } else {
            Some(self.limit as usize)
        }
    }
}

impl Default for CatalogQuery {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub status: String,
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub scanning: bool,
    #[serde(default)]
    pub tracks: usize,
    #[serde(default)]
    pub artists: usize,
    #[serde(default)]
    pub albums: usize,
    #[serde(default)]
    pub last_scan: Option<ScanSummary>,
}

/// One independent source of catalog data.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn test_connection(&self) -> Result<ServerInfo, ProviderError>;

    async fn get_tracks(&self, query: &CatalogQuery) -> Result<Page<Track>, ProviderError>;

    async fn get_artists(&self, query: &CatalogQuery) -> Result<Page<Artist>, ProviderError>;

    async fn get_albums(&self, query: &CatalogQuery) -> Result<Page<Album>, ProviderError>;

    async fn start_scan(&self, options: &ScanOptions) -> Result<(), ProviderError>;

    async fn get_scan_status(&self) -> Result<ScanStatus, ProviderError>;

    /// Origin that relative cover references resolve against.
    fn base_url(&self) -> Option<&str> {
        None
    }

    fn playlists(&self) -> Option<&dyn PlaylistSource> {
        None
    }
}

/// Optional capability: providers that can list playlists.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn get_playlists(&self) -> Result<Vec<Playlist>, ProviderError>;
}

/// Turns a provider-relative cover reference into an absolute URL.
pub fn absolute_cover_url(base_url: Option<&str>, cover: &str) -> String {
    let lowered = cover.to_ascii_lowercase();
    if lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("data:")
    {
        return cover.to_string();
    }
    let base = match base_url {
        Some(base) => base.trim_end_matches('/'),
        None => return cover.to_string(),
    };
    if cover.starts_with('/') {
        format!("{}{}", base, cover)
    } else {
        format!("{}/api/v1/{}", base, cover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_query_uses_the_sentinel() {
        let query = CatalogQuery::all();
        assert_eq!(query.limit, -1);
        assert_eq!(query.limit(), None);
        assert_eq!(CatalogQuery::page(50, 10).limit(), Some(50));
    }

    #[test]
    fn relative_covers_become_absolute() {
        let base = Some("http://nas:8080/");
        assert_eq!(
            absolute_cover_url(base, "covers/abc"),
            "http://nas:8080/api/v1/covers/abc"
        );
        assert_eq!(
            absolute_cover_url(base, "/api/v1/covers/abc"),
            "http://nas:8080/api/v1/covers/abc"
        );
        assert_eq!(
            absolute_cover_url(base, "https://img.example/x.jpg"),
            "https://img.example/x.jpg"
        );
        assert_eq!(absolute_cover_url(None, "covers/abc"), "covers/abc");
    }
}
