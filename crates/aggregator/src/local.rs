use async_trait::async_trait;
use common::{Album, Artist, Playlist, Track};
use library::{Library, ScanOptions};
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::provider::{CatalogProvider, CatalogQuery, Page, PlaylistSource, ScanStatus, ServerInfo};

/// A `Library` on this machine, served without a network hop.
#[derive(Clone)]
pub struct LocalProvider {
    library: Library,
    name: String,
}

impl LocalProvider {
    pub fn new(library: Library, name: impl Into<String>) -> Self {
        Self {
            library,
            name: name.into(),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }
}

fn page<T>((items, total): (Vec<T>, usize)) -> Page<T> {
    Page { items, total }
}

#[async_trait]
impl CatalogProvider for LocalProvider {
    async fn test_connection(&self) -> Result<ServerInfo, ProviderError> {
        if !self.library.root().is_dir() {
            return Err(ProviderError::Unreachable(format!(
                "{} is not a directory",
                self.library.root().display()
            )));
        }
        Ok(ServerInfo {
            status: "ok".to_string(),
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn get_tracks(&self, query: &CatalogQuery) -> Result<Page<Track>, ProviderError> {
        Ok(page(self.library.list_tracks(
            query.search.as_deref(),
            query.limit(),
            query.offset,
        )))
    }

    async fn get_artists(&self, query: &CatalogQuery) -> Result<Page<Artist>, ProviderError> {
        Ok(page(self.library.list_artists(
            query.search.as_deref(),
            query.limit(),
            query.offset,
        )))
    }

    async fn get_albums(&self, query: &CatalogQuery) -> Result<Page<Album>, ProviderError> {
        Ok(page(self.library.list_albums(
            query.search.as_deref(),
            query.limit(),
            query.offset,
        )))
    }

    async fn start_scan(&self, options: &ScanOptions) -> Result<(), ProviderError> {
        if self.library.is_scanning() {
            return Err(ProviderError::ScanInProgress);
        }
        let library = self.library.clone();
        let options = options.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            match library.scan(&options).await {
                Ok(summary) => info!("Local scan of {} finished: {} tracks", name, summary.indexed),
                Err(err) => warn!("Local scan of {} failed: {}", name, err),
            }
        });
        Ok(())
    }

    async fn get_scan_status(&self) -> Result<ScanStatus, ProviderError> {
        let stats = self.library.stats();
        Ok(ScanStatus {
            scanning: self.library.is_scanning(),
            tracks: stats.tracks,
            artists: stats.artists,
            albums: stats.albums,
            last_scan: self.library.last_scan(),
        })
    }

    fn playlists(&self) -> Option<&dyn PlaylistSource> {
        Some(self)
    }
}

#[async_trait]
impl PlaylistSource for LocalProvider {
    async fn get_playlists(&self) -> Result<Vec<Playlist>, ProviderError> {
        Ok(self.library.playlists())
    }
}
