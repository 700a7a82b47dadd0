pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod offline;
pub mod provider;
pub mod registry;
pub mod remote;

pub use aggregate::{AggregateCatalog, ProviderSlice};
pub use coordinator::{build_provider, Coordinator};
pub use error::{OfflineError, ProviderError, RegistryError};
pub use local::LocalProvider;
pub use offline::{OfflineEntry, OfflineOverlay, OfflineState};
pub use provider::{
    CatalogProvider, CatalogQuery, Page, PlaylistSource, ScanStatus, ServerInfo,
};
pub use registry::{provider_id_for, ProviderEntry, ProviderRegistry, RegistrySettings};
pub use remote::RemoteProvider;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::{
        album_id_for, artist_id_for, stable_id, Album, Artist, AudioFormat, Codec, Playlist,
        ProviderTag, Track,
    };
    use library::{CatalogStore, ScanOptions};
    use parking_lot::Mutex;

    use crate::aggregate::ProviderSlice;
    use crate::error::ProviderError;
    use crate::provider::{
        CatalogProvider, CatalogQuery, Page, PlaylistSource, ScanStatus, ServerInfo,
    };

    pub fn raw_track(relpath: &str, artist: &str, album: &str) -> Track {
        Track {
            id: stable_id(relpath),
            artist_id: artist_id_for(artist),
            album_id: album_id_for(artist, album),
            title: relpath.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            album_artist: None,
            duration_ms: 1000,
            file_relpath: relpath.to_string(),
            file_size: 10,
            format: AudioFormat::from_codec(Codec::Mp3),
            year: None,
            genre: None,
            track_no: None,
            disc_no: None,
            cover: None,
            added_at: 1,
            modified_at: 1,
            provider: None,
        }
    }

    pub fn tag(provider_id: &str) -> ProviderTag {
        ProviderTag {
            id: provider_id.to_string(),
            name: provider_id.to_uppercase(),
            color: None,
        }
    }

    pub fn track(provider_id: &str, relpath: &str, artist: &str, album: &str) -> Track {
        Track {
            provider: Some(tag(provider_id)),
            ..raw_track(relpath, artist, album)
        }
    }

    /// A slice as a provider would serve it, tagged with `provider_id`.
    pub fn slice_of(provider_id: &str, tracks: Vec<Track>) -> ProviderSlice {
        let store = CatalogStore::from_snapshot(tracks, Vec::new());
        ProviderSlice {
            tracks: store
                .tracks()
                .into_iter()
                .map(|t| Track {
                    provider: Some(tag(provider_id)),
                    ..t
                })
                .collect(),
            artists: store
                .artists()
                .into_iter()
                .map(|a| Artist {
                    provider: Some(tag(provider_id)),
                    ..a
                })
                .collect(),
            albums: store
                .albums()
                .into_iter()
                .map(|a| Album {
                    provider: Some(tag(provider_id)),
                    ..a
                })
                .collect(),
            playlists: Vec::new(),
        }
    }

    #[derive(Default)]
    pub struct FakeProvider {
        pub tracks: Mutex<Vec<Track>>,
        pub scanning: AtomicBool,
        pub fail: AtomicBool,
        pub status_calls: AtomicUsize,
        pub scan_requests: AtomicUsize,
        pub base: Option<String>,
    }

    impl FakeProvider {
        pub fn with_base(base: &str) -> Self {
            Self {
                base: Some(base.to_string()),
                ..Self::default()
            }
        }

        pub fn set_tracks(&self, tracks: Vec<Track>) {
            *self.tracks.lock() = tracks;
        }

        fn store(&self) -> Result<CatalogStore, ProviderError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::Unreachable("fake outage".into()));
            }
            Ok(CatalogStore::from_snapshot(self.tracks.lock().clone(), Vec::new()))
        }
    }

    #[async_trait]
    impl CatalogProvider for FakeProvider {
        async fn test_connection(&self) -> Result<ServerInfo, ProviderError> {
            self.store()?;
            Ok(ServerInfo {
                status: "ok".into(),
                name: "fake".into(),
                version: "0".into(),
            })
        }

        async fn get_tracks(&self, _query: &CatalogQuery) -> Result<Page<Track>, ProviderError> {
            let items = self.store()?.tracks();
            Ok(Page {
                total: items.len(),
                items,
            })
        }

        async fn get_artists(&self, _query: &CatalogQuery) -> Result<Page<Artist>, ProviderError> {
            let items = self.store()?.artists();
            Ok(Page {
                total: items.len(),
                items,
            })
        }

        async fn get_albums(&self, _query: &CatalogQuery) -> Result<Page<Album>, ProviderError> {
            let items = self.store()?.albums();
            Ok(Page {
                total: items.len(),
                items,
            })
        }

        async fn start_scan(&self, _options: &ScanOptions) -> Result<(), ProviderError> {
            self.scan_requests.fetch_add(1, Ordering::SeqCst);
            self.scanning.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn get_scan_status(&self) -> Result<ScanStatus, ProviderError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScanStatus {
                scanning: self.scanning.load(Ordering::SeqCst),
                ..ScanStatus::default()
            })
        }

        fn base_url(&self) -> Option<&str> {
            self.base.as_deref()
        }

        fn playlists(&self) -> Option<&dyn PlaylistSource> {
            Some(self)
        }
    }

    #[async_trait]
    impl PlaylistSource for FakeProvider {
        async fn get_playlists(&self) -> Result<Vec<Playlist>, ProviderError> {
            let ids = self.store()?.track_ids().into_iter().collect();
            Ok(vec![Playlist {
                id: "all".into(),
                name: "All".into(),
                track_ids: ids,
                provider: None,
            }])
        }
    }
}
