use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Album, Artist, Playlist, Track};
use metadata::{LoftyExtractor, MetadataError, MetadataExtractor};
use tokio::sync::broadcast;
use tracing::info;

pub mod cache;
pub mod gauge;
pub mod playlist;
pub mod scanner;
pub mod store;

pub use cache::{CacheDocument, CacheWriter, CatalogCache, SaveDecision, CACHE_VERSION};
pub use gauge::{StreamGauge, StreamGuard};
pub use scanner::{BatchProfile, ScanEvent, ScanOptions, ScanSummary, ScanTuning, Scanner};
pub use store::{CatalogStore, LibraryStats};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("cache encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("a scan is already running")]
    ScanInProgress,
    #[error("music root {0:?} does not exist or is not a directory")]
    RootMissing(PathBuf),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Knobs for `Library::open_with`. The defaults are what the server runs with.
#[derive(Clone)]
pub struct LibraryOptions {
    pub save_interval: Duration,
    pub tuning: ScanTuning,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub gauge: StreamGauge,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            save_interval: cache::DEFAULT_SAVE_INTERVAL,
            tuning: ScanTuning::default(),
            extractor: Arc::new(LoftyExtractor),
            gauge: StreamGauge::new(),
        }
    }
}

/// One local catalog: the in-memory store, its on-disk cache and the scanner
/// that keeps both in step with the music folder.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

struct LibraryInner {
    root: PathBuf,
    store: CatalogStore,
    gauge: StreamGauge,
    scanner: Scanner,
}

impl Library {
    pub fn open(root: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self::open_with(root, cache_path, LibraryOptions::default())
    }

    /// Loads whatever the cache holds. A missing or unreadable cache leaves
    /// the catalog empty until the first scan.
    pub fn open_with(
        root: impl Into<PathBuf>,
        cache_path: impl Into<PathBuf>,
        options: LibraryOptions,
    ) -> Self {
        let root = root.into();
        let cache = CatalogCache::new(cache_path);
        let store = match cache.load() {
            Some(document) => CatalogStore::from_snapshot(document.tracks, document.playlists),
            None => CatalogStore::new(),
        };
        let stats = store.stats();
        info!(
            "Opened library at {:?}: {} tracks, {} albums, {} artists",
            root, stats.tracks, stats.albums, stats.artists
        );
        let writer = Arc::new(CacheWriter::new(cache, options.save_interval));
        let scanner = Scanner::new(
            store.clone(),
            options.extractor,
            options.gauge.clone(),
            writer,
            options.tuning,
        );
        Self {
            inner: Arc::new(LibraryInner {
                root,
                store,
                gauge: options.gauge,
                scanner,
            }),
        }
    }

    pub async fn scan(&self, options: &ScanOptions) -> Result<ScanSummary, LibraryError> {
        self.inner.scanner.scan(&self.inner.root, options).await
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanner.is_scanning()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.scanner.subscribe()
    }

    pub fn last_scan(&self) -> Option<ScanSummary> {
        self.inner.scanner.last_summary()
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn store(&self) -> &CatalogStore {
        &self.inner.store
    }

    pub fn gauge(&self) -> &StreamGauge {
        &self.inner.gauge
    }

    pub fn stats(&self) -> LibraryStats {
        self.inner.store.stats()
    }

    pub fn list_tracks(
        &self,
        search: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> (Vec<Track>, usize) {
        self.inner.store.list_tracks(search, limit, offset)
    }

    pub fn list_artists(
        &self,
        search: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> (Vec<Artist>, usize) {
        self.inner.store.list_artists(search, limit, offset)
    }

    pub fn list_albums(
        &self,
        search: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> (Vec<Album>, usize) {
        self.inner.store.list_albums(search, limit, offset)
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.inner.store.playlists()
    }

    pub fn get_track(&self, track_id: &str) -> Option<Track> {
        self.inner.store.get_track(track_id)
    }

    pub fn get_album(&self, album_id: &str) -> Option<Album> {
        self.inner.store.get_album(album_id)
    }

    pub fn get_artist(&self, artist_id: &str) -> Option<Artist> {
        self.inner.store.get_artist(artist_id)
    }

    /// Absolute path of a track's file, if the track is known.
    pub fn track_path(&self, track_id: &str) -> Option<PathBuf> {
        self.get_track(track_id)
            .map(|track| common::join_relpath(&self.inner.root, &track.file_relpath))
    }

    /// Writes the cache now and drops any pending throttled write.
    pub async fn close(&self) -> Result<(), LibraryError> {
        let writer = self.inner.scanner.writer();
        let result = writer.flush(&self.inner.store).await;
        writer.cancel();
        result
    }
}

pub(crate) fn now_millis() -> u64 {
    system_time_millis(SystemTime::now())
}

pub(crate) fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
