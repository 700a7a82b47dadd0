use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Playlist, Track};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::CatalogStore;
use crate::{now_millis, LibraryError};

pub const CACHE_VERSION: u32 = 1;
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheDocument {
    pub version: u32,
    pub saved_at: u64,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
}

impl CacheDocument {
    pub fn from_store(store: &CatalogStore) -> Self {
        Self {
            version: CACHE_VERSION,
            saved_at: now_millis(),
            tracks: store.tracks(),
            playlists: store.playlists(),
        }
    }
}

/// On-disk snapshot of one catalog store.
#[derive(Clone, Debug)]
pub struct CatalogCache {
    path: PathBuf,
}

impl CatalogCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` means there is nothing usable on disk. A missing, unreadable or
    /// corrupt file never fails startup; the next scan simply re-indexes.
    pub fn load(&self) -> Option<CacheDocument> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No catalog cache at {:?}; starting empty", self.path);
                return None;
            }
            Err(err) => {
                warn!("Failed to read catalog cache {:?}: {}", self.path, err);
                return None;
            }
        };
        let document: CacheDocument = match serde_json::from_slice(&data) {
            Ok(document) => document,
            Err(err) => {
                warn!("Catalog cache {:?} is corrupt ({}); ignoring it", self.path, err);
                return None;
            }
        };
        if document.version != CACHE_VERSION {
            warn!(
                "Catalog cache version mismatch ({} != {}); ignoring it",
                document.version, CACHE_VERSION
            );
            return None;
        }
        info!(
            "Loaded catalog cache from {:?} ({} tracks)",
            self.path,
            document.tracks.len()
        );
        Some(document)
    }

    pub fn save(&self, document: &CacheDocument) -> Result<(), LibraryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec(document)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved catalog cache ({} tracks)", document.tracks.len());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveDecision {
    Saved,
    Scheduled,
    Coalesced,
}

/// Throttles cache writes: at most one write per interval, with a single
/// pending timer absorbing every request made in between.
pub struct CacheWriter {
    cache: CatalogCache,
    interval: Duration,
    state: Arc<Mutex<WriterState>>,
}

#[derive(Default)]
struct WriterState {
    last_save: Option<Instant>,
    pending: Option<JoinHandle<()>>,
}

impl CacheWriter {
    pub fn new(cache: CatalogCache, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            state: Arc::new(Mutex::new(WriterState::default())),
        }
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub async fn request_save(&self, store: &CatalogStore) -> SaveDecision {
        let wait = {
            let mut state = self.state.lock();
            if let Some(pending) = &state.pending {
                if !pending.is_finished() {
                    return SaveDecision::Coalesced;
                }
            }
            state.pending = None;
            match state.last_save {
                Some(at) if at.elapsed() < self.interval => Some(self.interval - at.elapsed()),
                _ => {
                    state.last_save = Some(Instant::now());
                    None
                }
            }
        };

        match wait {
            None => {
                if let Err(err) = write_snapshot(self.cache.clone(), store).await {
                    warn!("Failed to save catalog cache: {}", err);
                }
                SaveDecision::Saved
            }
            Some(delay) => {
                let cache = self.cache.clone();
                let store = store.clone();
                let state = Arc::clone(&self.state);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    state.lock().last_save = Some(Instant::now());
                    if let Err(err) = write_snapshot(cache, &store).await {
                        warn!("Failed to save catalog cache: {}", err);
                    }
                });
                self.state.lock().pending = Some(handle);
                SaveDecision::Scheduled
            }
        }
    }

    /// Writes now and drops any pending timer.
    pub async fn flush(&self, store: &CatalogStore) -> Result<(), LibraryError> {
        {
            let mut state = self.state.lock();
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.last_save = Some(Instant::now());
        }
        write_snapshot(self.cache.clone(), store).await
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.state.lock().pending.take() {
            pending.abort();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.state
            .lock()
            .pending
            .as_ref()
            .map(|pending| !pending.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn write_snapshot(cache: CatalogCache, store: &CatalogStore) -> Result<(), LibraryError> {
    let document = CacheDocument::from_store(store);
    tokio::task::spawn_blocking(move || cache.save(&document)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{stable_id, AudioFormat, Codec};

    fn track(relpath: &str) -> Track {
        Track {
            id: stable_id(relpath),
            artist_id: common::artist_id_for("A"),
            album_id: common::album_id_for("A", "B"),
            title: relpath.to_string(),
            artist: "A".to_string(),
            album: "B".to_string(),
            album_artist: None,
            duration_ms: 0,
            file_relpath: relpath.to_string(),
            file_size: 0,
            format: AudioFormat::from_codec(Codec::Mp3),
            year: Some(2001),
            genre: None,
            track_no: Some(1),
            disc_no: None,
            cover: None,
            added_at: 5,
            modified_at: 7,
            provider: None,
        }
    }

    fn saved_tracks(cache: &CatalogCache) -> usize {
        cache.load().map(|doc| doc.tracks.len()).unwrap_or(0)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().join("nope.json"));
        assert!(cache.load().is_none());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(CatalogCache::new(&path).load().is_none());
    }

    #[test]
    fn unknown_version_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, br#"{"version": 999, "saved_at": 0, "tracks": []}"#).unwrap();
        assert!(CatalogCache::new(&path).load().is_none());
    }

    #[test]
    fn save_then_load_keeps_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().join("nested").join("catalog.json"));
        let store = CatalogStore::new();
        store.upsert(track("A/B/01.mp3"));
        cache.save(&CacheDocument::from_store(&store)).unwrap();

        let document = cache.load().unwrap();
        assert_eq!(document.version, CACHE_VERSION);
        assert_eq!(document.tracks[0].added_at, 5);
        assert_eq!(document.tracks[0].modified_at, 7);
        assert_eq!(document.tracks[0].file_relpath, "A/B/01.mp3");
    }

    #[tokio::test]
    async fn writes_inside_the_interval_are_coalesced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().join("catalog.json"));
        let writer = CacheWriter::new(cache.clone(), Duration::from_millis(200));
        let store = CatalogStore::new();

        store.upsert(track("1.mp3"));
        assert_eq!(writer.request_save(&store).await, SaveDecision::Saved);
        assert_eq!(saved_tracks(&cache), 1);

        store.upsert(track("2.mp3"));
        assert_eq!(writer.request_save(&store).await, SaveDecision::Scheduled);
        store.upsert(track("3.mp3"));
        assert_eq!(writer.request_save(&store).await, SaveDecision::Coalesced);
        assert!(writer.has_pending());
        assert_eq!(saved_tracks(&cache), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!writer.has_pending());
        assert_eq!(saved_tracks(&cache), 3);
    }

    #[tokio::test]
    async fn dropping_the_writer_cancels_the_pending_flush() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().join("catalog.json"));
        let store = CatalogStore::new();
        {
            let writer = CacheWriter::new(cache.clone(), Duration::from_millis(100));
            store.upsert(track("1.mp3"));
            writer.request_save(&store).await;
            store.upsert(track("2.mp3"));
            assert_eq!(writer.request_save(&store).await, SaveDecision::Scheduled);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(saved_tracks(&cache), 1);
    }

    #[tokio::test]
    async fn flush_writes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CatalogCache::new(dir.path().join("catalog.json"));
        let writer = CacheWriter::new(cache.clone(), Duration::from_secs(3600));
        let store = CatalogStore::new();
        store.upsert(track("1.mp3"));
        writer.request_save(&store).await;
        store.upsert(track("2.mp3"));
        writer.request_save(&store).await;
        writer.flush(&store).await.unwrap();
        assert!(!writer.has_pending());
        assert_eq!(saved_tracks(&cache), 2);
    }
}
