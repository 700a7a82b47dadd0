use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    album_id_for, artist_id_for, primary_artist_name, relpath_from, stable_id, AudioFormat, Codec,
    Playlist, Track, UNKNOWN_ALBUM, UNKNOWN_ARTIST,
};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use metadata::{MetadataExtractor, TagInfo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::gauge::StreamGauge;
use crate::playlist::{is_playlist_file, parse_m3u};
use crate::store::CatalogStore;
use crate::{now_millis, system_time_millis, LibraryError};

const EVENT_CAPACITY: usize = 256;

const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    ".Trash",
    ".Trashes",
    ".Trash-1000",
    "$RECYCLE.BIN",
    "System Volume Information",
    ".cache",
    "@eaDir",
];

/// Options a caller (or a remote client) can pass along with a scan request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Files above this size are ignored. Zero disables the limit.
    pub scan_file_size_limit_mb: u64,
    /// Embedded covers above this size are not referenced. Zero disables it.
    pub cover_art_size_limit_kb: u64,
    pub watch_folders: bool,
    pub parallel_scanning: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scan_file_size_limit_mb: 0,
            cover_art_size_limit_kb: 0,
            watch_folders: false,
            parallel_scanning: true,
        }
    }
}

/// Batch sizes and yields for the two I/O profiles.
#[derive(Clone, Debug)]
pub struct ScanTuning {
    pub idle_batch: usize,
    pub idle_delay: Duration,
    pub busy_batch: usize,
    pub busy_delay: Duration,
    pub dir_concurrency: usize,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            idle_batch: 10,
            idle_delay: Duration::from_millis(20),
            busy_batch: 1,
            busy_delay: Duration::from_millis(500),
            dir_concurrency: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchProfile {
    pub batch_size: usize,
    pub delay: Duration,
    pub throttled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Files present in the catalog after this pass.
    pub indexed: usize,
    pub extracted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pruned: usize,
    pub playlists: usize,
    pub duration_ms: u64,
}

#[derive(Clone, Debug)]
pub enum ScanEvent {
    Started { root: PathBuf },
    Progress {
        indexed: usize,
        batch_size: usize,
        throttled: bool,
    },
    Completed(ScanSummary),
    Failed { message: String },
}

/// Walks a directory tree into a `CatalogStore`. One scan at a time.
pub struct Scanner {
    store: CatalogStore,
    extractor: Arc<dyn MetadataExtractor>,
    gauge: StreamGauge,
    writer: Arc<CacheWriter>,
    tuning: ScanTuning,
    events: broadcast::Sender<ScanEvent>,
    scanning: AtomicBool,
    last_summary: Mutex<Option<ScanSummary>>,
}

impl Scanner {
    pub fn new(
        store: CatalogStore,
        extractor: Arc<dyn MetadataExtractor>,
        gauge: StreamGauge,
        writer: Arc<CacheWriter>,
        tuning: ScanTuning,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            extractor,
            gauge,
            writer,
            tuning,
            events,
            scanning: AtomicBool::new(false),
            last_summary: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn last_summary(&self) -> Option<ScanSummary> {
        self.last_summary.lock().clone()
    }

    pub fn writer(&self) -> &CacheWriter {
        &self.writer
    }

    /// Profile for the next file batch, read fresh from the gauge each time.
    pub fn file_profile(&self, options: &ScanOptions) -> BatchProfile {
        if self.gauge.is_streaming() {
            BatchProfile {
                batch_size: self.tuning.busy_batch.max(1),
                delay: self.tuning.busy_delay,
                throttled: true,
            }
        } else {
            let batch_size = if options.parallel_scanning {
                self.tuning.idle_batch
            } else {
                1
            };
            BatchProfile {
                batch_size: batch_size.max(1),
                delay: self.tuning.idle_delay,
                throttled: false,
            }
        }
    }

    pub fn dir_profile(&self, options: &ScanOptions) -> BatchProfile {
        let file_profile = self.file_profile(options);
        let batch_size = if file_profile.throttled || !options.parallel_scanning {
            1
        } else {
            self.tuning.dir_concurrency.max(1)
        };
        BatchProfile {
            batch_size,
            ..file_profile
        }
    }

    pub async fn scan(&self, root: &Path, options: &ScanOptions) -> Result<ScanSummary, LibraryError> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LibraryError::ScanInProgress);
        }
        let _flag = ScanFlag(&self.scanning);

        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                let err = LibraryError::RootMissing(root.to_path_buf());
                self.emit(ScanEvent::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
        }

        let started = Instant::now();
        info!("Scanning {}", root.display());
        self.emit(ScanEvent::Started {
            root: root.to_path_buf(),
        });

        let pass = ScanPass::new(self, root, options);
        pass.walk_dir(root.to_path_buf()).await;
        pass.collect_playlists().await;

        let seen = std::mem::take(&mut *pass.seen.lock());
        let pruned = self.store.retain_tracks(&seen);
        if pruned > 0 {
            info!("Pruned {} tracks no longer on disk", pruned);
        }
        let seen_playlists = std::mem::take(&mut *pass.seen_playlists.lock());
        self.store.retain_playlists(&seen_playlists);

        if let Err(err) = self.writer.flush(&self.store).await {
            warn!("Failed to save catalog cache: {}", err);
        }

        let summary = ScanSummary {
            indexed: pass.counters.indexed.load(Ordering::Relaxed),
            extracted: pass.counters.extracted.load(Ordering::Relaxed),
            unchanged: pass.counters.unchanged.load(Ordering::Relaxed),
            failed: pass.counters.failed.load(Ordering::Relaxed),
            skipped: pass.counters.skipped.load(Ordering::Relaxed),
            pruned,
            playlists: seen_playlists.len(),
            duration_ms: started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64,
        };
        info!(
            "Scan finished: {} indexed ({} extracted, {} unchanged, {} failed), {} pruned in {} ms",
            summary.indexed,
            summary.extracted,
            summary.unchanged,
            summary.failed,
            summary.pruned,
            summary.duration_ms
        );
        *self.last_summary.lock() = Some(summary.clone());
        self.emit(ScanEvent::Completed(summary.clone()));
        Ok(summary)
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }
}

struct ScanFlag<'a>(&'a AtomicBool);

impl Drop for ScanFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScanCounters {
    indexed: AtomicUsize,
    extracted: AtomicUsize,
    unchanged: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileOutcome {
    Indexed,
    Unchanged,
    Failed,
    Skipped,
}

#[derive(Default)]
struct DirListing {
    files: Vec<PathBuf>,
    playlists: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// State for a single walk of the tree.
struct ScanPass<'a> {
    scanner: &'a Scanner,
    root: PathBuf,
    options: ScanOptions,
    visited: Mutex<HashSet<PathBuf>>,
    seen: Mutex<HashSet<String>>,
    seen_playlists: Mutex<HashSet<String>>,
    playlist_files: Mutex<Vec<PathBuf>>,
    counters: ScanCounters,
}

impl<'a> ScanPass<'a> {
    fn new(scanner: &'a Scanner, root: &Path, options: &ScanOptions) -> Self {
        Self {
            scanner,
            root: root.to_path_buf(),
            options: options.clone(),
            visited: Mutex::new(HashSet::new()),
            seen: Mutex::new(HashSet::new()),
            seen_playlists: Mutex::new(HashSet::new()),
            playlist_files: Mutex::new(Vec::new()),
            counters: ScanCounters::default(),
        }
    }

    fn walk_dir(&self, dir: PathBuf) -> BoxFuture<'_, ()> {
        async move {
            let canonical = match tokio::fs::canonicalize(&dir).await {
                Ok(path) => path,
                Err(err) => {
                    warn!("Skipping {}: {}", dir.display(), err);
                    if is_transient(&err) {
                        self.keep_known_under(&dir);
                    }
                    return;
                }
            };
            let fresh = self.visited.lock().insert(canonical);
            if !fresh {
                debug!("Already visited {}; skipping", dir.display());
                return;
            }

            let listing = match read_listing(&dir).await {
                Ok(listing) => listing,
                Err(err) => {
                    warn!("Failed to read {}: {}", dir.display(), err);
                    if is_transient(&err) {
                        self.keep_known_under(&dir);
                    }
                    return;
                }
            };
            self.playlist_files.lock().extend(listing.playlists);
            self.index_files(&listing.files).await;
            self.walk_subdirs(listing.dirs).await;
        }
        .boxed()
    }

    async fn index_files(&self, files: &[PathBuf]) {
        let mut index = 0;
        while index < files.len() {
            let profile = self.scanner.file_profile(&self.options);
            let end = (index + profile.batch_size).min(files.len());
            let batch = &files[index..end];
            let outcomes = join_all(batch.iter().map(|path| self.index_file(path))).await;
            index = end;

            self.scanner.emit(ScanEvent::Progress {
                indexed: self.counters.indexed.load(Ordering::Relaxed),
                batch_size: batch.len(),
                throttled: profile.throttled,
            });
            if outcomes.contains(&FileOutcome::Indexed) {
                self.scanner.writer.request_save(&self.scanner.store).await;
            }
            if index < files.len() {
                tokio::time::sleep(profile.delay).await;
            }
        }
    }

    async fn walk_subdirs(&self, dirs: Vec<PathBuf>) {
        let mut pending = dirs.into_iter().peekable();
        while pending.peek().is_some() {
            let profile = self.scanner.dir_profile(&self.options);
            let batch: Vec<PathBuf> = pending.by_ref().take(profile.batch_size).collect();
            join_all(batch.into_iter().map(|dir| self.walk_dir(dir))).await;
            if pending.peek().is_some() {
                tokio::time::sleep(profile.delay).await;
            }
        }
    }

    async fn index_file(&self, path: &Path) -> FileOutcome {
        let relpath = match relpath_from(&self.root, path) {
            Some(rel) => rel,
            None => return self.skipped(),
        };
        let codec = match Codec::from_path(path) {
            Some(codec) => codec,
            None => return self.skipped(),
        };
        let id = stable_id(&relpath);
        let store = &self.scanner.store;
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!("Failed to stat {}: {}", path.display(), err);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if is_transient(&err) && store.contains(&id) {
                    self.seen.lock().insert(id);
                    self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                }
                return FileOutcome::Failed;
            }
        };
        let limit_mb = self.options.scan_file_size_limit_mb;
        if limit_mb > 0 && meta.len() > limit_mb.saturating_mul(1024 * 1024) {
            debug!("Skipping {} (over {} MB)", relpath, limit_mb);
            return self.skipped();
        }

        self.seen.lock().insert(id.clone());
        let modified_at = modified_millis(&meta);
        if store.modified_at(&id) == Some(modified_at) {
            self.counters.unchanged.fetch_add(1, Ordering::Relaxed);
            self.counters.indexed.fetch_add(1, Ordering::Relaxed);
            return FileOutcome::Unchanged;
        }

        let extractor = Arc::clone(&self.scanner.extractor);
        let file = path.to_path_buf();
        let tags = match tokio::task::spawn_blocking(move || extractor.extract(&file)).await {
            Ok(Ok(tags)) => tags,
            Ok(Err(err)) => {
                warn!("Failed to read tags for {}: {}", relpath, err);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if store.contains(&id) {
                    self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                }
                return FileOutcome::Failed;
            }
            Err(err) => {
                warn!("Tag reader task failed for {}: {}", relpath, err);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if store.contains(&id) {
                    self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                }
                return FileOutcome::Failed;
            }
        };

        let added_at = store
            .get_track(&id)
            .map(|track| track.added_at)
            .unwrap_or_else(now_millis);
        let facts = FileFacts {
            id,
            relpath,
            path,
            codec,
            file_size: meta.len(),
            modified_at,
            added_at,
        };
        store.upsert(build_track(facts, tags, &self.options));
        self.counters.extracted.fetch_add(1, Ordering::Relaxed);
        self.counters.indexed.fetch_add(1, Ordering::Relaxed);
        FileOutcome::Indexed
    }

    /// Marks every known track under `dir` as seen so an unreadable folder
    /// does not prune its contents.
    fn keep_known_under(&self, dir: &Path) {
        let Some(prefix) = relpath_from(&self.root, dir) else {
            return;
        };
        let prefix = if prefix.is_empty() {
            prefix
        } else {
            format!("{}/", prefix)
        };
        let kept: Vec<String> = self
            .scanner
            .store
            .tracks()
            .into_iter()
            .filter(|track| track.file_relpath.starts_with(&prefix))
            .map(|track| track.id)
            .collect();
        if !kept.is_empty() {
            debug!("Keeping {} known tracks under {}", kept.len(), dir.display());
        }
        self.seen.lock().extend(kept);
    }

    fn skipped(&self) -> FileOutcome {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        FileOutcome::Skipped
    }

    async fn collect_playlists(&self) {
        let files = std::mem::take(&mut *self.playlist_files.lock());
        for path in files {
            let relpath = match relpath_from(&self.root, &path) {
                Some(rel) => rel,
                None => continue,
            };
            let contents = match tokio::fs::read(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    warn!("Failed to read playlist {}: {}", relpath, err);
                    continue;
                }
            };
            let dir_relpath = match relpath.rfind('/') {
                Some(idx) => relpath[..idx].to_string(),
                None => String::new(),
            };
            let parsed = parse_m3u(&contents, &dir_relpath, &self.root);
            let store = &self.scanner.store;
            let track_ids: Vec<String> = parsed
                .entries
                .iter()
                .map(|entry| stable_id(entry))
                .filter(|id| store.contains(id))
                .collect();
            let name = parsed.name.unwrap_or_else(|| file_stem(&path));
            let id = stable_id(&relpath);
            self.seen_playlists.lock().insert(id.clone());
            store.upsert_playlist(Playlist {
                id,
                name,
                track_ids,
                provider: None,
            });
        }
    }
}

async fn read_listing(dir: &Path) -> std::io::Result<DirListing> {
    let mut listing = DirListing::default();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(err) => {
                debug!("Skipping {}: {}", path.display(), err);
                continue;
            }
        };
        if file_type.is_dir() {
            if !is_ignored_dir(&path) {
                listing.dirs.push(path);
            }
        } else if file_type.is_file() {
            classify_file(&mut listing, path);
        } else if file_type.is_symlink() {
            // Resolved here; directory cycles are caught by the visited set.
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {
                    if !is_ignored_dir(&path) {
                        listing.dirs.push(path);
                    }
                }
                Ok(meta) if meta.is_file() => classify_file(&mut listing, path),
                Ok(_) => {}
                Err(err) => debug!("Dangling link {}: {}", path.display(), err),
            }
        }
    }
    listing.files.sort();
    listing.playlists.sort();
    listing.dirs.sort();
    Ok(listing)
}

fn classify_file(listing: &mut DirListing, path: PathBuf) {
    if Codec::from_path(&path).is_some() {
        listing.files.push(path);
    } else if is_playlist_file(&path) {
        listing.playlists.push(path);
    }
}

/// A path that vanished is gone; anything else may come back next scan.
fn is_transient(err: &std::io::Error) -> bool {
    err.kind() != std::io::ErrorKind::NotFound
}

fn is_ignored_dir(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            IGNORED_DIRS.iter().any(|ignored| name.eq_ignore_ascii_case(ignored))
        })
        .unwrap_or(false)
}

fn modified_millis(meta: &Metadata) -> u64 {
    meta.modified().map(system_time_millis).unwrap_or(0)
}

struct FileFacts<'a> {
    id: String,
    relpath: String,
    path: &'a Path,
    codec: Codec,
    file_size: u64,
    modified_at: u64,
    added_at: u64,
}

fn build_track(facts: FileFacts<'_>, tags: TagInfo, options: &ScanOptions) -> Track {
    let from_name = parse_filename(&file_stem(facts.path));
    let folders: Vec<&str> = facts.relpath.split('/').collect();
    let album_folder = folders
        .len()
        .checked_sub(2)
        .and_then(|idx| folders.get(idx))
        .map(|name| split_title_year(name));
    let artist_folder = folders
        .len()
        .checked_sub(3)
        .and_then(|idx| folders.get(idx))
        .map(|name| name.to_string());

    let title = tags.title.clone().unwrap_or(from_name.title);
    let artist = tags
        .artist
        .clone()
        .or_else(|| tags.album_artist.clone())
        .or(from_name.artist)
        .or(artist_folder)
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album = tags
        .album
        .clone()
        .or_else(|| album_folder.as_ref().map(|(title, _)| title.clone()))
        .unwrap_or_else(|| UNKNOWN_ALBUM.to_string());
    let year = tags
        .year
        .or_else(|| album_folder.as_ref().and_then(|(_, year)| *year));

    let primary = primary_artist_name(tags.album_artist.as_deref(), &artist).to_string();
    let cover_limit = options.cover_art_size_limit_kb.saturating_mul(1024);
    let cover = match tags.cover_size {
        Some(size) if cover_limit == 0 || (size as u64) <= cover_limit => {
            Some(format!("covers/{}", facts.id))
        }
        _ => None,
    };

    let mut format = AudioFormat::from_codec(facts.codec);
    format.bitrate = tags.bitrate;
    format.sample_rate = tags.sample_rate;
    format.bit_depth = tags.bit_depth;
    format.channels = tags.channels;

    Track {
        artist_id: artist_id_for(&primary),
        album_id: album_id_for(&primary, &album),
        id: facts.id,
        title,
        artist,
        album,
        album_artist: tags.album_artist,
        duration_ms: tags.duration_ms.unwrap_or(0),
        file_relpath: facts.relpath,
        file_size: facts.file_size,
        format,
        year,
        genre: tags.genre,
        track_no: tags.track_no.or(from_name.track_no),
        disc_no: tags.disc_no,
        cover,
        added_at: facts.added_at,
        modified_at: facts.modified_at,
        provider: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameInfo {
    pub track_no: Option<u16>,
    pub artist: Option<String>,
    pub title: String,
}

/// Best-effort split of names like `03 - Artist - Title` or `Artist - Title`.
pub fn parse_filename(stem: &str) -> FilenameInfo {
    let cleaned = if stem.contains(' ') {
        stem.trim().to_string()
    } else {
        stem.replace('_', " ").trim().to_string()
    };
    let (track_no, rest) = split_track_number(&cleaned);
    let mut parts = rest.splitn(2, " - ");
    let first = parts.next().unwrap_or("").trim();
    let (artist, title) = match parts.next().map(str::trim) {
        Some(title) if !first.is_empty() && !title.is_empty() => {
            (Some(first.to_string()), title.to_string())
        }
        _ => (None, rest.trim().to_string()),
    };
    let title = if title.is_empty() { cleaned.clone() } else { title };
    FilenameInfo {
        track_no,
        artist,
        title,
    }
}

fn split_track_number(input: &str) -> (Option<u16>, &str) {
    let digits = input.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return (None, input);
    }
    let rest = &input[digits..];
    let trimmed =
        rest.trim_start_matches(|c: char| matches!(c, ' ' | '.' | '-' | '_' | ')'));
    if trimmed.len() == rest.len() || trimmed.is_empty() {
        return (None, input);
    }
    (input[..digits].parse().ok(), trimmed)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}

fn split_title_year(input: &str) -> (String, Option<i32>) {
    let trimmed = input.trim();
    if let Some((title, year)) = split_year_suffix(trimmed, '(', ')') {
        return (title.to_string(), Some(year));
    }
    if let Some((title, year)) = split_year_suffix(trimmed, '[', ']') {
        return (title.to_string(), Some(year));
    }
    (trimmed.to_string(), None)
}

fn split_year_suffix(input: &str, open: char, close: char) -> Option<(&str, i32)> {
    let trimmed = input.trim_end();
    if !trimmed.ends_with(close) {
        return None;
    }
    let open_idx = trimmed.rfind(open)?;
    let year_str = trimmed
        .get(open_idx + open.len_utf8()..trimmed.len() - close.len_utf8())?
        .trim();
    if year_str.len() != 4 || !year_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year = year_str.parse::<i32>().ok()?;
    let title = trimmed[..open_idx].trim_end();
    if title.is_empty() {
        return None;
    }
    Some((title, year))
}
