use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::ProviderTag;
use futures_util::future::join_all;
use library::Library;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregateCatalog, ProviderSlice};
use crate::error::{ProviderError, RegistryError};
use crate::local::LocalProvider;
use crate::offline::OfflineOverlay;
use crate::provider::{absolute_cover_url, CatalogProvider, CatalogQuery};
use crate::registry::{ProviderEntry, ProviderRegistry};
use crate::remote::RemoteProvider;

/// Keeps the aggregate catalog in step with every configured provider.
///
/// Dropping the coordinator stops its polling loop.
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    registry: Mutex<ProviderRegistry>,
    registry_path: Option<PathBuf>,
    providers: RwLock<HashMap<String, Arc<dyn CatalogProvider>>>,
    aggregate: AggregateCatalog,
    offline: Option<OfflineOverlay>,
    /// Providers with a fetch in flight from this client.
    scanning: Mutex<HashSet<String>>,
    /// Providers that were asked to scan or last reported scanning.
    remote_scanning: Mutex<HashSet<String>>,
    errors: Mutex<HashMap<String, String>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    status_checks: AtomicUsize,
    disposed: AtomicBool,
}

/// Builds the provider behind one registry entry. `file://` entries get a
/// local library whose cache lives in `cache_dir`.
pub fn build_provider(
    entry: &ProviderEntry,
    cache_dir: &Path,
) -> Result<Arc<dyn CatalogProvider>, ProviderError> {
    match entry.local_path() {
        Some(root) => {
            let cache_path = cache_dir.join(format!("{}.json", entry.id));
            let library = Library::open(root, cache_path);
            Ok(Arc::new(LocalProvider::new(library, entry.name.clone())))
        }
        None => Ok(Arc::new(RemoteProvider::new(&entry.url, entry.token.clone())?)),
    }
}

impl Coordinator {
    pub fn new(
        registry: ProviderRegistry,
        registry_path: Option<PathBuf>,
        offline: Option<OfflineOverlay>,
    ) -> Self {
        let inner = Arc::new(CoordinatorInner {
            registry: Mutex::new(registry),
            registry_path,
            providers: RwLock::new(HashMap::new()),
            aggregate: AggregateCatalog::new(),
            offline,
            scanning: Mutex::new(HashSet::new()),
            remote_scanning: Mutex::new(HashSet::new()),
            errors: Mutex::new(HashMap::new()),
            poller: Mutex::new(None),
            status_checks: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        });
        inner.refresh_offline();
        Self { inner }
    }

    /// Builds a provider for every registry entry. Entries that cannot be
    /// built are logged and recorded as provider errors.
    pub fn from_registry(
        registry: ProviderRegistry,
        registry_path: Option<PathBuf>,
        cache_dir: &Path,
        offline: Option<OfflineOverlay>,
    ) -> Self {
        let entries = registry.providers.clone();
        let coordinator = Self::new(registry, registry_path, offline);
        for entry in entries {
            match build_provider(&entry, cache_dir) {
                Ok(provider) => coordinator.register_provider(&entry.id, provider),
                Err(err) => {
                    warn!("Failed to set up provider {}: {}", entry.name, err);
                    coordinator
                        .inner
                        .errors
                        .lock()
                        .insert(entry.id.clone(), err.to_string());
                }
            }
        }
        coordinator
    }

    pub fn register_provider(&self, id: &str, provider: Arc<dyn CatalogProvider>) {
        self.inner
            .providers
            .write()
            .insert(id.to_string(), provider);
    }

    /// Forgets a provider entirely. Offline-complete tracks stay visible.
    pub fn remove_provider(&self, id: &str) -> Result<bool, RegistryError> {
        let removed = {
            let mut registry = self.inner.registry.lock();
            let removed = registry.remove_provider(id).is_some();
            if removed {
                self.inner.save_registry(&registry)?;
            }
            removed
        };
        self.inner.providers.write().remove(id);
        self.inner.aggregate.remove_provider(id);
        self.inner.errors.lock().remove(id);
        self.inner.remote_scanning.lock().remove(id);
        Ok(removed)
    }

    pub fn aggregate(&self) -> &AggregateCatalog {
        &self.inner.aggregate
    }

    pub fn offline(&self) -> Option<&OfflineOverlay> {
        self.inner.offline.as_ref()
    }

    pub fn registry(&self) -> ProviderRegistry {
        self.inner.registry.lock().clone()
    }

    pub fn provider_error(&self, id: &str) -> Option<String> {
        self.inner.errors.lock().get(id).cloned()
    }

    pub fn is_scanning(&self, id: &str) -> bool {
        self.inner.scanning.lock().contains(id)
    }

    pub fn any_scanning(&self) -> bool {
        !self.inner.scanning.lock().is_empty()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.is_polling()
    }

    /// Number of status checks run so far.
    pub fn status_checks(&self) -> usize {
        self.inner.status_checks.load(Ordering::SeqCst)
    }

    pub async fn scan_server(&self, id: &str) -> Result<(), ProviderError> {
        self.inner.scan_server(id).await
    }

    pub async fn trigger_remote_scan(&self, id: &str) -> Result<(), ProviderError> {
        self.inner.trigger_remote_scan(id).await
    }

    pub async fn trigger_rescan_all(&self) {
        self.inner.trigger_rescan_all().await
    }

    /// Returns true while any enabled provider reports scanning.
    pub async fn check_scan_status(&self) -> bool {
        self.inner.check_scan_status().await
    }

    pub async fn toggle_server(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        self.inner.toggle_server(id, enabled).await
    }

    /// Re-reads the offline overlay into the aggregate.
    pub fn refresh_offline(&self) {
        self.inner.refresh_offline();
    }

    pub fn start_polling(&self) {
        self.inner.ensure_polling();
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.inner.poller.lock().take() {
            handle.abort();
        }
    }

    /// Stops polling for good; later triggers no longer start it.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.stop_polling();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl CoordinatorInner {
    fn provider(&self, id: &str) -> Option<Arc<dyn CatalogProvider>> {
        self.providers.read().get(id).cloned()
    }

    fn enabled_providers(&self) -> Vec<(String, Arc<dyn CatalogProvider>)> {
        let ids: Vec<String> = self
            .registry
            .lock()
            .enabled()
            .map(|entry| entry.id.clone())
            .collect();
        let providers = self.providers.read();
        ids.into_iter()
            .filter_map(|id| providers.get(&id).cloned().map(|provider| (id, provider)))
            .collect()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.registry.lock().settings.poll_interval_secs.max(1))
    }

    fn save_registry(&self, registry: &ProviderRegistry) -> Result<(), RegistryError> {
        match &self.registry_path {
            Some(path) => registry.save(path),
            None => Ok(()),
        }
    }

    fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn ensure_polling(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let mut poller = self.poller.lock();
        if poller.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        debug!("Starting scan status polling");
        *poller = Some(tokio::spawn(poll_loop(Arc::clone(self))));
    }

    async fn scan_server(self: &Arc<Self>, id: &str) -> Result<(), ProviderError> {
        let provider = self
            .provider(id)
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))?;
        let (tag, test_first) = {
            let registry = self.registry.lock();
            let entry = registry
                .get(id)
                .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))?;
            (entry.tag(), registry.settings.test_connection_before_scan)
        };

        if !self.scanning.lock().insert(id.to_string()) {
            debug!("Provider {} is already being fetched", tag.name);
            return Ok(());
        }
        self.ensure_polling();

        let result = fetch_slice(provider.as_ref(), &tag, test_first).await;
        self.scanning.lock().remove(id);

        match result {
            Ok(slice) => {
                let enabled = self
                    .registry
                    .lock()
                    .get(id)
                    .map(|entry| entry.enabled)
                    .unwrap_or(false);
                if enabled {
                    info!(
                        "Merged {} tracks, {} albums, {} artists from {}",
                        slice.tracks.len(),
                        slice.albums.len(),
                        slice.artists.len(),
                        tag.name
                    );
                    self.aggregate.replace_provider_slice(id, slice);
                }
                self.errors.lock().remove(id);
                self.refresh_offline();
                Ok(())
            }
            Err(err) => {
                warn!("Failed to fetch catalog from {}: {}", tag.name, err);
                self.errors.lock().insert(id.to_string(), err.to_string());
                Err(err)
            }
        }
    }

    async fn trigger_remote_scan(&self, id: &str) -> Result<(), ProviderError> {
        let provider = self
            .provider(id)
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))?;
        let options = self.registry.lock().settings.scan_options.clone();
        match provider.start_scan(&options).await {
            Ok(()) | Err(ProviderError::ScanInProgress) => {
                self.remote_scanning.lock().insert(id.to_string());
                Ok(())
            }
            Err(err) => {
                warn!("Failed to start scan on {}: {}", id, err);
                self.errors.lock().insert(id.to_string(), err.to_string());
                Err(err)
            }
        }
    }

    async fn trigger_rescan_all(self: &Arc<Self>) {
        let ids: Vec<String> = self
            .enabled_providers()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        join_all(ids.iter().map(|id| self.trigger_remote_scan(id))).await;
        self.ensure_polling();
    }

    async fn check_scan_status(self: &Arc<Self>) -> bool {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        let enabled = self.enabled_providers();
        let statuses = join_all(enabled.iter().map(|(id, provider)| async move {
            (id.clone(), provider.get_scan_status().await)
        }))
        .await;

        let mut any_scanning = false;
        let mut finished = Vec::new();
        {
            let mut remote = self.remote_scanning.lock();
            for (id, status) in statuses {
                match status {
                    Ok(status) if status.scanning => {
                        any_scanning = true;
                        remote.insert(id);
                    }
                    Ok(_) => {
                        if remote.remove(&id) {
                            finished.push(id);
                        }
                    }
                    Err(err) => {
                        debug!("Scan status for {} unavailable: {}", id, err);
                        remote.remove(&id);
                        self.errors.lock().insert(id, err.to_string());
                    }
                }
            }
        }

        let refresh: Vec<String> = if any_scanning {
            enabled.into_iter().map(|(id, _)| id).collect()
        } else {
            finished
        };
        join_all(refresh.iter().map(|id| self.scan_server(id))).await;
        any_scanning
    }

    async fn toggle_server(self: &Arc<Self>, id: &str, enabled: bool) -> Result<(), RegistryError> {
        {
            let mut registry = self.registry.lock();
            registry.set_enabled(id, enabled)?;
            self.save_registry(&registry)?;
        }
        if enabled {
            // Failures are recorded per provider.
            let _ = self.scan_server(id).await;
        } else {
            self.aggregate.remove_provider(id);
            self.errors.lock().remove(id);
            self.remote_scanning.lock().remove(id);
        }
        Ok(())
    }

    fn refresh_offline(&self) {
        let overlay = match &self.offline {
            Some(overlay) => overlay,
            None => return,
        };
        match overlay.completed_tracks() {
            Ok(tracks) => self.aggregate.merge_offline(tracks),
            Err(err) => warn!("Failed to read offline overlay: {}", err),
        }
    }
}

async fn poll_loop(inner: Arc<CoordinatorInner>) {
    loop {
        tokio::time::sleep(inner.poll_interval()).await;
        if inner.disposed.load(Ordering::SeqCst) {
            break;
        }
        let any_remote = inner.check_scan_status().await;
        let stop = {
            let mut poller = inner.poller.lock();
            let idle = !any_remote
                && inner.scanning.lock().is_empty()
                && inner.remote_scanning.lock().is_empty();
            if idle {
                poller.take();
            }
            idle
        };
        if stop {
            debug!("No provider is scanning; polling stopped");
            break;
        }
    }
}

async fn fetch_slice(
    provider: &dyn CatalogProvider,
    tag: &ProviderTag,
    test_first: bool,
) -> Result<ProviderSlice, ProviderError> {
    if test_first {
        provider.test_connection().await?;
    }
    let query = CatalogQuery::all();
    let tracks = provider.get_tracks(&query).await?.items;
    let artists = provider.get_artists(&query).await?.items;
    let albums = provider.get_albums(&query).await?.items;
    let playlists = match provider.playlists() {
        Some(source) => source.get_playlists().await?,
        None => Vec::new(),
    };

    let base = provider.base_url();
    let cover = |value: Option<String>| value.map(|c| absolute_cover_url(base, &c));
    Ok(ProviderSlice {
        tracks: tracks
            .into_iter()
            .map(|mut track| {
                track.cover = cover(track.cover.take());
                track.provider = Some(tag.clone());
                track
            })
            .collect(),
        artists: artists
            .into_iter()
            .map(|mut artist| {
                artist.image = cover(artist.image.take());
                artist.provider = Some(tag.clone());
                artist
            })
            .collect(),
        albums: albums
            .into_iter()
            .map(|mut album| {
                album.cover = cover(album.cover.take());
                album.provider = Some(tag.clone());
                album
            })
            .collect(),
        playlists: playlists
            .into_iter()
            .map(|mut playlist| {
                playlist.provider = Some(tag.clone());
                playlist
            })
            .collect(),
    })
}
