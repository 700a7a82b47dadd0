use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use common::{Album, Artist, Playlist, Track};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub playlists: usize,
}

/// In-memory catalog for one provider. Artists and albums are views over the
/// track set: every mutation recomputes the entities it touched from their
/// current member tracks, so counts never drift across scans.
#[derive(Clone, Default)]
pub struct CatalogStore {
    inner: Arc<RwLock<CatalogInner>>,
}

#[derive(Default)]
struct CatalogInner {
    tracks: HashMap<String, Track>,
    artists: HashMap<String, Artist>,
    albums: HashMap<String, Album>,
    playlists: HashMap<String, Playlist>,
    artist_tracks: HashMap<String, BTreeSet<String>>,
    album_tracks: HashMap<String, BTreeSet<String>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store by replaying each track through `upsert`.
    pub fn from_snapshot(tracks: Vec<Track>, playlists: Vec<Playlist>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.inner.write();
            for track in tracks {
                guard.upsert_track(track);
            }
            for playlist in playlists {
                guard.playlists.insert(playlist.id.clone(), playlist);
            }
        }
        store
    }

    pub fn upsert(&self, track: Track) {
        self.inner.write().upsert_track(track);
    }

    pub fn remove(&self, track_id: &str) -> Option<Track> {
        self.inner.write().remove_track(track_id)
    }

    /// Drops every track whose id is not in `keep`. Returns how many went.
    pub fn retain_tracks(&self, keep: &HashSet<String>) -> usize {
        let mut guard = self.inner.write();
        let stale: Vec<String> = guard
            .tracks
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            guard.remove_track(id);
        }
        stale.len()
    }

    pub fn upsert_playlist(&self, playlist: Playlist) {
        self.inner
            .write()
            .playlists
            .insert(playlist.id.clone(), playlist);
    }

    pub fn retain_playlists(&self, keep: &HashSet<String>) -> usize {
        let mut guard = self.inner.write();
        let before = guard.playlists.len();
        guard.playlists.retain(|id, _| keep.contains(id));
        before - guard.playlists.len()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.inner.read().tracks.contains_key(track_id)
    }

    pub fn modified_at(&self, track_id: &str) -> Option<u64> {
        self.inner
            .read()
            .tracks
            .get(track_id)
            .map(|track| track.modified_at)
    }

    pub fn get_track(&self, track_id: &str) -> Option<Track> {
        self.inner.read().tracks.get(track_id).cloned()
    }

    pub fn get_artist(&self, artist_id: &str) -> Option<Artist> {
        self.inner.read().artists.get(artist_id).cloned()
    }

    pub fn get_album(&self, album_id: &str) -> Option<Album> {
        self.inner.read().albums.get(album_id).cloned()
    }

    pub fn get_playlist(&self, playlist_id: &str) -> Option<Playlist> {
        self.inner.read().playlists.get(playlist_id).cloned()
    }

    pub fn track_ids(&self) -> HashSet<String> {
        self.inner.read().tracks.keys().cloned().collect()
    }

    /// All tracks ordered by relative path.
    pub fn tracks(&self) -> Vec<Track> {
        let mut items: Vec<Track> = self.inner.read().tracks.values().cloned().collect();
        items.sort_by(|a, b| a.file_relpath.cmp(&b.file_relpath));
        items
    }

    pub fn artists(&self) -> Vec<Artist> {
        let mut items: Vec<Artist> = self.inner.read().artists.values().cloned().collect();
        items.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    pub fn albums(&self) -> Vec<Album> {
        let mut items: Vec<Album> = self.inner.read().albums.values().cloned().collect();
        items.sort_by(|a, b| {
            a.artist
                .to_lowercase()
                .cmp(&b.artist.to_lowercase())
                .then_with(|| a.year.unwrap_or(9999).cmp(&b.year.unwrap_or(9999)))
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        let mut items: Vec<Playlist> = self.inner.read().playlists.values().cloned().collect();
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        items
    }

    /// Tracks of one album in disc/track order.
    pub fn album_tracks(&self, album_id: &str) -> Vec<Track> {
        let guard = self.inner.read();
        let mut items: Vec<Track> = guard
            .album_tracks
            .get(album_id)
            .map(|ids| ids.iter().filter_map(|id| guard.tracks.get(id)).cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| {
            let disc_a = a.disc_no.unwrap_or(u16::MAX);
            let disc_b = b.disc_no.unwrap_or(u16::MAX);
            let track_a = a.track_no.unwrap_or(u16::MAX);
            let track_b = b.track_no.unwrap_or(u16::MAX);
            disc_a
                .cmp(&disc_b)
                .then_with(|| track_a.cmp(&track_b))
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.file_relpath.cmp(&b.file_relpath))
        });
        items
    }

    pub fn list_tracks(
        &self,
        search: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> (Vec<Track>, usize) {
        let search = normalize_search(search);
        paginate(self.tracks(), limit, offset, |track| match &search {
            Some(needle) => {
                track.title.to_lowercase().contains(needle)
                    || track.artist.to_lowercase().contains(needle)
                    || track.album.to_lowercase().contains(needle)
            }
            None => true,
        })
    }

    pub fn list_artists(
        &self,
        search: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> (Vec<Artist>, usize) {
        let search = normalize_search(search);
        paginate(self.artists(), limit, offset, |artist| match &search {
            Some(needle) => artist.name.to_lowercase().contains(needle),
            None => true,
        })
    }

    pub fn list_albums(
        &self,
        search: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> (Vec<Album>, usize) {
        let search = normalize_search(search);
        paginate(self.albums(), limit, offset, |album| match &search {
            Some(needle) => {
                album.title.to_lowercase().contains(needle)
                    || album.artist.to_lowercase().contains(needle)
            }
            None => true,
        })
    }

    pub fn stats(&self) -> LibraryStats {
        let guard = self.inner.read();
        LibraryStats {
            artists: guard.artists.len(),
            albums: guard.albums.len(),
            tracks: guard.tracks.len(),
            playlists: guard.playlists.len(),
        }
    }
}

impl CatalogInner {
    fn upsert_track(&mut self, track: Track) {
        let track_id = track.id.clone();
        let artist_id = track.artist_id.clone();
        let album_id = track.album_id.clone();
        let previous = self.tracks.insert(track_id.clone(), track);
        if let Some(prev) = &previous {
            self.unlink(prev);
        }
        link(&mut self.artist_tracks, &artist_id, &track_id);
        link(&mut self.album_tracks, &album_id, &track_id);
        self.refresh(previous.as_ref(), &artist_id, &album_id);
    }

    fn remove_track(&mut self, track_id: &str) -> Option<Track> {
        let track = self.tracks.remove(track_id)?;
        self.unlink(&track);
        self.refresh_album(&track.album_id);
        self.refresh_artist(&track.artist_id);
        Some(track)
    }

    fn unlink(&mut self, track: &Track) {
        unlink(&mut self.artist_tracks, &track.artist_id, &track.id);
        unlink(&mut self.album_tracks, &track.album_id, &track.id);
    }

    fn refresh(&mut self, previous: Option<&Track>, artist_id: &str, album_id: &str) {
        if let Some(prev) = previous {
            if prev.album_id != album_id {
                self.refresh_album(&prev.album_id);
            }
            if prev.artist_id != artist_id {
                self.refresh_artist(&prev.artist_id);
            }
        }
        self.refresh_album(album_id);
        self.refresh_artist(artist_id);
    }

    fn members(&self, ids: Option<&BTreeSet<String>>) -> Vec<&Track> {
        let mut members: Vec<&Track> = ids
            .map(|ids| ids.iter().filter_map(|id| self.tracks.get(id)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.file_relpath.cmp(&b.file_relpath));
        members
    }

    fn refresh_album(&mut self, album_id: &str) {
        match self.build_album(album_id) {
            Some(album) => {
                self.albums.insert(album_id.to_string(), album);
            }
            None => {
                self.albums.remove(album_id);
                self.album_tracks.remove(album_id);
            }
        }
    }

    fn refresh_artist(&mut self, artist_id: &str) {
        match self.build_artist(artist_id) {
            Some(artist) => {
                self.artists.insert(artist_id.to_string(), artist);
            }
            None => {
                self.artists.remove(artist_id);
                self.artist_tracks.remove(artist_id);
            }
        }
    }

    fn build_album(&self, album_id: &str) -> Option<Album> {
        let members = self.members(self.album_tracks.get(album_id));
        let first = members.first()?;
        Some(Album {
            id: album_id.to_string(),
            artist_id: first.artist_id.clone(),
            title: first.album.clone(),
            artist: first.primary_artist().to_string(),
            year: members.iter().find_map(|track| track.year),
            track_count: members.len(),
            cover: members.iter().find_map(|track| track.cover.clone()),
            provider: None,
        })
    }

    fn build_artist(&self, artist_id: &str) -> Option<Artist> {
        let members = self.members(self.artist_tracks.get(artist_id));
        let first = members.first()?;
        let albums: BTreeSet<&str> = members.iter().map(|track| track.album_id.as_str()).collect();
        let image = albums
            .iter()
            .filter_map(|album_id| self.albums.get(*album_id))
            .find_map(|album| album.cover.clone());
        Some(Artist {
            id: artist_id.to_string(),
            name: first.primary_artist().to_string(),
            track_count: members.len(),
            album_count: albums.len(),
            image,
            provider: None,
        })
    }
}

fn link(index: &mut HashMap<String, BTreeSet<String>>, key: &str, track_id: &str) {
    index
        .entry(key.to_string())
        .or_default()
        .insert(track_id.to_string());
}

fn unlink(index: &mut HashMap<String, BTreeSet<String>>, key: &str, track_id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(track_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn normalize_search(search: Option<&str>) -> Option<String> {
    search
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_lowercase())
}

fn paginate<T>(
    items: Vec<T>,
    limit: Option<usize>,
    offset: usize,
    matches: impl Fn(&T) -> bool,
) -> (Vec<T>, usize) {
    let filtered: Vec<T> = items.into_iter().filter(|item| matches(item)).collect();
    let total = filtered.len();
    let page = filtered
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    (page, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{album_id_for, artist_id_for, stable_id, AudioFormat, Codec};

    fn track(relpath: &str, artist: &str, album: &str) -> Track {
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
            format: AudioFormat::from_codec(Codec::Flac),
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

    #[test]
    fn counts_follow_the_track_set() {
        let store = CatalogStore::new();
        store.upsert(track("a/x/1.flac", "A", "X"));
        store.upsert(track("a/x/2.flac", "A", "X"));
        store.upsert(track("a/y/1.flac", "A", "Y"));

        let artist = store.get_artist(&artist_id_for("A")).unwrap();
        assert_eq!(artist.track_count, 3);
        assert_eq!(artist.album_count, 2);
        assert_eq!(store.get_album(&album_id_for("A", "X")).unwrap().track_count, 2);

        // Re-indexing the same files must not inflate anything.
        store.upsert(track("a/x/1.flac", "A", "X"));
        store.upsert(track("a/x/2.flac", "A", "X"));
        assert_eq!(store.get_artist(&artist_id_for("A")).unwrap().track_count, 3);

        store.remove(&stable_id("a/y/1.flac"));
        let artist = store.get_artist(&artist_id_for("A")).unwrap();
        assert_eq!(artist.track_count, 2);
        assert_eq!(artist.album_count, 1);
        assert!(store.get_album(&album_id_for("A", "Y")).is_none());
    }

    #[test]
    fn retagging_moves_track_between_albums() {
        let store = CatalogStore::new();
        store.upsert(track("t.flac", "A", "Old"));
        store.upsert(track("t.flac", "B", "New"));

        assert!(store.get_artist(&artist_id_for("A")).is_none());
        assert!(store.get_album(&album_id_for("A", "Old")).is_none());
        assert_eq!(store.get_album(&album_id_for("B", "New")).unwrap().track_count, 1);
        assert_eq!(store.stats().tracks, 1);
    }

    #[test]
    fn album_artist_owns_compilation_tracks() {
        let store = CatalogStore::new();
        let mut first = track("va/1.flac", "Singer", "Hits");
        first.album_artist = Some("Various Artists".to_string());
        first.artist_id = artist_id_for("Various Artists");
        first.album_id = album_id_for("Various Artists", "Hits");
        store.upsert(first);

        let album = store.get_album(&album_id_for("Various Artists", "Hits")).unwrap();
        assert_eq!(album.artist, "Various Artists");
        assert_eq!(store.get_artist(&artist_id_for("Various Artists")).unwrap().name, "Various Artists");
    }

    #[test]
    fn retain_prunes_unseen_tracks() {
        let store = CatalogStore::new();
        store.upsert(track("keep.flac", "A", "X"));
        store.upsert(track("drop.flac", "B", "Y"));

        let keep: HashSet<String> = [stable_id("keep.flac")].into_iter().collect();
        assert_eq!(store.retain_tracks(&keep), 1);
        assert!(store.contains(&stable_id("keep.flac")));
        assert!(!store.contains(&stable_id("drop.flac")));
        assert_eq!(store.stats().artists, 1);
        assert_eq!(store.stats().albums, 1);
    }

    #[test]
    fn snapshot_replay_rebuilds_counts() {
        let tracks = vec![
            track("a/1.flac", "A", "X"),
            track("a/2.flac", "A", "X"),
            track("b/1.flac", "B", "Z"),
        ];
        let store = CatalogStore::from_snapshot(tracks, Vec::new());
        assert_eq!(store.get_album(&album_id_for("A", "X")).unwrap().track_count, 2);
        assert_eq!(store.stats().artists, 2);
    }

    #[test]
    fn list_tracks_searches_and_paginates() {
        let store = CatalogStore::new();
        for index in 0..5 {
            store.upsert(track(&format!("a/{index}.flac"), "Artist", "Album"));
        }
        store.upsert(track("z/other.flac", "Other", "Thing"));

        let (page, total) = store.list_tracks(Some("album"), Some(2), 1);
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].file_relpath, "a/1.flac");

        let (all, total) = store.list_tracks(None, None, 0);
        assert_eq!(total, 6);
        assert_eq!(all.len(), 6);
    }
}
