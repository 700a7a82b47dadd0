use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use common::{normalize_key, stable_id, Album, Artist, Playlist, Track};
use parking_lot::RwLock;

const OFFLINE_KEY: &str = "offline";
const KEY_SEP: char = '\x1f';

/// Everything one provider contributed in its last successful fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderSlice {
    pub tracks: Vec<Track>,
    pub artists: Vec<Artist>,
    pub albums: Vec<Album>,
    pub playlists: Vec<Playlist>,
}

/// Client-side union of every provider's slice plus the offline layer.
///
/// Slices are replaced wholesale, so a provider can only ever touch its own
/// entities. Offline tracks are kept apart and shown whenever no live slice
/// carries the same track.
#[derive(Clone, Default)]
pub struct AggregateCatalog {
    inner: Arc<RwLock<AggregateInner>>,
}

#[derive(Default)]
struct AggregateInner {
    slices: BTreeMap<String, ProviderSlice>,
    offline: OfflineLayer,
}

#[derive(Default)]
struct OfflineLayer {
    tracks: Vec<Track>,
    artists: Vec<Artist>,
    albums: Vec<Album>,
}

impl AggregateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_provider_slice(&self, provider_id: &str, slice: ProviderSlice) {
        self.inner.write().slices.insert(provider_id.to_string(), slice);
    }

    pub fn remove_provider(&self, provider_id: &str) -> bool {
        self.inner.write().slices.remove(provider_id).is_some()
    }

    pub fn has_provider(&self, provider_id: &str) -> bool {
        self.inner.read().slices.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.inner.read().slices.keys().cloned().collect()
    }

    /// Replaces the offline layer with synthetic artists and albums derived
    /// from the completed downloads.
    pub fn merge_offline(&self, tracks: Vec<Track>) {
        let layer = OfflineLayer::build(tracks);
        self.inner.write().offline = layer;
    }

    pub fn tracks(&self) -> Vec<Track> {
        let guard = self.inner.read();
        let mut seen = HashSet::new();
        let mut tracks = Vec::new();
        for slice in guard.slices.values() {
            for track in &slice.tracks {
                seen.insert(provider_track_key(track));
                tracks.push(track.clone());
            }
        }
        let live_artists = live_artist_keys(&guard);
        let live_albums = live_album_keys(&guard);
        for track in &guard.offline.tracks {
            // Only the provider that served the download can shadow it.
            if seen.contains(&provider_track_key(track)) {
                continue;
            }
            let mut track = track.clone();
            let artist_key = normalize_key(track.primary_artist());
            if let Some(id) = live_artists.get(&artist_key) {
                track.artist_id = id.clone();
            } else {
                track.artist_id = offline_artist_id(track.primary_artist());
            }
            let album_key = album_key(track.primary_artist(), &track.album);
            if let Some(id) = live_albums.get(&album_key) {
                track.album_id = id.clone();
            } else {
                track.album_id = offline_album_id(track.primary_artist(), &track.album);
            }
            tracks.push(track);
        }
        tracks
    }

    pub fn artists(&self) -> Vec<Artist> {
        let guard = self.inner.read();
        let mut artists: Vec<Artist> = guard
            .slices
            .values()
            .flat_map(|slice| slice.artists.iter().cloned())
            .collect();
        let live = live_artist_keys(&guard);
        artists.extend(
            guard
                .offline
                .artists
                .iter()
                .filter(|artist| !live.contains_key(&normalize_key(&artist.name)))
                .cloned(),
        );
        artists
    }

    pub fn albums(&self) -> Vec<Album> {
        let guard = self.inner.read();
        let mut albums: Vec<Album> = guard
            .slices
            .values()
            .flat_map(|slice| slice.albums.iter().cloned())
            .collect();
        let live = live_album_keys(&guard);
        albums.extend(
            guard
                .offline
                .albums
                .iter()
                .filter(|album| !live.contains_key(&album_key(&album.artist, &album.title)))
                .cloned(),
        );
        albums
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.inner
            .read()
            .slices
            .values()
            .flat_map(|slice| slice.playlists.iter().cloned())
            .collect()
    }

    pub fn provider_track_count(&self, provider_id: &str) -> usize {
        self.inner
            .read()
            .slices
            .get(provider_id)
            .map(|slice| slice.tracks.len())
            .unwrap_or(0)
    }
}

impl OfflineLayer {
    fn build(mut tracks: Vec<Track>) -> Self {
        tracks.sort_by(|a, b| a.file_relpath.cmp(&b.file_relpath));
        let mut artists: HashMap<String, Artist> = HashMap::new();
        let mut albums: HashMap<String, Album> = HashMap::new();
        let mut artist_albums: HashMap<String, HashSet<String>> = HashMap::new();

        for track in &tracks {
            let artist_name = track.primary_artist().to_string();
            let artist_id = offline_artist_id(&artist_name);
            let album_id = offline_album_id(&artist_name, &track.album);

            let album = albums.entry(album_id.clone()).or_insert_with(|| Album {
                id: album_id.clone(),
                artist_id: artist_id.clone(),
                title: track.album.clone(),
                artist: artist_name.clone(),
                year: None,
                track_count: 0,
                cover: None,
                provider: None,
            });
            album.track_count += 1;
            if album.year.is_none() {
                album.year = track.year;
            }
            if album.cover.is_none() {
                album.cover = track.cover.clone();
            }

            let artist = artists.entry(artist_id.clone()).or_insert_with(|| Artist {
                id: artist_id.clone(),
                name: artist_name.clone(),
                track_count: 0,
                album_count: 0,
                image: None,
                provider: None,
            });
            artist.track_count += 1;
            if artist.image.is_none() {
                artist.image = track.cover.clone();
            }
            artist_albums.entry(artist_id).or_default().insert(album_id);
        }

        for (artist_id, album_ids) in artist_albums {
            if let Some(artist) = artists.get_mut(&artist_id) {
                artist.album_count = album_ids.len();
            }
        }

        let mut artists: Vec<Artist> = artists.into_values().collect();
        artists.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        let mut albums: Vec<Album> = albums.into_values().collect();
        albums.sort_by(|a, b| {
            a.artist
                .to_lowercase()
                .cmp(&b.artist.to_lowercase())
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        });
        Self {
            tracks,
            artists,
            albums,
        }
    }
}

fn live_artist_keys(inner: &AggregateInner) -> HashMap<String, String> {
    let mut keys = HashMap::new();
    for artist in inner.slices.values().flat_map(|slice| slice.artists.iter()) {
        keys.entry(normalize_key(&artist.name))
            .or_insert_with(|| artist.id.clone());
    }
    keys
}

fn live_album_keys(inner: &AggregateInner) -> HashMap<String, String> {
    let mut keys = HashMap::new();
    for album in inner.slices.values().flat_map(|slice| slice.albums.iter()) {
        keys.entry(album_key(&album.artist, &album.title))
            .or_insert_with(|| album.id.clone());
    }
    keys
}

fn provider_track_key(track: &Track) -> (Option<String>, String) {
    (
        track.provider.as_ref().map(|provider| provider.id.clone()),
        track.id.clone(),
    )
}

fn album_key(artist: &str, title: &str) -> String {
    format!("{}{}{}", normalize_key(artist), KEY_SEP, normalize_key(title))
}

pub fn offline_artist_id(name: &str) -> String {
    stable_id(&format!("{}{}{}", OFFLINE_KEY, KEY_SEP, normalize_key(name)))
}

pub fn offline_album_id(artist: &str, title: &str) -> String {
    stable_id(&format!(
        "{}{}{}",
        OFFLINE_KEY,
        KEY_SEP,
        album_key(artist, title)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{slice_of, track};

    #[test]
    fn replacing_one_slice_leaves_others_alone() {
        let catalog = AggregateCatalog::new();
        catalog.replace_provider_slice(
            "a",
            slice_of("a", vec![track("a", "x/1.mp3", "Air", "Moon Safari")]),
        );
        catalog.replace_provider_slice(
            "b",
            slice_of(
                "b",
                vec![
                    track("b", "y/1.mp3", "Bonobo", "Migration"),
                    track("b", "y/2.mp3", "Bonobo", "Migration"),
                ],
            ),
        );

        catalog.replace_provider_slice("a", slice_of("a", Vec::new()));
        assert_eq!(catalog.provider_track_count("a"), 0);
        assert_eq!(catalog.provider_track_count("b"), 2);
        assert_eq!(catalog.tracks().len(), 2);
        assert_eq!(catalog.artists().len(), 1);

        assert!(catalog.remove_provider("b"));
        assert!(catalog.tracks().is_empty());
        assert!(!catalog.remove_provider("missing"));
    }

    #[test]
    fn same_path_on_two_providers_is_kept_twice() {
        let catalog = AggregateCatalog::new();
        catalog.replace_provider_slice("a", slice_of("a", vec![track("a", "1.mp3", "Air", "X")]));
        catalog.replace_provider_slice("b", slice_of("b", vec![track("b", "1.mp3", "Air", "X")]));
        let tracks = catalog.tracks();
        assert_eq!(tracks.len(), 2);
        let providers: HashSet<String> = tracks
            .iter()
            .filter_map(|t| t.provider.as_ref().map(|p| p.id.clone()))
            .collect();
        assert_eq!(providers.len(), 2);
    }

    #[test]
    fn offline_tracks_survive_their_provider() {
        let catalog = AggregateCatalog::new();
        let downloaded = track("a", "x/1.mp3", "Air", "Moon Safari");
        catalog.replace_provider_slice(
            "a",
            slice_of(
                "a",
                vec![downloaded.clone(), track("a", "x/2.mp3", "Air", "Moon Safari")],
            ),
        );
        catalog.merge_offline(vec![downloaded.clone()]);

        assert_eq!(catalog.tracks().len(), 2);
        assert_eq!(catalog.artists().len(), 1);
        assert_eq!(catalog.albums().len(), 1);

        catalog.remove_provider("a");
        let tracks = catalog.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, downloaded.id);
        assert_eq!(tracks[0].artist_id, offline_artist_id("Air"));
        assert_eq!(tracks[0].album_id, offline_album_id("Air", "Moon Safari"));

        let artists = catalog.artists();
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].id, offline_artist_id("air"));
        assert_eq!(artists[0].track_count, 1);
        assert_eq!(artists[0].album_count, 1);
        assert_eq!(catalog.albums()[0].id, offline_album_id("Air", "Moon Safari"));
    }

    #[test]
    fn offline_track_is_not_shadowed_by_another_provider_at_the_same_path() {
        let catalog = AggregateCatalog::new();
        catalog.merge_offline(vec![track("a", "01.mp3", "Air", "Moon Safari")]);
        catalog.replace_provider_slice(
            "b",
            slice_of("b", vec![track("b", "01.mp3", "Bonobo", "Migration")]),
        );

        let mut found: Vec<(String, String)> = catalog
            .tracks()
            .into_iter()
            .map(|t| (t.provider.map(|p| p.id).unwrap_or_default(), t.artist))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("a".to_string(), "Air".to_string()),
                ("b".to_string(), "Bonobo".to_string()),
            ]
        );
    }

    #[test]
    fn offline_entities_do_not_duplicate_live_ones_from_other_providers() {
        let catalog = AggregateCatalog::new();
        catalog.merge_offline(vec![track("gone", "x/1.mp3", "AIR", "moon safari")]);
        catalog.replace_provider_slice(
            "b",
            slice_of("b", vec![track("b", "y/9.mp3", "Air", "Moon Safari")]),
        );
        assert_eq!(catalog.artists().len(), 1);
        assert_eq!(catalog.albums().len(), 1);
        let live_artist = catalog.artists()[0].id.clone();
        let offline_track = catalog
            .tracks()
            .into_iter()
            .find(|t| t.file_relpath == "x/1.mp3")
            .unwrap();
        assert_eq!(offline_track.artist_id, live_artist);
    }
}
