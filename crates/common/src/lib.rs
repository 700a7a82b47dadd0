use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

const KEY_SEP: char = '\x1f';

/// Which catalog instance produced an entity. Absent on entities that come
/// straight out of a provider's own store; set by the aggregator when merging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub track_count: usize,
    pub album_count: usize,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderTag>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub artist_id: String,
    pub title: String,
    pub artist: String,
    pub year: Option<i32>,
    pub track_count: usize,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderTag>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub artist_id: String,
    pub album_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(default)]
    pub album_artist: Option<String>,
    pub duration_ms: u32,
    pub file_relpath: String,
    pub file_size: u64,
    pub format: AudioFormat,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub track_no: Option<u16>,
    #[serde(default)]
    pub disc_no: Option<u16>,
    #[serde(default)]
    pub cover: Option<String>,
    /// Milliseconds since the epoch.
    pub added_at: u64,
    /// File mtime in milliseconds since the epoch; drives incremental scans.
    pub modified_at: u64,
    #[serde(default)]
    pub provider: Option<ProviderTag>,
}

impl Track {
    /// Name of the artist that owns this track's album.
    pub fn primary_artist(&self) -> &str {
        primary_artist_name(self.album_artist.as_deref(), &self.artist)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: Codec,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub bit_depth: Option<u8>,
    #[serde(default)]
    pub channels: Option<u8>,
    pub lossless: bool,
}

impl AudioFormat {
    pub fn from_codec(codec: Codec) -> Self {
        Self {
            codec,
            bitrate: None,
            sample_rate: None,
            bit_depth: None,
            channels: None,
            lossless: codec.is_lossless(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    Flac,
    Ogg,
    Opus,
    Wav,
    Aac,
    Alac,
    Aiff,
    Wma,
    Ape,
    WavPack,
    Dsd,
}

impl Codec {
    pub fn from_extension(ext: &str) -> Option<Codec> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Codec::Mp3),
            "flac" => Some(Codec::Flac),
            "ogg" | "oga" => Some(Codec::Ogg),
            "opus" => Some(Codec::Opus),
            "wav" => Some(Codec::Wav),
            "m4a" | "aac" => Some(Codec::Aac),
            "alac" => Some(Codec::Alac),
            "aif" | "aiff" => Some(Codec::Aiff),
            "wma" => Some(Codec::Wma),
            "ape" => Some(Codec::Ape),
            "wv" => Some(Codec::WavPack),
            "dsf" | "dff" => Some(Codec::Dsd),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Codec> {
        let ext = path.extension()?.to_string_lossy();
        Codec::from_extension(&ext)
    }

    pub fn is_lossless(self) -> bool {
        matches!(
            self,
            Codec::Flac
                | Codec::Wav
                | Codec::Alac
                | Codec::Aiff
                | Codec::Ape
                | Codec::WavPack
                | Codec::Dsd
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub track_ids: Vec<String>,
    #[serde(default)]
    pub provider: Option<ProviderTag>,
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn artist_id_for(name: &str) -> String {
    stable_id(&normalize_key(name))
}

pub fn album_id_for(artist: &str, title: &str) -> String {
    let mut key = normalize_key(artist);
    key.push(KEY_SEP);
    key.push_str(&normalize_key(title));
    stable_id(&key)
}

/// Album-artist wins over track-artist; blank values fall through.
pub fn primary_artist_name<'a>(album_artist: Option<&'a str>, artist: &'a str) -> &'a str {
    match album_artist.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => {
            let trimmed = artist.trim();
            if trimmed.is_empty() {
                UNKNOWN_ARTIST
            } else {
                trimmed
            }
        }
    }
}

pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("Artist/Album/Track.mp3");
        let second = stable_id("Artist/Album/Track.mp3");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("Artist/Album/Track2.mp3"));
    }

    #[test]
    fn artist_and_album_ids_ignore_case_and_padding() {
        assert_eq!(artist_id_for("Radiohead"), artist_id_for("  radiohead "));
        assert_eq!(
            album_id_for("Radiohead", "OK Computer"),
            album_id_for("RADIOHEAD", "ok computer")
        );
        assert_ne!(
            album_id_for("Radiohead", "Kid A"),
            album_id_for("Radiohead", "Amnesiac")
        );
    }

    #[test]
    fn primary_artist_falls_back_to_track_artist() {
        assert_eq!(primary_artist_name(Some("Various"), "Bjork"), "Various");
        assert_eq!(primary_artist_name(Some("  "), "Bjork"), "Bjork");
        assert_eq!(primary_artist_name(None, ""), UNKNOWN_ARTIST);
    }

    #[test]
    fn relpaths_use_forward_slashes() {
        let root = Path::new("/music");
        let file = root.join("a").join("b").join("c.flac");
        assert_eq!(relpath_from(root, &file).as_deref(), Some("a/b/c.flac"));
        assert_eq!(join_relpath(root, "a/b/c.flac"), file);
        assert_eq!(relpath_from(Path::new("/other"), &file), None);
    }

    #[test]
    fn codec_lookup_is_case_insensitive() {
        assert_eq!(Codec::from_path(Path::new("x/SONG.FLAC")), Some(Codec::Flac));
        assert_eq!(Codec::from_extension("m4a"), Some(Codec::Aac));
        assert_eq!(Codec::from_extension("txt"), None);
        assert!(Codec::Flac.is_lossless());
        assert!(!Codec::Mp3.is_lossless());
    }

    #[test]
    fn track_without_provider_deserializes() {
        let json = r#"{
            "id": "t", "artist_id": "a", "album_id": "b", "title": "T",
            "artist": "A", "album": "B", "duration_ms": 1000,
            "file_relpath": "A/B/t.mp3", "file_size": 10,
            "format": {"codec": "mp3", "lossless": false},
            "added_at": 1, "modified_at": 2
        }"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert!(track.provider.is_none());
        assert_eq!(track.format.codec, Codec::Mp3);
        assert_eq!(track.primary_artist(), "A");
    }
}
