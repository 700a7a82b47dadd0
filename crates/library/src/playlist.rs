use std::path::Path;

const PLAYLIST_DIRECTIVE: &str = "#PLAYLIST:";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedPlaylist {
    pub name: Option<String>,
    /// Entry paths relative to the library root, in playlist order.
    pub entries: Vec<String>,
}

pub fn is_playlist_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            ext == "m3u" || ext == "m3u8"
        })
        .unwrap_or(false)
}

/// Parses an M3U body. `dir_relpath` is the playlist's own folder relative to
/// the root (empty for the root itself); `root` resolves absolute entries.
pub fn parse_m3u(contents: &str, dir_relpath: &str, root: &Path) -> ParsedPlaylist {
    let mut parsed = ParsedPlaylist::default();
    for line in contents.lines() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix(PLAYLIST_DIRECTIVE) {
            let name = name.trim();
            if !name.is_empty() {
                parsed.name = Some(name.to_string());
            }
            continue;
        }
        if line.starts_with('#') || line.contains("://") {
            continue;
        }
        let entry = line.replace('\\', "/");
        let absolute = Path::new(&entry);
        let relpath = if absolute.is_absolute() {
            match common::relpath_from(root, absolute) {
                Some(rel) => normalize_relpath(&rel),
                None => None,
            }
        } else if dir_relpath.is_empty() {
            normalize_relpath(&entry)
        } else {
            normalize_relpath(&format!("{}/{}", dir_relpath, entry))
        };
        if let Some(relpath) = relpath {
            parsed.entries.push(relpath);
        }
    }
    parsed
}

/// Collapses `.` and `..` segments; `None` when the path escapes the root.
fn normalize_relpath(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
