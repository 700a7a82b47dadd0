use std::env;
use std::path::PathBuf;

use library::{Library, ScanOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_root = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let cache_path = args
        .next()
        .or_else(|| env::var("CACHE_PATH").ok())
        .unwrap_or_else(|| "data/catalog.json".to_string());
    let cache_path = PathBuf::from(cache_path);
    if let Some(parent) = cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let library = Library::open(PathBuf::from(&music_root), &cache_path);
    let summary = library.scan(&ScanOptions::default()).await?;
    library.close().await?;

    let stats = library.stats();
    println!(
        "Indexed: {} artists, {} albums, {} tracks, {} playlists",
        stats.artists, stats.albums, stats.tracks, summary.playlists
    );
    println!(
        "Extracted {}, unchanged {}, failed {}, pruned {} in {} ms",
        summary.extracted, summary.unchanged, summary.failed, summary.pruned, summary.duration_ms
    );

    Ok(())
}
