use std::time::Duration;

use library::Library;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Installs the folder watcher once; later calls keep the existing one.
pub fn configure_watcher(state: &AppState) {
    if state.watcher.read().is_some() {
        return;
    }

    let debounce = Duration::from_secs(state.config.watch_debounce_secs.max(1));
    let root = state.library.root().to_path_buf();
    match setup_watcher(state.clone(), debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} for changes (debounce {}s)",
                root.display(),
                debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => warn!("Failed to start watcher: {}", err),
    }
}

fn setup_watcher(
    state: AppState,
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(state.library.root(), RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        watch_loop(state, rx, debounce).await;
    });
    Ok(watcher)
}

async fn watch_loop(state: AppState, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    while let Some(event) = rx.recv().await {
        if !is_relevant_event(&event) {
            continue;
        }
        if !settle(&mut rx, debounce).await {
            return;
        }
        rescan(&state.library, &state).await;
    }
}

/// Waits until the folder has been quiet for `debounce`. False once the
/// watcher is gone.
async fn settle(rx: &mut UnboundedReceiver<Event>, debounce: Duration) -> bool {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(debounce) => return true,
            next = rx.recv() => match next {
                Some(_) => continue,
                None => return false,
            },
        }
    }
}

async fn rescan(library: &Library, state: &AppState) {
    if library.is_scanning() {
        debug!("Change detected during a scan; skipping auto-scan");
        return;
    }
    match library.scan(&state.config.scan).await {
        Ok(summary) => info!(
            "Auto-scan complete: {} indexed, {} extracted, {} pruned",
            summary.indexed, summary.extracted, summary.pruned
        ),
        Err(err) => warn!("Auto-scan failed: {}", err),
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};

    #[test]
    fn only_content_changes_are_relevant() {
        assert!(is_relevant_event(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(!is_relevant_event(&Event::new(EventKind::Access(AccessKind::Any))));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_for_quiet_period() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(Event::new(EventKind::Create(CreateKind::File))).unwrap();
        assert!(settle(&mut rx, Duration::from_secs(2)).await);
        drop(tx);
        assert!(!settle(&mut rx, Duration::from_secs(2)).await);
    }
}
