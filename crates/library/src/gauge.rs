use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Number of playback streams currently being served. Shared between the
/// streaming path, which moves it, and the scanner, which only reads it.
#[derive(Clone, Debug, Default)]
pub struct StreamGauge {
    active: Arc<AtomicUsize>,
}

/// Keeps one stream counted for as long as it is alive.
#[derive(Debug)]
pub struct StreamGuard {
    gauge: StreamGauge,
}

impl StreamGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero; an unmatched stop is ignored.
    pub fn stream_stopped(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                value.checked_sub(1)
            });
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_streaming(&self) -> bool {
        self.active() > 0
    }

    pub fn track(&self) -> StreamGuard {
        self.stream_started();
        StreamGuard {
            gauge: self.clone(),
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.gauge.stream_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::StreamGauge;

    #[test]
    fn stop_never_goes_below_zero() {
        let gauge = StreamGauge::new();
        gauge.stream_stopped();
        assert_eq!(gauge.active(), 0);
        gauge.stream_started();
        gauge.stream_started();
        gauge.stream_stopped();
        assert_eq!(gauge.active(), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let gauge = StreamGauge::new();
        let reader = gauge.clone();
        {
            let _first = gauge.track();
            let _second = gauge.track();
            assert_eq!(reader.active(), 2);
            assert!(reader.is_streaming());
        }
        assert_eq!(reader.active(), 0);
    }
}
