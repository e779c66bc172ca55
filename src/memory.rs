use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Observational allocation tracker for one worker of one construction run.
///
/// Callers report the sizes of the large buffers they allocate and release;
/// the tracker keeps the current and peak totals. It never influences
/// control flow. Tracking can be switched off around allocation-heavy loops
/// whose buffers are accounted for in bulk afterwards.
#[derive(Debug)]
pub struct AllocTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    enabled: AtomicBool,
}

impl Default for AllocTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocTracker {
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn track_alloc(&self, bytes: usize) {
        if !self.is_enabled() {
            return;
        }
        let now = self.current.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    pub fn track_free(&self, bytes: usize) {
        if !self.is_enabled() {
            return;
        }
        // saturate rather than wrap if a release was reported while disabled
        let _ = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(bytes))
            });
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Run `f` with tracking switched off, restoring the previous state after.
    pub fn paused<R>(&self, f: impl FnOnce() -> R) -> R {
        let was = self.enabled.swap(false, Ordering::Relaxed);
        let r = f();
        self.enabled.store(was, Ordering::Relaxed);
        r
    }
}
