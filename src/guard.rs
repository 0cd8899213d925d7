use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Single "fetch in progress" flag shared by every path that can decide it is
/// time to refresh. A request that finds it held is dropped, not queued.
#[derive(Debug, Clone, Default)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl FlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one fetch; releases the guard on drop.
#[derive(Debug)]
pub struct FlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Session epoch. Bumped on teardown or principal change; a result captured
/// under an older epoch is discarded instead of being applied.
#[derive(Debug, Default)]
pub struct Liveness {
    epoch: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessToken(u64);

impl Liveness {
    pub fn token(&self) -> LivenessToken {
        LivenessToken(self.epoch.load(Ordering::Acquire))
    }

    pub fn is_current(&self, token: LivenessToken) -> bool {
        self.epoch.load(Ordering::Acquire) == token.0
    }

    pub fn invalidate(&self) -> LivenessToken {
        LivenessToken(self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }
}
