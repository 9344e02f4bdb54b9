//! Delays key emission until input stops changing for a quiet window.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Each submission supersedes the previous one; only a key that is still
/// the latest once the window elapses is emitted.
#[derive(Clone)]
pub struct Debouncer {
    window: Duration,
    latest: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Waits out the window. `Some(key)` when no newer submission arrived
    /// meanwhile, `None` when this one was superseded.
    pub async fn settle<K>(&self, key: K) -> Option<K> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
        }
        (self.latest.load(Ordering::SeqCst) == ticket).then_some(key)
    }
}
