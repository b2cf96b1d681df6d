//! A single process-wide cancellation flag, checked cooperatively at the top
//! of every Puller loop iteration.
//!
//! `tokio_util::sync::CancellationToken` would also fit here, but this flag
//! is a plain, read-mostly boolean with no associated wakeup semantics a
//! Puller needs beyond "check at the top of the loop", so a cheap atomic is
//! used instead (see DESIGN.md).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let c = Cancellation::new();
        assert!(!c.is_set());
        c.set();
        assert!(c.is_set());
        // Idempotent.
        c.set();
        assert!(c.is_set());
    }

    #[test]
    fn clones_share_state() {
        let a = Cancellation::new();
        let b = a.clone();
        b.set();
        assert!(a.is_set());
    }
}
