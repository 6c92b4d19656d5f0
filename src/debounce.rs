//! Debounced I/O as an explicit state machine (§9 "Debounced I/O").
//!
//! `{ Idle, Pending(deadline), Running }`, driven by tokio's clock since
//! every debounced save in this crate (metadata store, song-key map,
//! blob-store index, ignore-rule set) needs to suspend, not just sleep
//! on a background OS thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

type BoxFut = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A trailing-edge debouncer: repeated [`Debouncer::mark_dirty`] calls
/// within `interval` collapse into a single save. [`Debouncer::trigger`]
/// fires the pending save (if any) immediately and awaits it — this is
/// the `Pending -> Running` transition; a bare `mark_dirty` with nothing
/// pending is the `Idle -> Pending` transition; once the scheduled task
/// runs to completion the debouncer is `Idle` again.
pub struct Debouncer {
    interval: Duration,
    save: Arc<dyn Fn() -> BoxFut + Send + Sync>,
    pending: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new<F, Fut>(interval: Duration, save: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            interval,
            save: Arc::new(move || Box::pin(save()) as BoxFut),
            pending: AsyncMutex::new(None),
        }
    }

    /// Schedule a save `interval` from now, replacing any already
    /// pending timer so only the last call in a burst actually fires.
    pub async fn mark_dirty(&self) {
        let save = self.save.clone();
        let interval = self.interval;
        let mut guard = self.pending.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            save().await;
        }));
    }

    /// Fire the pending save now and await its completion. Safe to call
    /// with nothing pending — the save itself is expected to be a no-op
    /// when there is nothing dirty (see the metadata store's equality
    /// check).
    pub async fn trigger(&self) {
        let mut guard = self.pending.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        drop(guard);
        (self.save)().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn trigger_runs_the_save_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let debouncer = Debouncer::new(Duration::from_secs(60), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        debouncer.trigger().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_mark_dirty_collapses_to_one_save() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let debouncer = Debouncer::new(Duration::from_millis(20), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        for _ in 0..5 {
            debouncer.mark_dirty().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
