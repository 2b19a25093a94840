use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Per-key trailing debounce. Scheduling a key aborts that key's pending
/// call, so only the newest call in a burst runs.
#[derive(Debug)]
pub struct Debouncer {
    runtime: Handle,
    pending: HashMap<String, JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: HashMap::new(),
        }
    }

    /// Run `task` after `delay` unless `key` is scheduled again first.
    /// Returns true when a pending call was superseded.
    pub fn schedule<F>(&mut self, key: impl Into<String>, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        self.pending.retain(|_, handle| !handle.is_finished());

        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        match self.pending.insert(key.clone(), handle) {
            Some(previous) => {
                previous.abort();
                debug!(key = %key, "Superseded pending call");
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_only_last() {
        let mut debouncer = Debouncer::new(Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            debouncer.schedule("save:a", Duration::from_millis(300), async move {
                seen.lock().unwrap().push(i);
            });
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*seen.lock().unwrap(), vec![4]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let mut debouncer = Debouncer::new(Handle::current());
        let runs = Arc::new(AtomicUsize::new(0));

        for key in ["save:a", "save:b"] {
            let runs = Arc::clone(&runs);
            let superseded = debouncer.schedule(key, Duration::from_millis(300), async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            assert!(!superseded);
        }

        tokio::time::sleep(Duration::from_millis(301)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let mut debouncer = Debouncer::new(Handle::current());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        debouncer.schedule("reorder:root", Duration::from_millis(300), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(debouncer.cancel("reorder:root"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
