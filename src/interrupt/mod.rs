//! Cleanup on interrupt.
//!
//! Operations that create external resources (such as in-cluster build pods)
//! register a cleanup with the [`InterruptRegistry`] and get a [`CleanupGuard`]
//! back. The guard runs the cleanup when dropped, so a task aborted mid-operation
//! still releases its resources. [`CleanupGuard::disarm`] unregisters it without
//! running it. When the process receives SIGINT or SIGTERM, the
//! listener started by [`InterruptRegistry::listen`] runs every still-registered
//! cleanup in registration order and exits.
//!
//! Each cleanup runs at most once, no matter how it is triggered.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::constants::INTERRUPTED_EXIT_CODE;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    cleanups: Vec<(u64, Cleanup)>,
}

/// Ordered registry of pending cleanups. Clones share the same registry.
#[derive(Clone, Default)]
pub struct InterruptRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for InterruptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptRegistry").field("pending", &self.pending()).finish()
    }
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cleanup`, returning a guard that runs it on drop.
    #[must_use = "dropping the guard runs the cleanup immediately"]
    pub fn register(&self, cleanup: impl FnOnce() + Send + 'static) -> CleanupGuard {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.cleanups.push((id, Box::new(cleanup)));
        CleanupGuard {
            registry: self.clone(),
            id,
            armed: true,
        }
    }

    /// Number of cleanups still registered.
    pub fn pending(&self) -> usize {
        self.lock().cleanups.len()
    }

    fn take(&self, id: u64) -> Option<Cleanup> {
        let mut inner = self.lock();
        let pos = inner.cleanups.iter().position(|(entry, _)| *entry == id)?;
        Some(inner.cleanups.remove(pos).1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking cleanup must not prevent the others from running.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Run and remove every registered cleanup in registration order.
    ///
    /// Returns how many cleanups ran. The lock is released before each cleanup runs,
    /// so cleanups may register or unregister others.
    pub fn run_all(&self) -> usize {
        let pending = std::mem::take(&mut self.lock().cleanups);
        let count = pending.len();
        for (_, cleanup) in pending {
            cleanup();
        }
        count
    }

    /// Spawn a task that waits for SIGINT/SIGTERM, runs all cleanups and exits.
    pub fn listen(&self) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            let pending = registry.pending();
            if pending > 0 {
                tracing::warn!("Interrupted, running {pending} cleanup(s)");
            } else {
                tracing::warn!("Interrupted");
            }
            registry.run_all();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::debug!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Handle to a registered cleanup.
///
/// Dropping the guard runs the cleanup unless it already ran or the guard was
/// disarmed.
pub struct CleanupGuard {
    registry: InterruptRegistry,
    id: u64,
    armed: bool,
}

impl CleanupGuard {
    /// Unregister the cleanup and run it now, unless it already ran.
    pub fn run_now(self) {
        drop(self);
    }

    /// Unregister the cleanup without running it.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.registry.take(self.id) {
            if self.armed {
                cleanup();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = log.clone();
        let make = move |name: &'static str| {
            let log = handle.clone();
            Box::new(move || log.lock().unwrap().push(name)) as Box<dyn FnOnce() + Send>
        };
        (log, make)
    }

    #[test]
    fn test_run_all_in_registration_order() {
        let registry = InterruptRegistry::new();
        let (log, make) = recorder();

        let _a = registry.register(make("a"));
        let _b = registry.register(make("b"));
        let _c = registry.register(make("c"));

        assert_eq!(registry.run_all(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(registry.run_all(), 0);
    }

    #[test]
    fn test_dropped_guard_runs_cleanup() {
        let registry = InterruptRegistry::new();
        let (log, make) = recorder();

        let guard = registry.register(make("dropped"));
        let _kept = registry.register(make("kept"));
        drop(guard);
        assert_eq!(registry.pending(), 1);

        registry.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["dropped", "kept"]);
    }

    #[test]
    fn test_disarmed_guard_unregisters_without_running() {
        let registry = InterruptRegistry::new();
        let (log, make) = recorder();

        let guard = registry.register(make("gone"));
        let _kept = registry.register(make("kept"));
        guard.disarm();

        registry.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_aborted_task_runs_its_cleanup() {
        let registry = InterruptRegistry::new();
        let (log, make) = recorder();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let task_registry = registry.clone();
        let task = tokio::spawn(async move {
            let _guard = task_registry.register(make("pod"));
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
        });
        started_rx.await.unwrap();
        assert_eq!(registry.pending(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(registry.pending(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["pod"]);
    }

    #[test]
    fn test_cleanup_runs_at_most_once() {
        let registry = InterruptRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let guard = registry.register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.run_all();
        guard.run_now();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_now_removes_from_registry() {
        let registry = InterruptRegistry::new();
        let (log, make) = recorder();

        let guard = registry.register(make("now"));
        assert_eq!(registry.pending(), 1);
        guard.run_now();

        assert_eq!(registry.pending(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["now"]);
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = InterruptRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let guard = registry.register(|| {});
                std::mem::forget(guard);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.pending(), 8);
    }
}
