//! Registry of observers with add/remove and error-isolated fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

/// A list of shared observers of type `L` (usually a `dyn Trait`).
///
/// Fan-out works on a snapshot so observers may add or remove observers from
/// inside a callback. An observer that returns an error or panics is logged
/// and skipped; the remaining observers still receive the notification.
pub struct ObserverList<L: ?Sized> {
    entries: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ObserverList<L> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer. Returns `false` if this exact instance is
    /// already registered.
    pub fn add(&self, observer: Arc<L>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.iter().any(|o| same(o, &observer)) {
            return false;
        }
        entries.push(observer);
        true
    }

    /// Unregister an observer. Returns `true` if it was registered.
    pub fn remove(&self, observer: &Arc<L>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|o| !same(o, observer));
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Call `notify` on every observer. Returns how many succeeded.
    pub fn notify_all<F>(&self, what: &str, mut notify: F) -> usize
    where
        F: FnMut(&L) -> anyhow::Result<()>,
    {
        let mut delivered = 0;
        for observer in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref()))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(event = what, error = %e, "Observer failed"),
                Err(_) => error!(event = what, "Observer panicked"),
            }
        }
        delivered
    }
}

impl<L: ?Sized> Default for ObserverList<L> {
    fn default() -> Self {
        Self::new()
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self) -> anyhow::Result<()>;
    }

    struct Good(AtomicUsize);

    impl Counter for Good {
        fn hit(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Counter for Failing {
        fn hit(&self) -> anyhow::Result<()> {
            anyhow::bail!("listener broke")
        }
    }

    struct Panicking;

    impl Counter for Panicking {
        fn hit(&self) -> anyhow::Result<()> {
            panic!("listener exploded")
        }
    }

    #[test]
    fn test_add_remove() {
        let list: ObserverList<dyn Counter> = ObserverList::new();
        let a: Arc<dyn Counter> = Arc::new(Good(AtomicUsize::new(0)));
        let b: Arc<dyn Counter> = Arc::new(Good(AtomicUsize::new(0)));

        assert!(list.add(a.clone()));
        assert!(!list.add(a.clone()));
        assert!(list.add(b.clone()));
        assert_eq!(list.len(), 2);

        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_fan_out_survives_failures() {
        let list: ObserverList<dyn Counter> = ObserverList::new();
        let first = Arc::new(Good(AtomicUsize::new(0)));
        let last = Arc::new(Good(AtomicUsize::new(0)));

        list.add(first.clone());
        list.add(Arc::new(Failing));
        list.add(Arc::new(Panicking));
        list.add(last.clone());

        let delivered = list.notify_all("test", |c| c.hit());
        assert_eq!(delivered, 2);
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(last.0.load(Ordering::SeqCst), 1);
    }
}
