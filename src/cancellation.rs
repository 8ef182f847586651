//! Request cancellation registry
//!
//! Maps a request key to the abort handle of the in-flight request using it.
//! Registering a key that is already taken aborts the previous request first,
//! so at most one request per key is ever live.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Something that can abort an in-flight operation.
pub trait AbortHandle: Send + Sync {
    fn abort(&self);
}

impl AbortHandle for CancellationToken {
    fn abort(&self) {
        self.cancel();
    }
}

struct Entry<H> {
    handle: H,
    generation: u64,
}

/// Registry of in-flight requests keyed by their request key.
pub struct CancelRegistry<H: AbortHandle = CancellationToken> {
    entries: Mutex<HashMap<String, Entry<H>>>,
    next_generation: AtomicU64,
}

impl<H: AbortHandle> Default for CancelRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }
}

impl<H: AbortHandle> CancelRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` under `key`, aborting and evicting any previous handle.
    ///
    /// Returns the generation of the new entry, to be passed to [`Self::release`]
    /// once the request completes.
    pub fn register(&self, key: &str, handle: H) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let previous = self
            .entries
            .lock()
            .insert(key.to_string(), Entry { handle, generation });

        // abort outside of the lock, the handle may run arbitrary code
        if let Some(previous) = previous {
            tracing::debug!(key, "superseding an in-flight request");
            previous.handle.abort();
        }

        generation
    }

    /// Aborts and evicts the request registered under `key` (no-op if missing).
    pub fn cancel(&self, key: &str) {
        let entry = self.entries.lock().remove(key);
        if let Some(entry) = entry {
            entry.handle.abort();
        }
    }

    /// Aborts and evicts every registered request.
    pub fn cancel_all(&self) {
        let entries: Vec<Entry<H>> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.handle.abort();
        }
    }

    /// Evicts the entry under `key` without aborting it, but only if it still
    /// belongs to the given generation (a newer request may have replaced it).
    pub fn release(&self, key: &str, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.generation == generation) {
            entries.remove(key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<H: AbortHandle> std::fmt::Debug for CancelRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        f.debug_struct("CancelRegistry").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingHandle(Arc<AtomicUsize>);

    impl CountingHandle {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl AbortHandle for CountingHandle {
        fn abort(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_aborts_previous_exactly_once() {
        let registry = CancelRegistry::new();
        let first = CountingHandle::default();
        let second = CountingHandle::default();

        registry.register("k1", first.clone());
        assert_eq!(first.count(), 0);

        registry.register("k1", second.clone());
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);
        assert_eq!(registry.len(), 1);

        registry.cancel("k1");
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_missing_key_is_noop() {
        let registry: CancelRegistry<CountingHandle> = CancelRegistry::new();
        registry.cancel("missing");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let registry = CancelRegistry::new();
        let a = CountingHandle::default();
        let b = CountingHandle::default();

        registry.register("a", a.clone());
        registry.register("b", b.clone());
        registry.cancel_all();

        assert_eq!((a.count(), b.count()), (1, 1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_ignores_stale_generation() {
        let registry = CancelRegistry::new();
        let old = registry.register("k", CountingHandle::default());
        let new = registry.register("k", CountingHandle::default());

        registry.release("k", old);
        assert!(registry.contains("k"));

        registry.release("k", new);
        assert!(!registry.contains("k"));
    }

    #[test]
    fn test_cancellation_token_handle() {
        let registry = CancelRegistry::new();
        let token = CancellationToken::new();

        registry.register("k", token.clone());
        registry.register("k", CancellationToken::new());

        assert!(token.is_cancelled());
    }
}
