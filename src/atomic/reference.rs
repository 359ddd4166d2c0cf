/*!
 * Atomic Reference
 *
 * Shared reference slot with identity-based compare-and-swap, for the
 * cases value equality cannot express: claiming one specific object,
 * or publishing read-mostly snapshots RCU-style.
 *
 * # Performance
 *
 * - **Reads**: lock-free atomic pointer load
 * - **Writes**: allocate-swap; `update` is clone-modify-swap
 */

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Atomic `Arc<T>` slot with pointer-identity CAS
///
/// # Examples
///
/// ```
/// use threadgate::AtomicRef;
/// use std::sync::Arc;
///
/// let slot = AtomicRef::new("v1");
/// let current = slot.load();
///
/// // Succeeds only against the exact Arc we loaded
/// assert!(slot.compare_and_swap(&current, Arc::new("v2")));
/// assert!(!slot.compare_and_swap(&current, Arc::new("v3")));
/// assert_eq!(*slot.load(), "v2");
/// ```
pub struct AtomicRef<T> {
    inner: ArcSwap<T>,
}

impl<T> AtomicRef<T> {
    /// Create a slot holding `value`
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(value),
        }
    }

    /// Create a slot from an existing `Arc`
    #[inline]
    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            inner: ArcSwap::new(value),
        }
    }

    /// Load the current reference
    #[inline]
    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the current reference
    #[inline]
    pub fn store(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Replace the current reference, returning the previous one
    #[inline]
    pub fn swap(&self, value: T) -> Arc<T> {
        self.inner.swap(Arc::new(value))
    }

    /// Replace the reference with `new` iff the slot still holds exactly
    /// `expected` (pointer identity, not value equality).
    ///
    /// Returns true on success; on failure the slot is unchanged.
    #[inline]
    pub fn compare_and_swap(&self, expected: &Arc<T>, new: Arc<T>) -> bool {
        let prev = self.inner.compare_and_swap(expected, new);
        Arc::ptr_eq(&prev, expected)
    }

    /// Clone-modify-swap until the replacement installs.
    ///
    /// `f` may run multiple times under contention and must be pure.
    #[inline]
    pub fn update<F>(&self, mut f: F)
    where
        T: Clone,
        F: FnMut(&T) -> T,
    {
        self.inner.rcu(|old| f(old));
    }
}

impl<T: Default> Default for AtomicRef<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AtomicRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicRef").field(&self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn load_store_swap() {
        let slot = AtomicRef::new(1);
        assert_eq!(*slot.load(), 1);

        slot.store(2);
        assert_eq!(*slot.load(), 2);

        let old = slot.swap(3);
        assert_eq!(*old, 2);
        assert_eq!(*slot.load(), 3);
    }

    #[test]
    fn identity_cas_rejects_equal_but_distinct_values() {
        let slot = AtomicRef::new(42);
        let imposter = Arc::new(42); // equal contents, different allocation

        assert!(!slot.compare_and_swap(&imposter, Arc::new(99)));
        assert_eq!(*slot.load(), 42);

        let current = slot.load();
        assert!(slot.compare_and_swap(&current, Arc::new(99)));
        assert_eq!(*slot.load(), 99);
    }

    #[test]
    fn update_applies_under_contention() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let slot = Arc::new(AtomicRef::new(0usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        slot.update(|v| v + 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*slot.load(), THREADS * PER_THREAD);
    }
}
