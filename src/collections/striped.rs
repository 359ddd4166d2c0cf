/*!
 * Striped Map
 *
 * Lock-striped associative store. Keys hash to one of N independent
 * stripes, each behind its own read/write lock, so operations on
 * unrelated keys never contend. Read-modify-write operations
 * (`compute`, `put_if_absent`) are atomic per key under the stripe's
 * write lock.
 *
 * `len` and iteration are eventually-consistent snapshots, not
 * linearizable against concurrent mutation.
 */

use crate::core::shard::{ShardPolicy, WorkloadProfile};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

type Stripe<K, V> = RwLock<HashMap<K, V, ahash::RandomState>>;

/// Lock-striped concurrent map
///
/// # Examples
///
/// ```
/// use threadgate::StripedMap;
///
/// let hits: StripedMap<&str, u64> = StripedMap::with_defaults();
/// hits.insert("page", 1);
/// hits.compute("page", |_, v| v.map(|n| n + 1));
/// assert_eq!(hits.get(&"page"), Some(2));
/// ```
pub struct StripedMap<K, V> {
    stripes: Box<[Stripe<K, V>]>,
    stripe_mask: usize,
}

impl<K: Hash + Eq, V> StripedMap<K, V> {
    /// Create a map with `stripe_count` stripes (power of 2)
    pub fn new(stripe_count: usize) -> Self {
        assert!(
            stripe_count > 0 && stripe_count.is_power_of_two(),
            "stripe count must be a power of 2"
        );
        Self {
            stripes: (0..stripe_count).map(|_| Stripe::default()).collect(),
            stripe_mask: stripe_count - 1,
        }
    }

    /// Create with a CPU-topology-derived stripe count
    pub fn with_defaults() -> Self {
        Self::new(ShardPolicy::stripes(WorkloadProfile::HighContention))
    }

    /// Stripe index for a key
    #[inline]
    fn stripe_index(&self, key: &K) -> usize {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.stripe_mask
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let idx = self.stripe_index(&key);
        self.stripes[idx].write().insert(key, value)
    }

    /// Insert only if absent. Returns the existing value when present
    /// (leaving it in place), `None` when the insert happened.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let idx = self.stripe_index(&key);
        let mut stripe = self.stripes[idx].write();
        match stripe.entry(key) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    /// Atomically read-modify-write the entry for `key` under its
    /// stripe lock. `f` receives the current value (if any); returning
    /// `None` removes the entry. Returns the value left in the map.
    pub fn compute<F>(&self, key: K, f: F) -> Option<V>
    where
        V: Clone,
        F: FnOnce(&K, Option<V>) -> Option<V>,
    {
        let idx = self.stripe_index(&key);
        let mut stripe = self.stripes[idx].write();
        let current = stripe.remove(&key);
        match f(&key, current) {
            Some(value) => {
                let result = value.clone();
                stripe.insert(key, value);
                Some(result)
            }
            None => None,
        }
    }

    /// Copy out the value for `key` (read lock only)
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let idx = self.stripe_index(key);
        self.stripes[idx].read().get(key).cloned()
    }

    /// Apply `f` to the value for `key` without cloning
    pub fn get_with<F, R>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        let idx = self.stripe_index(key);
        self.stripes[idx].read().get(key).map(f)
    }

    /// Remove `key`, returning its value
    pub fn remove(&self, key: &K) -> Option<V> {
        let idx = self.stripe_index(key);
        self.stripes[idx].write().remove(key)
    }

    /// True if `key` is present
    pub fn contains_key(&self, key: &K) -> bool {
        let idx = self.stripe_index(key);
        self.stripes[idx].read().contains_key(key)
    }

    /// Entry count summed stripe by stripe; eventually consistent
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|stripe| stripe.read().len()).sum()
    }

    /// True if every stripe is empty (eventually consistent)
    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(|stripe| stripe.read().is_empty())
    }

    /// Remove all entries
    pub fn clear(&self) {
        for stripe in self.stripes.iter() {
            stripe.write().clear();
        }
    }

    /// Visit every entry, one stripe at a time. Entries added or
    /// removed concurrently may or may not be seen.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for stripe in self.stripes.iter() {
            let guard = stripe.read();
            for (k, v) in guard.iter() {
                f(k, v);
            }
        }
    }
}

impl<K: Hash + Eq, V> Default for StripedMap<K, V> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<K, V> std::fmt::Debug for StripedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedMap")
            .field("stripes", &self.stripes.len())
            .finish_non_exhaustive()
    }
}
