use std::{hash::Hash, sync::Arc};

use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::trace;

type Slot<V> = Arc<OnceCell<V>>;

/// Thread safe compute-if-absent cache.
///
/// The table lock is only held while looking up the slot of a key. The
/// factory runs under the slot's own lock, so concurrent first lookups of the
/// same key wait for a single computation while other keys proceed. A factory
/// must not look up its own key again.
#[derive(Debug)]
pub struct SyncCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for SyncCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SyncCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.slots.lock().get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys with a computed value.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_compute(&self, key: K, factory: impl FnOnce(&K) -> V) -> V {
        let slot = self.slot(&key);

        if let Some(value) = slot.get() {
            trace!("sync cache hit");
            return value.clone();
        }

        slot.get_or_init(|| factory(&key)).clone()
    }

    /// Like [`Self::get_or_compute`] but an error from `factory` is returned
    /// as-is and the key stays unresolved.
    pub fn try_get_or_compute<E>(
        &self,
        key: K,
        factory: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, E> {
        let slot = self.slot(&key);

        match slot.get_or_try_init(|| factory(&key)) {
            Ok(value) => Ok(value.clone()),
            Err(error) => {
                self.evict_unresolved(&key, &slot);
                Err(error)
            }
        }
    }

    /// A `None` from `factory` is returned without being cached.
    pub fn get_or_compute_optional(
        &self,
        key: K,
        factory: impl FnOnce(&K) -> Option<V>,
    ) -> Option<V> {
        self.try_get_or_compute(key, |key| factory(key).ok_or(()))
            .ok()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    // Drops the slot of a failed computation unless another lookup is using it
    // or has resolved it meanwhile.
    fn evict_unresolved(&self, key: &K, slot: &Slot<V>) {
        let mut slots = self.slots.lock();

        let Some(stored) = slots.get(key) else {
            return;
        };

        if Arc::ptr_eq(stored, slot) && Arc::strong_count(slot) == 2 && slot.get().is_none() {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get(key) {
            return slot.clone();
        }

        slots.entry(key.clone()).or_default().clone()
    }
}

/// Thread safe function whose results are retained per argument.
pub struct SyncMemoizedFunction<K, V> {
    function: Box<dyn Fn(&K) -> V + Send + Sync>,
    cache: SyncCache<K, V>,
}

impl<K: Eq + Hash + Clone, V: Clone> SyncMemoizedFunction<K, V> {
    pub fn new(function: impl Fn(&K) -> V + Send + Sync + 'static) -> Self {
        Self {
            function: Box::new(function),
            cache: SyncCache::new(),
        }
    }

    pub fn call(&self, key: K) -> V {
        self.cache.get_or_compute(key, |key| (self.function)(key))
    }

    pub fn is_computed(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }
}

impl<K, V> core::fmt::Debug for SyncMemoizedFunction<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMemoizedFunction").finish_non_exhaustive()
    }
}
