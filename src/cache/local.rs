use std::{cell::RefCell, hash::Hash};

use hashbrown::HashMap;
use tracing::trace;

/// Single threaded compute-if-absent cache.
///
/// The table is not borrowed while a factory runs, so factories may consult
/// the same cache for other keys.
#[derive(Debug)]
pub struct LocalCache<K, V> {
    entries: RefCell<HashMap<K, V>>,
}

impl<K, V> Default for LocalCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> LocalCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn get_or_compute(&self, key: K, factory: impl FnOnce(&K) -> V) -> V {
        if let Some(value) = self.get(&key) {
            trace!("local cache hit");
            return value;
        }

        let value = factory(&key);
        self.insert_first(key, value)
    }

    /// Like [`Self::get_or_compute`] but an error from `factory` is returned
    /// as-is and nothing is cached for `key`.
    pub fn try_get_or_compute<E>(
        &self,
        key: K,
        factory: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = factory(&key)?;
        Ok(self.insert_first(key, value))
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
        self.entries.borrow_mut().clear();
    }

    // A reentrant factory may already have stored a value for this key, in
    // which case that value is kept.
    fn insert_first(&self, key: K, value: V) -> V {
        self.entries
            .borrow_mut()
            .entry(key)
            .or_insert(value)
            .clone()
    }
}

/// A function whose results are retained per argument.
pub struct MemoizedFunction<K, V, F> {
    function: F,
    cache: LocalCache<K, V>,
}

impl<K, V, F> MemoizedFunction<K, V, F>
where
    K: Eq + Hash,
    V: Clone,
    F: Fn(&K) -> V,
{
    pub fn new(function: F) -> Self {
        Self {
            function,
            cache: LocalCache::new(),
        }
    }

    pub fn call(&self, key: K) -> V {
        self.cache.get_or_compute(key, &self.function)
    }

    pub fn is_computed(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }
}

impl<K, V, F> core::fmt::Debug for MemoizedFunction<K, V, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizedFunction").finish_non_exhaustive()
    }
}
