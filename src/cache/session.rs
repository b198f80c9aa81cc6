use std::{hash::Hash, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use super::SyncCache;
use crate::error::{PipelineError, Result};

/// Process-wide table of per-key sessions (one per module, project, ...).
///
/// A table is opened explicitly when the owning project is opened and torn
/// down with [`SessionTable::close`]. Sessions are created on first access
/// under a per-key lock, so concurrent first lookups of the same key share a
/// single session. Once closed every lookup fails.
#[derive(Debug)]
pub struct SessionTable<K, S> {
    sessions: RwLock<Option<SyncCache<K, Arc<S>>>>,
}

impl<K: Eq + Hash + Clone, S> SessionTable<K, S> {
    pub fn open() -> Self {
        Self {
            sessions: RwLock::new(Some(SyncCache::new())),
        }
    }

    pub fn is_open(&self) -> bool {
        self.sessions.read().is_some()
    }

    pub fn get(&self, key: &K) -> Result<Option<Arc<S>>> {
        let sessions = self.sessions.read_recursive();
        let sessions = sessions.as_ref().ok_or(PipelineError::SessionTableClosed)?;

        Ok(sessions.get(key))
    }

    pub fn get_or_create(&self, key: K, factory: impl FnOnce(&K) -> S) -> Result<Arc<S>> {
        // Recursive so a factory may open sessions for other keys even while
        // `close` is waiting for the write lock.
        let sessions = self.sessions.read_recursive();
        let sessions = sessions.as_ref().ok_or(PipelineError::SessionTableClosed)?;

        Ok(sessions.get_or_compute(key, |key| Arc::new(factory(key))))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().as_ref().map_or(0, SyncCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every session. Sessions still referenced elsewhere live on until
    /// their last handle is dropped.
    pub fn close(&self) {
        if let Some(sessions) = self.sessions.write().take() {
            debug!(sessions = sessions.len(), "closing session table");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_sessions_are_created_once_per_key() {
        let table: SessionTable<&str, Vec<u8>> = SessionTable::open();
        let created = AtomicUsize::new(0);

        let a = table
            .get_or_create("core", |_| {
                created.fetch_add(1, Ordering::SeqCst);
                vec![1]
            })
            .unwrap();
        let b = table.get_or_create("core", |_| vec![2]).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_closed_table_rejects_lookups() {
        let table: SessionTable<u32, String> = SessionTable::open();
        let session = table.get_or_create(1, |id| format!("session {id}")).unwrap();

        table.close();

        assert!(!table.is_open());
        assert!(table.is_empty());
        assert!(matches!(
            table.get_or_create(1, |_| String::new()),
            Err(PipelineError::SessionTableClosed)
        ));
        assert!(matches!(table.get(&1), Err(PipelineError::SessionTableClosed)));
        assert_eq!(*session, "session 1");
    }
}
