//! Memoization primitives.
//!
//! Two flavors exist in both a single threaded and a thread safe form:
//!
//!   1) compute-if-absent caches ([`LocalCache`], [`SyncCache`]) where the
//!      caller supplies the factory on every lookup
//!   2) memoized functions ([`MemoizedFunction`], [`SyncMemoizedFunction`])
//!      which own the function they memoize
//!
//! In every case a value is computed at most once per key and the first
//! computed value wins. Factories that fail or produce nothing leave the key
//! unresolved, so a later lookup will try again.
//!
//! The local flavor is meant for bookkeeping scoped to one sequential
//! pipeline run. The sync flavor is shared between threads and locks per key
//! while a value is being created, so lookups of different keys never wait on
//! each other's factories.

mod local;
mod session;
mod sync;

pub use local::{LocalCache, MemoizedFunction};
pub use session::SessionTable;
pub use sync::{SyncCache, SyncMemoizedFunction};
