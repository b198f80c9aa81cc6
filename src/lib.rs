//! Phase orchestration for compiler lowering pipelines: a registry of named
//! phases, managers that enforce their prerequisites across nested scopes,
//! runners that dump and time them, and the memoizing caches used by phase
//! bodies, including per-module type refinement.

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod intern;
pub mod middle;
pub mod phase;
pub mod refinement;
