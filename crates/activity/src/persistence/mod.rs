//! Persistence layer
//!
//! This module provides:
//! - [`WorkStateStore`] trait for resumable, versioned work-state documents
//! - [`ObjectStore`] trait for generic versioned records
//! - [`InMemoryWorkStateStore`] / [`InMemoryObjectStore`] for tests and single-process runs
//! - [`PostgresWorkStateStore`] for multi-process deployments
//! - [`WorkStateHandle`] for single-writer, conflict-retrying access to one activity path

mod handle;
mod memory;
mod postgres;
mod state;
mod store;

pub use handle::{WorkStateError, WorkStateHandle};
pub use memory::{InMemoryObjectStore, InMemoryWorkStateStore};
pub use postgres::PostgresWorkStateStore;
pub use state::ActivityState;
pub use store::{
    ItemDelta, ObjectStore, Query, Record, StoreError, VersionedDocument, WorkStateStore,
};
