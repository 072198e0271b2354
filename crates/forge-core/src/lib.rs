// SPDX-License-Identifier: Apache-2.0
//! Data model and store traits for the wasm-forge compile/execute service.
//!
//! This crate is pure domain logic: it knows nothing about SQLite, subprocesses,
//! or wasm. [`forge-store`](https://docs.rs/forge-store) provides the persistence
//! backing the traits defined here.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod event;
mod hash;
mod model;

pub use event::{
    clamp_recent_limit, Event, EventKind, EventLog, NewEvent, DEFAULT_RECENT_LIMIT,
    MAX_RECENT_LIMIT,
};
pub use hash::sha256_hex;
pub use model::{Alias, AliasRegistry, Blob, BlobStore, Ref, ResolvedRef, SetAliasOutcome};

/// Error type shared by the store trait methods.
///
/// Concrete stores (e.g. `forge-store`'s SQLite implementation) map their own
/// error types into this one at the trait boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage engine failed. Fatal for the current request
    /// per the core's error-handling design: no retry happens inside this
    /// crate.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Marker trait uniting the store capabilities a long-lived service instance
/// needs, so downstream crates can write `S: Store` instead of repeating the
/// three supertrait bounds everywhere.
pub trait Store: BlobStore + AliasRegistry + EventLog + Send + Sync {}

impl<T: BlobStore + AliasRegistry + EventLog + Send + Sync> Store for T {}
