// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::StoreResult;

/// An immutable, content-addressed byte sequence.
///
/// Invariant: `hash == sha256_hex(&data)` and `size == data.len()`. Enforced
/// by construction — [`Blob::new`] is the only way to build one outside this
/// crate's store implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// 64-char lowercase hex SHA-256 of `data`.
    pub hash: String,
    /// The stored bytes.
    pub data: Vec<u8>,
    /// `data.len()`, kept alongside for cheap metadata queries.
    pub size: u64,
    /// UTC timestamp with millisecond precision, set once at insertion.
    pub created_at: OffsetDateTime,
}

impl Blob {
    /// Build a blob record from raw bytes, computing its hash.
    pub fn new(data: Vec<u8>, created_at: OffsetDateTime) -> Self {
        let hash = crate::sha256_hex(&data);
        let size = data.len() as u64;
        Self {
            hash,
            data,
            size,
            created_at,
        }
    }
}

/// A mutable pointer from a human-readable name to a blob hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Non-empty name, the primary key.
    pub name: String,
    /// The blob hash this alias currently points to. Always references an
    /// existing blob.
    pub hash: String,
    /// Set once, on first `setAlias` for this name.
    pub created_at: OffsetDateTime,
    /// Refreshed on every `setAlias` for this name.
    pub updated_at: OffsetDateTime,
}

/// Outcome of [`AliasRegistry::set_alias`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetAliasOutcome {
    /// The alias was written; here is the resulting record.
    Written(Alias),
    /// The target hash does not reference an existing blob. No alias was
    /// created or modified. This is a client-invalid error, not a crash.
    MissingBlob,
}

/// A protocol-level reference to a blob: either an alias name or a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref(pub String);

impl Ref {
    /// Borrow the underlying ref string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Ref {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Ref {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// The result of resolving a [`Ref`] to a blob hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    /// The blob hash the ref resolved to.
    pub hash: String,
    /// Set when the ref resolved via an alias name, carrying that name.
    pub alias: Option<String>,
}

/// Content-addressed byte storage, keyed by lowercase hex SHA-256.
///
/// Insertion is idempotent: inserting bytes whose hash already exists is a
/// no-op that preserves the existing row's `created_at`.
pub trait BlobStore {
    /// Insert `data` if absent; return its hash either way.
    fn put(&self, data: &[u8]) -> StoreResult<String>;
    /// Fetch the bytes for `hash`, if present.
    fn get(&self, hash: &str) -> StoreResult<Option<Vec<u8>>>;
    /// Fetch just the size for `hash`, if present, without reading the bytes.
    fn size(&self, hash: &str) -> StoreResult<Option<u64>>;
    /// Whether a blob with `hash` exists.
    fn has(&self, hash: &str) -> StoreResult<bool>;
}

/// Mutable name → hash mapping, with existence enforcement on write.
pub trait AliasRegistry {
    /// Create or update `name` to point at `hash`. Fails with
    /// [`SetAliasOutcome::MissingBlob`] if no blob with that hash exists;
    /// the registry is unchanged in that case.
    fn set_alias(&self, name: &str, hash: &str) -> StoreResult<SetAliasOutcome>;
    /// Look up an alias by name.
    fn get_alias(&self, name: &str) -> StoreResult<Option<Alias>>;
    /// Remove an alias by name; returns whether a row was actually removed.
    fn delete_alias(&self, name: &str) -> StoreResult<bool>;
    /// All aliases, ordered by name ascending.
    fn list_aliases(&self) -> StoreResult<Vec<Alias>>;

    /// Resolve a ref string to a hash. Aliases take precedence over hashes:
    /// a name that is also a valid blob hash resolves as the alias.
    fn resolve_ref(&self, reference: &Ref) -> StoreResult<Option<ResolvedRef>>
    where
        Self: BlobStore,
    {
        if let Some(alias) = self.get_alias(reference.as_str())? {
            return Ok(Some(ResolvedRef {
                hash: alias.hash,
                alias: Some(alias.name),
            }));
        }
        if self.has(reference.as_str())? {
            return Ok(Some(ResolvedRef {
                hash: reference.as_str().to_owned(),
                alias: None,
            }));
        }
        Ok(None)
    }
}
