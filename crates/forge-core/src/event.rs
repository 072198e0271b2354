// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::StoreResult;

/// The kind of logical operation an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A `compile(language, source)` invocation.
    Compile,
    /// An `execute(moduleHash, input)` invocation.
    Execute,
    /// A ref resolved through the alias registry.
    Resolve,
    /// An alias was created, updated, or deleted.
    Alias,
}

impl EventKind {
    /// The string stored in `events.type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Execute => "execute",
            Self::Resolve => "resolve",
            Self::Alias => "alias",
        }
    }
}

/// A durable, append-only record of one logical operation.
///
/// Written exactly once per operation, on both the success and failure
/// paths. `output_hash` is overloaded for `alias` events to mean "the hash
/// the alias now points to" — this is deliberate, preserved for log-format
/// compatibility rather than split into a cleaner schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically increasing, assigned by the store on insert.
    pub id: i64,
    /// When the event was committed.
    pub timestamp: OffsetDateTime,
    /// Which operation this event records.
    pub kind: EventKind,
    /// Source language, set only on `compile` events.
    pub language: Option<String>,
    /// Hash of the input blob (source text for compile, input bytes for
    /// execute), when applicable.
    pub input_hash: Option<String>,
    /// See struct docs: overloaded for `alias` events.
    pub output_hash: Option<String>,
    /// Hash of the module involved, for `execute`/`resolve` events.
    pub module_hash: Option<String>,
    /// Alias name involved, for `resolve`/`alias` events.
    pub alias: Option<String>,
    /// Size in bytes of the produced output, when applicable.
    pub output_size: Option<i64>,
    /// Wall-clock duration of the operation in milliseconds.
    pub duration_ms: Option<i64>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Free-text error detail (typically the first portion of stderr) on
    /// failure.
    pub error: Option<String>,
}

/// Fields supplied by a caller recording a new event; `id` and `timestamp`
/// are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    /// Which operation this event records.
    pub kind: Option<EventKind>,
    /// Source language, for `compile` events.
    pub language: Option<String>,
    /// Input blob hash, when applicable.
    pub input_hash: Option<String>,
    /// Output hash (or alias target hash, for `alias` events).
    pub output_hash: Option<String>,
    /// Module hash, for `execute`/`resolve` events.
    pub module_hash: Option<String>,
    /// Alias name, for `resolve`/`alias` events.
    pub alias: Option<String>,
    /// Output size in bytes.
    pub output_size: Option<i64>,
    /// Duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error detail on failure.
    pub error: Option<String>,
}

impl NewEvent {
    /// Start building a new event of the given kind, defaulting to success.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            success: true,
            ..Self::default()
        }
    }

    /// Mark the event as a failure with the given error detail.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only sequence of [`Event`] records.
pub trait EventLog {
    /// Insert a single event, returning the full stored record (with its
    /// assigned `id` and `timestamp`).
    fn record(&self, event: NewEvent) -> StoreResult<Event>;

    /// The most recent events, newest first. `limit` is clamped to at most
    /// 500; a `limit` of 0 or unset defaults to 50.
    fn recent(&self, limit: Option<u32>) -> StoreResult<Vec<Event>>;
}

/// Upper bound on `recent`'s `limit` parameter.
pub const MAX_RECENT_LIMIT: u32 = 500;
/// Default `recent` limit when none is supplied.
pub const DEFAULT_RECENT_LIMIT: u32 = 50;

/// Clamp a requested `recent` limit to `[1, MAX_RECENT_LIMIT]`, substituting
/// [`DEFAULT_RECENT_LIMIT`] when unset.
pub fn clamp_recent_limit(limit: Option<u32>) -> u32 {
    match limit {
        None | Some(0) => DEFAULT_RECENT_LIMIT,
        Some(n) => n.min(MAX_RECENT_LIMIT),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn clamp_defaults_to_fifty() {
        assert_eq!(clamp_recent_limit(None), 50);
        assert_eq!(clamp_recent_limit(Some(0)), 50);
    }

    #[test]
    fn clamp_caps_at_five_hundred() {
        assert_eq!(clamp_recent_limit(Some(10_000)), 500);
        assert_eq!(clamp_recent_limit(Some(500)), 500);
        assert_eq!(clamp_recent_limit(Some(1)), 1);
    }
}
