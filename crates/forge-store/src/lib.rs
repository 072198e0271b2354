// SPDX-License-Identifier: Apache-2.0
//! SQLite-backed implementation of the `forge-core` store traits.
//!
//! A single [`SqliteStore`] owns one connection behind a [`std::sync::Mutex`],
//! matching the spec's requirement that writes to the shared blob/alias/event
//! state be serialized. Callers on an async runtime should invoke these
//! (synchronous) methods via `tokio::task::spawn_blocking`.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod timefmt;

use std::path::Path;
use std::sync::Mutex;

use forge_core::{
    Alias, AliasRegistry, Blob, BlobStore, Event, EventKind, EventLog, NewEvent, SetAliasOutcome,
    StoreError, StoreResult, clamp_recent_limit,
};
use rusqlite::{Connection, OptionalExtension, params};

const SCHEMA: &str = include_str!("schema.sql");

/// A SQLite-backed store implementing [`BlobStore`], [`AliasRegistry`], and
/// [`EventLog`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if absent) a database file at `path`, applying the
    /// embedded schema idempotently.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(backend_err)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database. Useful for tests and short-lived CLI
    /// invocations that don't need persistence.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA).map_err(backend_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("store connection mutex poisoned".into()))
    }
}

fn backend_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl BlobStore for SqliteStore {
    fn put(&self, data: &[u8]) -> StoreResult<String> {
        let hash = forge_core::sha256_hex(data);
        let conn = self.lock()?;
        let now = timefmt::format_now();
        conn.execute(
            "INSERT INTO blobs (hash, data, size, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hash) DO NOTHING",
            params![hash, data, data.len() as i64, now],
        )
        .map_err(backend_err)?;
        Ok(hash)
    }

    fn get(&self, hash: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row("SELECT data FROM blobs WHERE hash = ?1", [hash], |row| {
            row.get::<_, Vec<u8>>(0)
        })
        .optional()
        .map_err(backend_err)
    }

    fn size(&self, hash: &str) -> StoreResult<Option<u64>> {
        let conn = self.lock()?;
        conn.query_row("SELECT size FROM blobs WHERE hash = ?1", [hash], |row| {
            row.get::<_, i64>(0)
        })
        .optional()
        .map_err(backend_err)
        .map(|opt| opt.map(|n| n.max(0) as u64))
    }

    fn has(&self, hash: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT 1 FROM blobs WHERE hash = ?1",
            [hash],
            |_| Ok(()),
        )
        .optional()
        .map_err(backend_err)
        .map(|opt| opt.is_some())
    }
}

impl SqliteStore {
    /// Fetch a full [`Blob`] record (including `created_at`), if present.
    pub fn get_blob(&self, hash: &str) -> StoreResult<Option<Blob>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT hash, data, size, created_at FROM blobs WHERE hash = ?1",
            [hash],
            |row| {
                Ok(Blob {
                    hash: row.get(0)?,
                    data: row.get(1)?,
                    size: row.get::<_, i64>(2)?.max(0) as u64,
                    created_at: timefmt::parse(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(backend_err)
    }

    /// Aggregate counts for the administrative `stats` surface: total blobs,
    /// total aliases, and event counts grouped by type and success.
    pub fn stats(&self) -> StoreResult<Stats> {
        let conn = self.lock()?;
        let blobs: i64 = conn
            .query_row("SELECT COUNT(*) FROM blobs", [], |r| r.get(0))
            .map_err(backend_err)?;
        let aliases: i64 = conn
            .query_row("SELECT COUNT(*) FROM aliases", [], |r| r.get(0))
            .map_err(backend_err)?;
        let mut by_type = Vec::new();
        let mut stmt = conn
            .prepare("SELECT type, COUNT(*) FROM events GROUP BY type ORDER BY type")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(backend_err)?;
        for row in rows {
            by_type.push(row.map_err(backend_err)?);
        }
        let failures: i64 = conn
            .query_row("SELECT COUNT(*) FROM events WHERE success = 0", [], |r| {
                r.get(0)
            })
            .map_err(backend_err)?;
        Ok(Stats {
            total_blobs: blobs.max(0) as u64,
            total_aliases: aliases.max(0) as u64,
            events_by_type: by_type,
            failed_events: failures.max(0) as u64,
        })
    }
}

/// Aggregate counts returned by [`SqliteStore::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Total number of distinct blobs stored.
    pub total_blobs: u64,
    /// Total number of aliases currently registered.
    pub total_aliases: u64,
    /// `(event type, count)` pairs.
    pub events_by_type: Vec<(String, i64)>,
    /// Number of events recorded with `success = false`.
    pub failed_events: u64,
}

impl AliasRegistry for SqliteStore {
    fn set_alias(&self, name: &str, hash: &str) -> StoreResult<SetAliasOutcome> {
        let conn = self.lock()?;
        let exists: bool = conn
            .query_row("SELECT 1 FROM blobs WHERE hash = ?1", [hash], |_| Ok(()))
            .optional()
            .map_err(backend_err)?
            .is_some();
        if !exists {
            return Ok(SetAliasOutcome::MissingBlob);
        }

        let now = timefmt::format_now();
        let existing_created_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM aliases WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)?;

        let created_at = existing_created_at.unwrap_or_else(|| now.clone());
        conn.execute(
            "INSERT INTO aliases (name, hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET hash = excluded.hash, updated_at = excluded.updated_at",
            params![name, hash, created_at, now],
        )
        .map_err(backend_err)?;

        Ok(SetAliasOutcome::Written(Alias {
            name: name.to_owned(),
            hash: hash.to_owned(),
            created_at: timefmt::parse(&created_at),
            updated_at: timefmt::parse(&now),
        }))
    }

    fn get_alias(&self, name: &str) -> StoreResult<Option<Alias>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT name, hash, created_at, updated_at FROM aliases WHERE name = ?1",
            [name],
            |row| {
                Ok(Alias {
                    name: row.get(0)?,
                    hash: row.get(1)?,
                    created_at: timefmt::parse(&row.get::<_, String>(2)?),
                    updated_at: timefmt::parse(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(backend_err)
    }

    fn delete_alias(&self, name: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM aliases WHERE name = ?1", [name])
            .map_err(backend_err)?;
        Ok(affected > 0)
    }

    fn list_aliases(&self) -> StoreResult<Vec<Alias>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name, hash, created_at, updated_at FROM aliases ORDER BY name ASC")
            .map_err(backend_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Alias {
                    name: row.get(0)?,
                    hash: row.get(1)?,
                    created_at: timefmt::parse(&row.get::<_, String>(2)?),
                    updated_at: timefmt::parse(&row.get::<_, String>(3)?),
                })
            })
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(backend_err)?);
        }
        Ok(out)
    }
}

impl EventLog for SqliteStore {
    fn record(&self, event: NewEvent) -> StoreResult<Event> {
        let conn = self.lock()?;
        let kind = event.kind.unwrap_or(EventKind::Compile);
        let now = timefmt::format_now();
        conn.execute(
            "INSERT INTO events
                (timestamp, type, language, input_hash, output_hash, module_hash, alias,
                 output_size, duration_ms, success, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                now,
                kind.as_str(),
                event.language,
                event.input_hash,
                event.output_hash,
                event.module_hash,
                event.alias,
                event.output_size,
                event.duration_ms,
                i64::from(event.success),
                event.error,
            ],
        )
        .map_err(backend_err)?;
        let id = conn.last_insert_rowid();
        Ok(Event {
            id,
            timestamp: timefmt::parse(&now),
            kind,
            language: event.language,
            input_hash: event.input_hash,
            output_hash: event.output_hash,
            module_hash: event.module_hash,
            alias: event.alias,
            output_size: event.output_size,
            duration_ms: event.duration_ms,
            success: event.success,
            error: event.error,
        })
    }

    fn recent(&self, limit: Option<u32>) -> StoreResult<Vec<Event>> {
        let limit = clamp_recent_limit(limit);
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, type, language, input_hash, output_hash, module_hash,
                        alias, output_size, duration_ms, success, error
                 FROM events ORDER BY id DESC LIMIT ?1",
            )
            .map_err(backend_err)?;
        let rows = stmt
            .query_map([limit], |row| {
                let type_str: String = row.get(2)?;
                let kind = parse_event_kind(&type_str);
                Ok(Event {
                    id: row.get(0)?,
                    timestamp: timefmt::parse(&row.get::<_, String>(1)?),
                    kind,
                    language: row.get(3)?,
                    input_hash: row.get(4)?,
                    output_hash: row.get(5)?,
                    module_hash: row.get(6)?,
                    alias: row.get(7)?,
                    output_size: row.get(8)?,
                    duration_ms: row.get(9)?,
                    success: row.get::<_, i64>(10)? != 0,
                    error: row.get(11)?,
                })
            })
            .map_err(backend_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(backend_err)?);
        }
        Ok(out)
    }
}

fn parse_event_kind(value: &str) -> EventKind {
    match value {
        "execute" => EventKind::Execute,
        "resolve" => EventKind::Resolve,
        "alias" => EventKind::Alias,
        _ => EventKind::Compile,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_and_preserves_created_at() {
        let store = SqliteStore::open_in_memory().expect("open");
        let h1 = store.put(b"hello").expect("put");
        let first = store.get_blob(&h1).expect("get").expect("present");
        let h2 = store.put(b"hello").expect("put again");
        assert_eq!(h1, h2);
        let second = store.get_blob(&h2).expect("get").expect("present");
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn get_round_trips_arbitrary_bytes() {
        let store = SqliteStore::open_in_memory().expect("open");
        for payload in [&b""[..], b"x", b"\x00\x01\x02binary"] {
            let hash = store.put(payload).expect("put");
            assert_eq!(store.get(&hash).expect("get"), Some(payload.to_vec()));
            assert_eq!(hash, forge_core::sha256_hex(payload));
        }
    }

    #[test]
    fn set_alias_rejects_missing_blob() {
        let store = SqliteStore::open_in_memory().expect("open");
        let outcome = store
            .set_alias("foo", &"0".repeat(64))
            .expect("set_alias call");
        assert_eq!(outcome, SetAliasOutcome::MissingBlob);
        assert!(store.get_alias("foo").expect("get_alias").is_none());
    }

    #[test]
    fn set_alias_preserves_created_at_across_updates() {
        let store = SqliteStore::open_in_memory().expect("open");
        let h1 = store.put(b"one").expect("put");
        let h2 = store.put(b"two").expect("put");

        let first = match store.set_alias("m", &h1).expect("set_alias") {
            SetAliasOutcome::Written(a) => a,
            SetAliasOutcome::MissingBlob => panic!("unexpected missing blob"),
        };
        assert_eq!(first.created_at, first.updated_at);

        let second = match store.set_alias("m", &h2).expect("set_alias") {
            SetAliasOutcome::Written(a) => a,
            SetAliasOutcome::MissingBlob => panic!("unexpected missing blob"),
        };
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.hash, h2);
    }

    #[test]
    fn delete_alias_reports_whether_a_row_was_removed() {
        let store = SqliteStore::open_in_memory().expect("open");
        let h1 = store.put(b"one").expect("put");
        store.set_alias("m", &h1).expect("set_alias");
        assert!(store.delete_alias("m").expect("delete"));
        assert!(!store.delete_alias("m").expect("delete again"));
    }

    #[test]
    fn resolve_ref_prefers_alias_over_identically_named_hash() {
        let store = SqliteStore::open_in_memory().expect("open");
        let h1 = store.put(b"one").expect("put");
        let h2 = store.put(b"two").expect("put");
        // Alias named exactly like another blob's hash.
        store.set_alias(&h2, &h1).expect("set_alias");

        let resolved = store
            .resolve_ref(&forge_core::Ref::from(h2.as_str()))
            .expect("resolve")
            .expect("some");
        assert_eq!(resolved.hash, h1);
        assert_eq!(resolved.alias.as_deref(), Some(h2.as_str()));
    }

    #[test]
    fn recent_orders_descending_and_clamps_limit() {
        let store = SqliteStore::open_in_memory().expect("open");
        for _ in 0..5 {
            store
                .record(NewEvent::new(EventKind::Compile))
                .expect("record");
        }
        let events = store.recent(Some(2)).expect("recent");
        assert_eq!(events.len(), 2);
        assert!(events[0].id > events[1].id);

        let events = store.recent(Some(10_000)).expect("recent huge");
        assert_eq!(events.len(), 5);
    }
}
