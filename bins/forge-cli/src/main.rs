// SPDX-License-Identifier: Apache-2.0
//! `forge`: administrative CLI for the compile/execute service. A thin
//! wiring layer — all behavior lives in the `forge-*` library crates.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use forge_core::{AliasRegistry, BlobStore, EventKind, EventLog, NewEvent, Ref};
use forge_store::SqliteStore;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Compile and run sandboxed wasm modules", long_about = None)]
struct Args {
    /// Path to a `forge.toml` config file. Defaults to `./forge.toml` if present.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Override the SQLite database path.
    #[clap(long, global = true)]
    db_path: Option<PathBuf>,

    /// Override the compile pipeline's scratch directory root.
    #[clap(long, global = true)]
    scratch_root: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file for the given language.
    Compile {
        language: String,
        source_file: PathBuf,
    },
    /// Execute a stored module by ref (alias or hash), feeding it input.
    Run {
        reference: String,
        /// Read input bytes from this file instead of stdin.
        #[clap(long)]
        input_file: Option<PathBuf>,
    },
    /// Validate a wasm file against the ABI contract without storing it.
    Validate { wasm_file: PathBuf },
    /// Manage aliases.
    Alias {
        #[clap(subcommand)]
        action: AliasAction,
    },
    /// Show the most recent events.
    Events {
        #[clap(long)]
        limit: Option<u32>,
    },
    /// Show aggregate store statistics.
    Stats,
    /// List the languages the compile pipeline recognizes.
    Languages,
    /// Inspect stored blobs.
    Blob {
        #[clap(subcommand)]
        action: BlobAction,
    },
}

#[derive(Subcommand, Debug)]
enum AliasAction {
    /// Point `name` at `hash`.
    Set { name: String, hash: String },
    /// Look up an alias by name.
    Get { name: String },
    /// Remove an alias by name.
    Delete { name: String },
    /// List all aliases.
    List,
}

#[derive(Subcommand, Debug)]
enum BlobAction {
    /// Fetch a blob's bytes by ref, printing them to stdout.
    Get { reference: String },
    /// Report whether a blob exists for ref.
    Has { reference: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let resolved = config::load(args.config.as_deref(), args.db_path, args.scratch_root)?;

    let store = Arc::new(
        SqliteStore::open(&resolved.db_path)
            .with_context(|| format!("opening store at {}", resolved.db_path.display()))?,
    );

    match args.command {
        Command::Compile {
            language,
            source_file,
        } => compile_command(store, &resolved, &language, &source_file).await?,
        Command::Run {
            reference,
            input_file,
        } => run_command(store, &reference, input_file.as_deref())?,
        Command::Validate { wasm_file } => validate_command(&wasm_file)?,
        Command::Alias { action } => alias_command(&store, action)?,
        Command::Events { limit } => events_command(&store, limit)?,
        Command::Stats => stats_command(&store)?,
        Command::Languages => languages_command(&resolved),
        Command::Blob { action } => blob_command(&store, action)?,
    }

    Ok(())
}

async fn compile_command(
    store: Arc<SqliteStore>,
    resolved: &config::ResolvedConfig,
    language: &str,
    source_file: &std::path::Path,
) -> Result<()> {
    let source = std::fs::read(source_file)
        .with_context(|| format!("reading source file {}", source_file.display()))?;

    let config = forge_compile::CompileConfig {
        scratch_root: resolved.scratch_root.clone(),
        language_overrides: resolved.language_overrides.clone(),
        ..forge_compile::CompileConfig::default()
    };

    let outcome = forge_compile::compile(store, &config, language, &source).await?;

    println!("input_hash:  {}", outcome.input_hash);
    println!("output_hash: {}", outcome.output_hash);
    println!("duration_ms: {}", outcome.duration_ms);
    println!("valid:       {}", outcome.validation.valid);
    for error in &outcome.validation.errors {
        println!("error:       {error}");
    }
    for warning in &outcome.validation.warnings {
        println!("warning:     {warning}");
    }
    Ok(())
}

/// Resolve `reference` against the store, recording a `resolve` event when
/// it resolved through an alias (spec.md §4.C: ref resolution is one of the
/// four event-producing exposed surfaces). Shared by every command that
/// takes a ref: `run`, `blob get`, `blob has`.
fn resolve_with_event(
    store: &SqliteStore,
    reference: &str,
) -> Result<Option<forge_core::ResolvedRef>> {
    let resolved = store.resolve_ref(&Ref::from(reference))?;
    if let Some(resolved) = &resolved {
        if let Some(alias) = &resolved.alias {
            store.record(NewEvent {
                alias: Some(alias.clone()),
                output_hash: Some(resolved.hash.clone()),
                ..NewEvent::new(EventKind::Resolve)
            })?;
        }
    }
    Ok(resolved)
}

fn run_command(
    store: Arc<SqliteStore>,
    reference: &str,
    input_file: Option<&std::path::Path>,
) -> Result<()> {
    let resolved = resolve_with_event(&store, reference)?
        .ok_or_else(|| anyhow!("no blob or alias matches ref '{reference}'"))?;

    let module_bytes = store
        .get(&resolved.hash)?
        .ok_or_else(|| anyhow!("resolved hash {} has no stored blob", resolved.hash))?;

    let input = match input_file {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("reading input file {}", path.display()))?,
        None => {
            use std::io::Read;
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let input_hash = store.put(&input)?;

    let harness = forge_exec::ExecutionHarness::new();
    let start = Instant::now();
    let result = harness.execute(&resolved.hash, &module_bytes, &input);
    let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

    match result {
        Ok(output) => {
            let output_hash = store.put(&output)?;
            store.record(NewEvent {
                module_hash: Some(resolved.hash.clone()),
                input_hash: Some(input_hash),
                output_hash: Some(output_hash.clone()),
                output_size: Some(i64::try_from(output.len()).unwrap_or(i64::MAX)),
                duration_ms: Some(duration_ms),
                ..NewEvent::new(EventKind::Execute)
            })?;
            use std::io::Write;
            std::io::stdout().write_all(&output)?;
            info!(%output_hash, "execution complete");
            Ok(())
        }
        Err(err) => {
            store.record(NewEvent {
                module_hash: Some(resolved.hash.clone()),
                input_hash: Some(input_hash),
                duration_ms: Some(duration_ms),
                ..NewEvent::new(EventKind::Execute).failed(err.to_string())
            })?;
            Err(err.into())
        }
    }
}

fn validate_command(wasm_file: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(wasm_file)
        .with_context(|| format!("reading wasm file {}", wasm_file.display()))?;
    let result = forge_wasm_abi::validate(&bytes);
    println!("valid: {}", result.valid);
    for error in &result.errors {
        println!("error:   {error}");
    }
    for warning in &result.warnings {
        println!("warning: {warning}");
    }
    if let Some(sig) = &result.info.run_signature {
        println!("run signature: {sig}");
    }
    Ok(())
}

fn alias_command(store: &SqliteStore, action: AliasAction) -> Result<()> {
    match action {
        AliasAction::Set { name, hash } => match store.set_alias(&name, &hash)? {
            forge_core::SetAliasOutcome::Written(alias) => {
                store.record(NewEvent {
                    alias: Some(alias.name.clone()),
                    output_hash: Some(alias.hash.clone()),
                    ..NewEvent::new(EventKind::Alias)
                })?;
                println!("{} -> {}", alias.name, alias.hash);
                Ok(())
            }
            forge_core::SetAliasOutcome::MissingBlob => {
                Err(anyhow!("no blob exists with hash {hash}"))
            }
        },
        AliasAction::Get { name } => match store.get_alias(&name)? {
            Some(alias) => {
                println!("{} -> {}", alias.name, alias.hash);
                Ok(())
            }
            None => Err(anyhow!("no alias named '{name}'")),
        },
        AliasAction::Delete { name } => {
            if store.delete_alias(&name)? {
                store.record(NewEvent {
                    alias: Some(name.clone()),
                    ..NewEvent::new(EventKind::Alias)
                })?;
                println!("deleted {name}");
            } else {
                println!("no alias named '{name}'");
            }
            Ok(())
        }
        AliasAction::List => {
            for alias in store.list_aliases()? {
                println!("{} -> {}", alias.name, alias.hash);
            }
            Ok(())
        }
    }
}

fn events_command(store: &SqliteStore, limit: Option<u32>) -> Result<()> {
    for event in store.recent(limit)? {
        println!(
            "{} {} {} success={}{}",
            event.id,
            event.timestamp,
            event.kind.as_str(),
            event.success,
            event
                .error
                .map(|e| format!(" error={e}"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

fn stats_command(store: &SqliteStore) -> Result<()> {
    let stats = store.stats()?;
    println!("total_blobs:   {}", stats.total_blobs);
    println!("total_aliases: {}", stats.total_aliases);
    println!("failed_events: {}", stats.failed_events);
    for (kind, count) in stats.events_by_type {
        println!("events[{kind}]: {count}");
    }
    Ok(())
}

fn languages_command(resolved: &config::ResolvedConfig) {
    let mut names: Vec<&str> = forge_compile::builtin_names();
    let mut overridden: Vec<&str> = resolved
        .language_overrides
        .keys()
        .map(String::as_str)
        .collect();
    names.append(&mut overridden);
    names.sort_unstable();
    names.dedup();
    for name in names {
        println!("{name}");
    }
}

fn blob_command(store: &SqliteStore, action: BlobAction) -> Result<()> {
    match action {
        BlobAction::Get { reference } => {
            let resolved = resolve_with_event(store, &reference)?
                .ok_or_else(|| anyhow!("no blob or alias matches ref '{reference}'"))?;
            let bytes = store
                .get(&resolved.hash)?
                .ok_or_else(|| anyhow!("resolved hash {} has no stored blob", resolved.hash))?;
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
            Ok(())
        }
        BlobAction::Has { reference } => {
            match resolve_with_event(store, &reference)? {
                Some(resolved) => println!("true {}", resolved.hash),
                None => println!("false"),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use forge_core::EventLog;

    const ECHO_MODULE: &str = r#"
        (module
            (memory (export "memory") 2)
            (func (export "run") (param $ip i32) (param $il i32) (param $op i32) (result i32)
                (memory.copy (local.get $op) (local.get $ip) (local.get $il))
                (local.get $il))
        )
    "#;

    fn echo_wasm() -> Vec<u8> {
        ::wat::parse_str(ECHO_MODULE).expect("valid wat fixture")
    }

    fn store_with_echo_module() -> (Arc<SqliteStore>, String) {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
        let hash = store.put(&echo_wasm()).expect("put module");
        (store, hash)
    }

    fn events_named(store: &SqliteStore, kind: EventKind) -> Vec<forge_core::Event> {
        store
            .recent(Some(500))
            .expect("recent")
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    #[test]
    fn alias_set_records_an_alias_event() {
        let (store, hash) = store_with_echo_module();
        alias_command(
            &store,
            AliasAction::Set {
                name: "latest".to_string(),
                hash: hash.clone(),
            },
        )
        .expect("set alias");

        let events = events_named(&store, EventKind::Alias);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alias.as_deref(), Some("latest"));
        assert_eq!(events[0].output_hash.as_deref(), Some(hash.as_str()));
        assert!(events[0].success);
    }

    #[test]
    fn alias_delete_records_an_alias_event_only_when_removed() {
        let (store, hash) = store_with_echo_module();
        alias_command(
            &store,
            AliasAction::Set {
                name: "latest".to_string(),
                hash,
            },
        )
        .expect("set alias");

        alias_command(
            &store,
            AliasAction::Delete {
                name: "latest".to_string(),
            },
        )
        .expect("delete alias");
        // Deleting an alias that no longer exists is not an error and must
        // not record a second event.
        alias_command(
            &store,
            AliasAction::Delete {
                name: "latest".to_string(),
            },
        )
        .expect("delete missing alias");

        let events = events_named(&store, EventKind::Alias);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].alias.as_deref(), Some("latest"));
    }

    #[test]
    fn run_command_through_an_alias_records_resolve_before_execute() {
        let (store, hash) = store_with_echo_module();
        alias_command(
            &store,
            AliasAction::Set {
                name: "latest".to_string(),
                hash,
            },
        )
        .expect("set alias");

        let input_file = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(input_file.path(), b"hello").expect("write input");

        run_command(Arc::clone(&store), "latest", Some(input_file.path())).expect("run");

        let resolves = events_named(&store, EventKind::Resolve);
        let executes = events_named(&store, EventKind::Execute);
        assert_eq!(resolves.len(), 1);
        assert_eq!(executes.len(), 1);
        assert!(resolves[0].id < executes[0].id);
        assert_eq!(resolves[0].alias.as_deref(), Some("latest"));
        assert!(executes[0].success);
    }

    #[test]
    fn run_command_by_bare_hash_records_no_resolve_event() {
        let (store, hash) = store_with_echo_module();

        let input_file = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(input_file.path(), b"hi").expect("write input");

        run_command(Arc::clone(&store), &hash, Some(input_file.path())).expect("run");

        assert!(events_named(&store, EventKind::Resolve).is_empty());
        assert_eq!(events_named(&store, EventKind::Execute).len(), 1);
    }

    #[test]
    fn blob_get_through_an_alias_records_a_resolve_event() {
        let (store, hash) = store_with_echo_module();
        alias_command(
            &store,
            AliasAction::Set {
                name: "latest".to_string(),
                hash,
            },
        )
        .expect("set alias");

        blob_command(
            &store,
            BlobAction::Get {
                reference: "latest".to_string(),
            },
        )
        .expect("blob get");

        let resolves = events_named(&store, EventKind::Resolve);
        assert_eq!(resolves.len(), 1);
        assert_eq!(resolves[0].alias.as_deref(), Some("latest"));
    }

    #[test]
    fn blob_has_by_bare_hash_records_no_resolve_event() {
        let (store, hash) = store_with_echo_module();

        blob_command(
            &store,
            BlobAction::Has {
                reference: hash,
            },
        )
        .expect("blob has");

        assert!(events_named(&store, EventKind::Resolve).is_empty());
    }
}
