// SPDX-License-Identifier: Apache-2.0
//! The compile pipeline: `store-source -> make-dir -> write-file -> spawn ->
//! read-output -> store-output -> validate -> record-event -> cleanup`. The
//! only non-linearity is the scratch directory's scoped acquisition, which
//! must release on every exit path — handled here by `tempfile::TempDir`'s
//! `Drop` impl rather than manual cleanup calls.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod registry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use forge_core::{BlobStore, EventKind, EventLog, NewEvent, StoreError};
use forge_wasm_abi::ValidationResult;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

pub use registry::{builtin, builtin_names, LanguageSpec};

/// Wall-clock timeout for a single toolchain invocation.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on captured stdout/stderr per toolchain invocation.
pub const MAX_CAPTURED_OUTPUT: usize = 4 * 1024 * 1024;

/// Tunables and per-deployment overrides for the compile pipeline.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Root directory under which scratch directories are created.
    pub scratch_root: PathBuf,
    /// Per-language overrides layered on top of [`registry::builtin`].
    pub language_overrides: HashMap<String, LanguageSpec>,
    /// Wall-clock timeout for the toolchain subprocess.
    pub timeout: Duration,
    /// Cap on captured stdout/stderr bytes.
    pub max_captured_output: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            language_overrides: HashMap::new(),
            timeout: COMPILE_TIMEOUT,
            max_captured_output: MAX_CAPTURED_OUTPUT,
        }
    }
}

impl CompileConfig {
    fn resolve_language(&self, language: &str) -> Option<LanguageSpec> {
        self.language_overrides
            .get(language)
            .cloned()
            .or_else(|| registry::builtin(language).cloned())
    }
}

/// Everything a successful compile returns to the caller.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    /// The compiled module's bytes.
    pub bytes: Vec<u8>,
    /// Hash of the stored source blob.
    pub input_hash: String,
    /// Hash of the stored module blob.
    pub output_hash: String,
    /// Contract validation result. A non-conformant module does not fail
    /// the compile — it is still returned, with its non-conformance
    /// reported here.
    pub validation: ValidationResult,
    /// Wall-clock duration of the whole pipeline, in milliseconds.
    pub duration_ms: i64,
}

/// Failure modes of [`compile`], matching the taxonomy in the service's
/// error-handling design: unknown language and empty source are
/// client-invalid and never reach an event write; everything else is a
/// compiler failure recorded as a failed `compile` event.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// `language` is not in the registry.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),
    /// The source payload was empty.
    #[error("source is empty")]
    EmptySource,
    /// The scratch directory could not be created or written to.
    #[error("scratch directory error: {0}")]
    Scratch(String),
    /// The toolchain could not be spawned at all.
    #[error("failed to spawn compiler: {0}")]
    Spawn(String),
    /// The toolchain exceeded its wall-clock timeout and was killed.
    #[error("compiler timed out: {1}")]
    Timeout(Duration, String),
    /// The toolchain exited non-zero.
    #[error("compiler failed: {0}")]
    NonZeroExit(String),
    /// The toolchain exited zero but the declared output file is missing.
    #[error("compiler reported success but output file is missing")]
    MissingOutputFile,
    /// The storage layer failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CompileError {
    /// The message recorded in the event log's `error` column, when this
    /// error represents a compiler failure (as opposed to a client-invalid
    /// rejection that never reaches the event log).
    fn event_message(&self) -> String {
        self.to_string()
    }
}

/// Run `store.put`/`store.record` on a blocking thread, since the store
/// traits are synchronous (backed by SQLite) and must not block the async
/// runtime.
async fn blocking<S, T, F>(store: Arc<S>, f: F) -> Result<T, CompileError>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| CompileError::Storage(StoreError::Backend(e.to_string())))?
        .map_err(CompileError::from)
}

/// Compile `source` for `language`, storing both source and module bytes,
/// validating the module, and recording exactly one `compile` event
/// regardless of outcome (except for the client-invalid rejections listed
/// on [`CompileError`], which precede any event write).
pub async fn compile<S>(
    store: Arc<S>,
    config: &CompileConfig,
    language: &str,
    source: &[u8],
) -> Result<CompileOutcome, CompileError>
where
    S: BlobStore + EventLog + Send + Sync + 'static,
{
    let spec = config
        .resolve_language(language)
        .ok_or_else(|| CompileError::UnknownLanguage(language.to_string()))?;
    if source.is_empty() {
        return Err(CompileError::EmptySource);
    }

    let input_hash = {
        let source = source.to_vec();
        blocking(Arc::clone(&store), move |s| s.put(&source)).await?
    };

    let start = Instant::now();
    let result = run_toolchain(config, &spec, source).await;
    let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

    match result {
        Ok(module_bytes) => {
            let output_hash = {
                let bytes = module_bytes.clone();
                blocking(Arc::clone(&store), move |s| s.put(&bytes)).await?
            };
            let validation = forge_wasm_abi::validate(&module_bytes);
            let event = NewEvent {
                language: Some(language.to_string()),
                input_hash: Some(input_hash.clone()),
                output_hash: Some(output_hash.clone()),
                output_size: Some(module_bytes.len() as i64),
                duration_ms: Some(duration_ms),
                ..NewEvent::new(EventKind::Compile)
            };
            blocking(store, move |s| s.record(event).map(|_| ())).await?;
            Ok(CompileOutcome {
                bytes: module_bytes,
                input_hash,
                output_hash,
                validation,
                duration_ms,
            })
        }
        Err(err) => {
            let event = NewEvent {
                language: Some(language.to_string()),
                input_hash: Some(input_hash.clone()),
                duration_ms: Some(duration_ms),
                ..NewEvent::new(EventKind::Compile).failed(err.event_message())
            };
            blocking(store, move |s| s.record(event).map(|_| ())).await?;
            Err(err)
        }
    }
}

async fn run_toolchain(
    config: &CompileConfig,
    spec: &LanguageSpec,
    source: &[u8],
) -> Result<Vec<u8>, CompileError> {
    let scratch = tempfile::Builder::new()
        .prefix("forge-compile-")
        .tempdir_in(&config.scratch_root)
        .map_err(|e| CompileError::Scratch(e.to_string()))?;

    let input_path = scratch.path().join(&spec.input_file);
    tokio::fs::write(&input_path, source)
        .await
        .map_err(|e| CompileError::Scratch(e.to_string()))?;

    let mut command = Command::new(&spec.executable);
    command
        .args(&spec.argv)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if spec.cwd_required {
        command.current_dir(scratch.path());
    }

    let mut child = command
        .spawn()
        .map_err(|e| CompileError::Spawn(e.to_string()))?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        CompileError::Spawn("child process did not inherit a stdout pipe".to_string())
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        CompileError::Spawn("child process did not inherit a stderr pipe".to_string())
    })?;

    let max = config.max_captured_output;
    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_take = AsyncReadExt::take(&mut stdout_pipe, max as u64);
        let mut stderr_take = AsyncReadExt::take(&mut stderr_pipe, max as u64);
        let (stdout_res, stderr_res, status_res) = tokio::join!(
            stdout_take.read_to_end(&mut stdout),
            stderr_take.read_to_end(&mut stderr),
            child.wait(),
        );
        stdout_res.map_err(|e| CompileError::Spawn(e.to_string()))?;
        stderr_res.map_err(|e| CompileError::Spawn(e.to_string()))?;
        let status = status_res.map_err(|e| CompileError::Spawn(e.to_string()))?;
        Ok::<_, CompileError>((status, stdout, stderr))
    };

    let (status, stdout, stderr) = match tokio::time::timeout(config.timeout, run).await {
        Ok(res) => res?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(CompileError::Timeout(
                config.timeout,
                format!("compiler did not finish within {:?}", config.timeout),
            ));
        }
    };

    if !status.success() {
        let message = first_non_empty(&[&stderr, &stdout])
            .unwrap_or_else(|| format!("compiler exited with status {status}"));
        warn!(executable = %spec.executable, %message, "toolchain invocation failed");
        return Err(CompileError::NonZeroExit(message));
    }

    let output_path = scratch.path().join(&spec.output_file);
    match tokio::fs::read(&output_path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CompileError::MissingOutputFile),
        Err(e) => Err(CompileError::Scratch(e.to_string())),
    }
    // `scratch` (the TempDir guard) is dropped here on every path above,
    // deleting the scratch directory; any removal error is swallowed by
    // `tempfile`'s `Drop` impl, matching the cleanup discipline in the
    // design.
}

fn first_non_empty(candidates: &[&[u8]]) -> Option<String> {
    candidates
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .find(|s| !s.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use forge_store::SqliteStore;

    fn fixture_config(scratch: &std::path::Path, script: &std::path::Path) -> CompileConfig {
        let mut overrides = HashMap::new();
        overrides.insert(
            "stub".to_string(),
            LanguageSpec {
                input_file: "input.txt".to_string(),
                output_file: "output.wasm".to_string(),
                executable: script.to_string_lossy().to_string(),
                argv: vec![],
                cwd_required: true,
            },
        );
        CompileConfig {
            scratch_root: scratch.to_path_buf(),
            language_overrides: overrides,
            timeout: Duration::from_secs(5),
            max_captured_output: MAX_CAPTURED_OUTPUT,
        }
    }

    fn write_stub_script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("stub.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
        }
        path
    }

    #[tokio::test]
    async fn unknown_language_is_rejected_before_any_work() {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
        let config = CompileConfig::default();
        let err = compile(store, &config, "cobol", b"PROGRAM-ID. X.")
            .await
            .expect_err("expected rejection");
        assert!(matches!(err, CompileError::UnknownLanguage(lang) if lang == "cobol"));
    }

    #[tokio::test]
    async fn empty_source_is_rejected_before_any_work() {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
        let config = CompileConfig::default();
        let err = compile(store, &config, "assemblyscript", b"")
            .await
            .expect_err("expected rejection");
        assert!(matches!(err, CompileError::EmptySource));
    }

    #[tokio::test]
    async fn successful_compile_stores_blobs_and_records_an_event() {
        let scratch = tempfile::tempdir().expect("scratch root");
        let script = write_stub_script(scratch.path(), "cp input.txt output.wasm");
        let config = fixture_config(scratch.path(), &script);
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));

        let outcome = compile(Arc::clone(&store), &config, "stub", b"fake module bytes")
            .await
            .expect("compile should succeed");

        assert_eq!(outcome.bytes, b"fake module bytes");
        assert_eq!(outcome.input_hash, forge_core::sha256_hex(b"fake module bytes"));
        assert!(!outcome.validation.valid); // not a real wasm module

        let events = store.recent(Some(1)).expect("recent");
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
        assert_eq!(events[0].language.as_deref(), Some("stub"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_recorded_as_a_failed_event_with_stderr() {
        let scratch = tempfile::tempdir().expect("scratch root");
        let script = write_stub_script(scratch.path(), "echo 'syntax error: bad token' >&2\nexit 1");
        let config = fixture_config(scratch.path(), &script);
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));

        let err = compile(Arc::clone(&store), &config, "stub", b"broken source")
            .await
            .expect_err("compile should fail");
        assert!(matches!(err, CompileError::NonZeroExit(ref msg) if msg.contains("syntax error")));

        let events = store.recent(Some(1)).expect("recent");
        assert!(!events[0].success);
        assert!(events[0].error.as_deref().unwrap_or_default().contains("syntax error"));
        assert!(events[0].duration_ms.unwrap_or(0) >= 0);
        assert!(events[0].output_hash.is_none());
    }

    #[tokio::test]
    async fn missing_output_file_is_a_compiler_failure() {
        let scratch = tempfile::tempdir().expect("scratch root");
        let script = write_stub_script(scratch.path(), "true");
        let config = fixture_config(scratch.path(), &script);
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));

        let err = compile(store, &config, "stub", b"source")
            .await
            .expect_err("compile should fail");
        assert!(matches!(err, CompileError::MissingOutputFile));
    }
}
