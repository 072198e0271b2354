// SPDX-License-Identifier: Apache-2.0
//! The execution harness: instantiate a wasm module fresh for every call,
//! grow its memory to the ABI's minimum, copy input bytes in, invoke `run`,
//! and copy output bytes back out. No state is carried between invocations
//! and the guest is given zero host imports — the contract has zero import
//! requirements.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;
use wasmtime::{Engine, Instance, Linker, Module, Store};

/// Byte offset where input is copied into linear memory.
pub const INPUT_PTR: u32 = 0;
/// Byte offset where the guest is expected to write its output.
pub const OUTPUT_PTR: u32 = 65536;
/// Maximum number of output bytes the harness will read back.
pub const MAX_OUTPUT: u32 = 65536;
const WASM_PAGE_SIZE: u64 = 65536;

/// Failure modes of [`ExecutionHarness::execute`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The module bytes failed to compile.
    #[error("failed to compile module: {0}")]
    Compile(String),
    /// The module failed to instantiate (e.g. it declares imports, which the
    /// contract forbids).
    #[error("failed to instantiate module: {0}")]
    Instantiate(String),
    /// A required export was absent.
    #[error("Module does not export '{0}'")]
    MissingExport(&'static str),
    /// Growing linear memory to the ABI minimum failed.
    #[error("failed to grow memory to the required minimum: {0}")]
    GrowthFailed(String),
    /// Writing input bytes into linear memory failed (out of bounds).
    #[error("failed to write input into linear memory: {0}")]
    MemoryWrite(String),
    /// A wasm trap occurred during `_initialize` or `run`.
    #[error("wasm trap: {0}")]
    Trap(String),
    /// `run` reported an output length exceeding [`MAX_OUTPUT`].
    #[error("output length {0} exceeds the maximum of {MAX_OUTPUT} bytes")]
    OutputTooLarge(u32),
}

/// Owns the shared `wasmtime::Engine` and an immutable compiled-module
/// cache keyed by content hash; every [`execute`](Self::execute) call still
/// creates a fresh `Store`/`Instance` so invocations never share state.
pub struct ExecutionHarness {
    engine: Engine,
    module_cache: Mutex<HashMap<String, Module>>,
}

impl Default for ExecutionHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionHarness {
    /// Build a harness with a default `wasmtime` configuration: fuel
    /// metering disabled (the timeout model here is process-level, not
    /// fuel-level) and no guest imports registered anywhere.
    pub fn new() -> Self {
        Self {
            engine: Engine::default(),
            module_cache: Mutex::new(HashMap::new()),
        }
    }

    fn compiled_module(&self, module_hash: &str, module_bytes: &[u8]) -> Result<Module, ExecError> {
        if let Ok(cache) = self.module_cache.lock() {
            if let Some(module) = cache.get(module_hash) {
                return Ok(module.clone());
            }
        }
        let module = Module::new(&self.engine, module_bytes)
            .map_err(|e| ExecError::Compile(e.to_string()))?;
        if let Ok(mut cache) = self.module_cache.lock() {
            cache.insert(module_hash.to_string(), module.clone());
        }
        Ok(module)
    }

    /// Instantiate the module named by `module_hash` (its bytes are
    /// `module_bytes`), feed it `input` through the fixed ABI, and return
    /// its output bytes.
    pub fn execute(
        &self,
        module_hash: &str,
        module_bytes: &[u8],
        input: &[u8],
    ) -> Result<Vec<u8>, ExecError> {
        let module = self.compiled_module(module_hash, module_bytes)?;

        let mut store = Store::new(&self.engine, ());
        // The contract has zero import requirements; an empty linker means
        // instantiation fails loudly if the module declares any.
        let linker: Linker<()> = Linker::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| ExecError::Instantiate(e.to_string()))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(ExecError::MissingExport("memory"))?;

        ensure_minimum_pages(&mut store, &memory)?;

        memory
            .write(&mut store, INPUT_PTR as usize, input)
            .map_err(|e| ExecError::MemoryWrite(e.to_string()))?;

        call_initialize_if_present(&mut store, &instance)?;

        let run = instance
            .get_typed_func::<(i32, i32, i32), i32>(&mut store, "run")
            .map_err(|_| ExecError::MissingExport("run"))?;

        let len = i32::try_from(input.len()).map_err(|_| {
            ExecError::MemoryWrite("input exceeds addressable i32 range".to_string())
        })?;
        let result = run
            .call(&mut store, (INPUT_PTR as i32, len, OUTPUT_PTR as i32))
            .map_err(|e| ExecError::Trap(e.to_string()))?;

        #[allow(clippy::cast_sign_loss)]
        let output_len = result as u32;
        if output_len > MAX_OUTPUT {
            return Err(ExecError::OutputTooLarge(output_len));
        }

        let data = memory.data(&store);
        let start = OUTPUT_PTR as usize;
        let end = start + output_len as usize;
        debug!(module_hash, output_len, "run returned output");
        Ok(data[start..end].to_vec())
    }
}

fn ensure_minimum_pages(
    store: &mut Store<()>,
    memory: &wasmtime::Memory,
) -> Result<(), ExecError> {
    let required_bytes = u64::from(OUTPUT_PTR) + u64::from(MAX_OUTPUT);
    let required_pages = required_bytes.div_ceil(WASM_PAGE_SIZE);
    let current_pages = memory.size(&*store);
    if current_pages < required_pages {
        memory
            .grow(store, required_pages - current_pages)
            .map_err(|e| ExecError::GrowthFailed(e.to_string()))?;
    }
    Ok(())
}

fn call_initialize_if_present(
    store: &mut Store<()>,
    instance: &Instance,
) -> Result<(), ExecError> {
    if let Ok(init) = instance.get_typed_func::<(), ()>(&mut *store, "_initialize") {
        init.call(store, ())
            .map_err(|e| ExecError::Trap(e.to_string()))?;
    }
    Ok(())
}
