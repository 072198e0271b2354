// SPDX-License-Identifier: Apache-2.0
//! Hand-rolled parser over the wasm binary section layout, sufficient to
//! decide whether a module conforms to the fixed ABI the execution harness
//! requires: an exported `memory` and an exported `run(i32, i32, i32) -> i32`
//! function, with an optional `_initialize`.
//!
//! This is deliberately not a general-purpose wasm parser — it decodes only
//! the Type, Import, Function, and Export sections, and only the fields of
//! those sections the contract check needs.

#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod cursor;
mod sections;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cursor::Cursor;
use sections::{FuncType, ModuleSections};
pub use sections::ExportKind;

/// A wasm value type, as carried in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// `i32` (`0x7F`).
    I32,
    /// `i64` (`0x7E`).
    I64,
    /// `f32` (`0x7D`).
    F32,
    /// `f64` (`0x7C`).
    F64,
    /// Any other value type byte, kept verbatim for diagnostics.
    Other(u8),
}

impl ValueType {
    fn from_byte(b: u8) -> Self {
        match b {
            0x7F => Self::I32,
            0x7E => Self::I64,
            0x7D => Self::F32,
            0x7C => Self::F64,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::Other(b) => write!(f, "{b:#04x}"),
        }
    }
}

fn format_signature(params: &[ValueType], results: &[ValueType]) -> String {
    let p = params
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let r = results
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("({p}) -> ({r})")
}

/// An export record as found in the module's Export section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportInfo {
    /// The kind of item exported (function, table, memory, global).
    pub kind: ExportKind,
    /// The index into the corresponding index space.
    pub index: u32,
}

/// Diagnostic detail accompanying a [`ValidationResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationInfo {
    /// All exports found, keyed by name.
    pub exports: BTreeMap<String, ExportInfo>,
    /// The formatted signature resolved for `run`, when resolution succeeded.
    pub run_signature: Option<String>,
}

/// The outcome of validating a module against the wasm-forge ABI contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `errors.is_empty()`.
    pub valid: bool,
    /// Fatal contract violations.
    pub errors: Vec<String>,
    /// Non-fatal observations (e.g. unexpected extra exports).
    pub warnings: Vec<String>,
    /// Structural detail about what was found.
    pub info: ValidationInfo,
}

const REQUIRED_PARAMS: [ValueType; 3] = [ValueType::I32, ValueType::I32, ValueType::I32];
const REQUIRED_RESULTS: [ValueType; 1] = [ValueType::I32];
const RESERVED_EXPORTS: [&str; 3] = ["memory", "run", "_initialize"];

/// Validate raw wasm module bytes against the fixed ABI contract.
///
/// Never panics: any decode failure is caught and reported as a single
/// `Invalid wasm binary: <msg>` error rather than propagated.
pub fn validate(bytes: &[u8]) -> ValidationResult {
    match parse_and_check(bytes) {
        Ok(result) => result,
        Err(msg) => ValidationResult {
            valid: false,
            errors: vec![format!("Invalid wasm binary: {msg}")],
            warnings: Vec::new(),
            info: ValidationInfo::default(),
        },
    }
}

fn parse_and_check(bytes: &[u8]) -> Result<ValidationResult, String> {
    let mut cursor = Cursor::new(bytes);
    let sections = ModuleSections::parse(&mut cursor)?;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let exports: BTreeMap<String, ExportInfo> = sections
        .exports
        .iter()
        .map(|e| (e.name.clone(), ExportInfo { kind: e.kind, index: e.index }))
        .collect();

    let memory_export = exports
        .iter()
        .find(|(name, info)| name.as_str() == "memory" && info.kind == ExportKind::Memory);
    if memory_export.is_none() {
        errors.push("Missing export: memory (kind: memory)".to_string());
    }

    let run_export = exports
        .iter()
        .find(|(name, info)| name.as_str() == "run" && info.kind == ExportKind::Func);
    if run_export.is_none() {
        errors.push("Missing export: run (kind: function)".to_string());
    }

    let mut run_signature = None;
    if let Some((_, run)) = run_export {
        match resolve_run_signature(&sections, run.index) {
            Ok(sig) => {
                let formatted = format_signature(&sig.params, &sig.results);
                run_signature = Some(formatted.clone());
                if sig.params != REQUIRED_PARAMS || sig.results != REQUIRED_RESULTS {
                    errors.push(format!(
                        "Wrong signature for run: got {formatted}, expected {}",
                        format_signature(&REQUIRED_PARAMS, &REQUIRED_RESULTS)
                    ));
                }
            }
            Err(msg) => errors.push(msg),
        }
    }

    for name in exports.keys() {
        if !RESERVED_EXPORTS.contains(&name.as_str()) {
            warnings.push(format!("Extra export: {name}"));
        }
    }

    Ok(ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
        info: ValidationInfo {
            exports,
            run_signature,
        },
    })
}

fn resolve_run_signature(sections: &ModuleSections, export_index: u32) -> Result<FuncType, String> {
    let local_index = export_index
        .checked_sub(sections.func_imports)
        .ok_or_else(|| {
            format!(
                "Cannot resolve signature for run: exported index {export_index} is within the imported function range ({} imports)",
                sections.func_imports
            )
        })?;
    let type_index = *sections
        .function_type_indices
        .get(local_index as usize)
        .ok_or_else(|| {
            format!(
                "Cannot resolve signature for run: local function index {local_index} has no entry in the function section"
            )
        })?;
    sections
        .types
        .get(type_index as usize)
        .cloned()
        .ok_or_else(|| {
            format!("Cannot resolve signature for run: type index {type_index} has no entry in the type section")
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use sections::builder::ModuleBuilder;

    #[test]
    fn rejects_non_wasm_bytes() {
        let result = validate(b"not a wasm module");
        assert!(!result.valid);
        assert!(result.errors[0].starts_with("Invalid wasm binary:"));
    }

    #[test]
    fn conformant_module_validates() {
        let bytes = ModuleBuilder::new()
            .with_run_of_type(&[ValueType::I32, ValueType::I32, ValueType::I32], &[ValueType::I32])
            .with_memory_export()
            .build();
        let result = validate(&bytes);
        assert!(result.valid, "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
        assert_eq!(result.info.run_signature.as_deref(), Some("(i32, i32, i32) -> (i32)"));
    }

    #[test]
    fn missing_memory_export_is_an_error() {
        let bytes = ModuleBuilder::new()
            .with_run_of_type(&[ValueType::I32, ValueType::I32, ValueType::I32], &[ValueType::I32])
            .build();
        let result = validate(&bytes);
        assert!(!result.valid);
        assert!(result.errors.contains(&"Missing export: memory (kind: memory)".to_string()));
    }

    #[test]
    fn missing_run_export_is_an_error() {
        let bytes = ModuleBuilder::new().with_memory_export().build();
        let result = validate(&bytes);
        assert!(!result.valid);
        assert!(result.errors.contains(&"Missing export: run (kind: function)".to_string()));
    }

    #[test]
    fn wrong_signature_reports_both_signatures() {
        let bytes = ModuleBuilder::new()
            .with_run_of_type(&[], &[])
            .with_memory_export()
            .build();
        let result = validate(&bytes);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e == "Wrong signature for run: got () -> (), expected (i32, i32, i32) -> (i32)"));
    }

    #[test]
    fn extra_export_is_a_warning_not_an_error() {
        let bytes = ModuleBuilder::new()
            .with_run_of_type(&[ValueType::I32, ValueType::I32, ValueType::I32], &[ValueType::I32])
            .with_memory_export()
            .with_extra_func_export("helper")
            .build();
        let result = validate(&bytes);
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.warnings, vec!["Extra export: helper".to_string()]);
    }

    #[test]
    fn initialize_export_is_not_a_warning() {
        let bytes = ModuleBuilder::new()
            .with_run_of_type(&[ValueType::I32, ValueType::I32, ValueType::I32], &[ValueType::I32])
            .with_memory_export()
            .with_extra_func_export("_initialize")
            .build();
        let result = validate(&bytes);
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn accounts_for_function_imports_when_resolving_run_index() {
        let bytes = ModuleBuilder::new()
            .with_func_import()
            .with_run_of_type(&[ValueType::I32, ValueType::I32, ValueType::I32], &[ValueType::I32])
            .with_memory_export()
            .build();
        let result = validate(&bytes);
        assert!(result.valid, "errors: {:?}", result.errors);
    }
}
