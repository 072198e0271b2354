// SPDX-License-Identifier: Apache-2.0
//! Decoders for the four wasm sections the contract validator needs: Type
//! (1), Import (2), Function (3), and Export (7). Everything else in the
//! module binary is skipped over untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::ValueType;

const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_EXPORT: u8 = 7;

const IMPORT_KIND_FUNC: u8 = 0;
const IMPORT_KIND_TABLE: u8 = 1;
const IMPORT_KIND_MEMORY: u8 = 2;
const IMPORT_KIND_GLOBAL: u8 = 3;

/// The kind of item an export or import refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportKind {
    /// A function.
    Func,
    /// A table.
    Table,
    /// Linear memory.
    Memory,
    /// A global.
    Global,
}

impl TryFrom<u8> for ExportKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Func),
            1 => Ok(Self::Table),
            2 => Ok(Self::Memory),
            3 => Ok(Self::Global),
            other => Err(format!("unknown export kind byte {other:#04x}")),
        }
    }
}

/// A decoded function type: `(params) -> (results)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    /// Parameter value types, in order.
    pub params: Vec<ValueType>,
    /// Result value types, in order.
    pub results: Vec<ValueType>,
}

/// The subset of a module's structure the contract check depends on.
#[derive(Debug, Clone, Default)]
pub struct ModuleSections {
    /// The Type section's function types, in declaration order.
    pub types: Vec<FuncType>,
    /// Count of function-kind imports (the only field drawn from Import).
    pub func_imports: u32,
    /// Type index of each locally defined function, in declaration order.
    pub function_type_indices: Vec<u32>,
    /// All exports found in the Export section.
    pub(crate) exports: Vec<RawExportPub>,
}

/// Public view of a decoded export, re-exported for the crate root.
#[derive(Debug, Clone)]
pub(crate) struct RawExportPub {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

impl ModuleSections {
    /// Parse the magic/version header and every top-level section, then
    /// decode the four sections this crate cares about.
    pub fn parse(cursor: &mut Cursor<'_>) -> Result<Self, String> {
        let magic = cursor.read_bytes(4)?;
        if magic != WASM_MAGIC {
            return Err("bad wasm magic".to_string());
        }
        cursor.read_bytes(4)?; // version, unchecked

        let mut payloads: HashMap<u8, &[u8]> = HashMap::new();
        while cursor.remaining() > 0 {
            let id = cursor.read_u8()?;
            let size = cursor.read_uleb128_u32()? as usize;
            let payload = cursor.read_bytes(size)?;
            // Later duplicate sections overwrite earlier ones; a
            // spec-conformant module never has duplicates.
            payloads.insert(id, payload);
        }

        let types = payloads
            .get(&SECTION_TYPE)
            .map(|p| parse_type_section(p))
            .transpose()?
            .unwrap_or_default();

        let func_imports = payloads
            .get(&SECTION_IMPORT)
            .map(|p| parse_import_section(p))
            .transpose()?
            .unwrap_or(0);

        let function_type_indices = payloads
            .get(&SECTION_FUNCTION)
            .map(|p| parse_function_section(p))
            .transpose()?
            .unwrap_or_default();

        let exports = payloads
            .get(&SECTION_EXPORT)
            .map(|p| parse_export_section(p))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            types,
            func_imports,
            function_type_indices,
            exports,
        })
    }

}

const FUNC_TYPE_TAG: u8 = 0x60;

fn parse_type_section(payload: &[u8]) -> Result<Vec<FuncType>, String> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_uleb128_u32()?;
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = cursor.read_u8()?;
        if tag != FUNC_TYPE_TAG {
            return Err(format!("unexpected functype tag {tag:#04x}"));
        }
        let params = read_value_types(&mut cursor)?;
        let results = read_value_types(&mut cursor)?;
        types.push(FuncType { params, results });
    }
    Ok(types)
}

fn read_value_types(cursor: &mut Cursor<'_>) -> Result<Vec<ValueType>, String> {
    let count = cursor.read_uleb128_u32()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(ValueType::from_byte(cursor.read_u8()?));
    }
    Ok(values)
}

/// Parses the Import section to full wasm-spec fidelity (limits flag byte
/// respected for tables/memories), even though the only value consumed
/// downstream is the function-import count. A fixed-width skip here would
/// desynchronize the cursor on any spec-legal module whose limits carry a
/// `max` field, so the flag byte is always consulted.
fn parse_import_section(payload: &[u8]) -> Result<u32, String> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_uleb128_u32()?;
    let mut func_imports = 0u32;
    for _ in 0..count {
        cursor.read_name()?; // module name
        cursor.read_name()?; // field name
        let kind = cursor.read_u8()?;
        match kind {
            IMPORT_KIND_FUNC => {
                cursor.read_uleb128()?; // type index
                func_imports += 1;
            }
            IMPORT_KIND_TABLE => {
                cursor.read_u8()?; // element reference type
                skip_limits(&mut cursor)?;
            }
            IMPORT_KIND_MEMORY => {
                skip_limits(&mut cursor)?;
            }
            IMPORT_KIND_GLOBAL => {
                cursor.read_u8()?; // value type
                cursor.read_u8()?; // mutability
            }
            other => return Err(format!("unknown import kind byte {other:#04x}")),
        }
    }
    Ok(func_imports)
}

fn skip_limits(cursor: &mut Cursor<'_>) -> Result<(), String> {
    let flags = cursor.read_u8()?;
    cursor.read_uleb128()?; // min
    if flags & 0x01 != 0 {
        cursor.read_uleb128()?; // max, present only when the flag bit is set
    }
    Ok(())
}

fn parse_function_section(payload: &[u8]) -> Result<Vec<u32>, String> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_uleb128_u32()?;
    let mut indices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        indices.push(cursor.read_uleb128_u32()?);
    }
    Ok(indices)
}

fn parse_export_section(payload: &[u8]) -> Result<Vec<RawExportPub>, String> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_uleb128_u32()?;
    let mut exports = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = cursor.read_name()?;
        let kind = ExportKind::try_from(cursor.read_u8()?)?;
        let index = cursor.read_uleb128_u32()?;
        exports.push(RawExportPub { name, kind, index });
    }
    Ok(exports)
}
