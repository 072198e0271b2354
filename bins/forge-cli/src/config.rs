// SPDX-License-Identifier: Apache-2.0
//! `forge.toml` layering: built-in defaults, overridden by a config file,
//! overridden by CLI flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use forge_compile::LanguageSpec;
use serde::Deserialize;

/// The fully resolved configuration used to wire up the store and pipeline.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root directory under which compile scratch directories are created.
    pub scratch_root: PathBuf,
    /// Per-language executable/argv overrides, layered over the built-ins.
    pub language_overrides: HashMap<String, LanguageSpec>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("forge.sqlite3"),
            scratch_root: std::env::temp_dir(),
            language_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_path: Option<PathBuf>,
    scratch_root: Option<PathBuf>,
    #[serde(default)]
    languages: HashMap<String, FileLanguageSpec>,
}

#[derive(Debug, Deserialize)]
struct FileLanguageSpec {
    input_file: String,
    output_file: String,
    executable: String,
    #[serde(default)]
    argv: Vec<String>,
    /// Whether the toolchain must be run with the scratch directory as its
    /// working directory. Defaults to `true`, matching the built-in
    /// registry entries.
    #[serde(default = "default_cwd_required")]
    cwd_required: bool,
}

fn default_cwd_required() -> bool {
    true
}

/// Load `forge.toml` (or the file at `config_path`, if given) and layer CLI
/// overrides (`db_path`/`scratch_root`, both optional) on top. A missing
/// default `forge.toml` is not an error; a missing explicitly-named file is.
pub fn load(
    config_path: Option<&Path>,
    db_path_override: Option<PathBuf>,
    scratch_root_override: Option<PathBuf>,
) -> anyhow::Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    let file_config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
            Some(toml::from_str::<FileConfig>(&raw)?)
        }
        None => {
            let default_path = Path::new("forge.toml");
            if default_path.exists() {
                let raw = std::fs::read_to_string(default_path)?;
                Some(toml::from_str::<FileConfig>(&raw)?)
            } else {
                None
            }
        }
    };

    if let Some(file) = file_config {
        if let Some(db_path) = file.db_path {
            resolved.db_path = db_path;
        }
        if let Some(scratch_root) = file.scratch_root {
            resolved.scratch_root = scratch_root;
        }
        for (name, spec) in file.languages {
            resolved.language_overrides.insert(
                name,
                LanguageSpec {
                    input_file: spec.input_file,
                    output_file: spec.output_file,
                    executable: spec.executable,
                    argv: spec.argv,
                    cwd_required: spec.cwd_required,
                },
            );
        }
    }

    if let Some(db_path) = db_path_override {
        resolved.db_path = db_path;
    }
    if let Some(scratch_root) = scratch_root_override {
        resolved.scratch_root = scratch_root;
    }

    Ok(resolved)
}
