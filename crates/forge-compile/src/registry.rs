// SPDX-License-Identifier: Apache-2.0
//! The language registry: a row in a table, not code. Adding a toolchain is
//! a configuration change, not a new code path.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Everything the compile pipeline needs to know about one toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    /// Filename the source is written to, relative to the scratch directory.
    pub input_file: String,
    /// Filename the pipeline reads the module back from, relative to the
    /// scratch directory.
    pub output_file: String,
    /// Executable to invoke (resolved via `PATH` unless absolute).
    pub executable: String,
    /// Argument vector template, in invocation order.
    pub argv: Vec<String>,
    /// Whether the toolchain must be invoked with the scratch directory as
    /// its working directory. Toolchains that take input/output paths as
    /// absolute or otherwise don't care about cwd can leave this `false`.
    pub cwd_required: bool,
}

fn spec(
    input_file: &str,
    output_file: &str,
    executable: &str,
    argv: &[&str],
    cwd_required: bool,
) -> LanguageSpec {
    LanguageSpec {
        input_file: input_file.to_string(),
        output_file: output_file.to_string(),
        executable: executable.to_string(),
        argv: argv.iter().map(|s| (*s).to_string()).collect(),
        cwd_required,
    }
}

/// The built-in languages the core recognizes out of the box. Each entry's
/// `executable`/`argv` can be overridden at runtime via [`crate::CompileConfig`]
/// without recompiling.
static BUILTIN_LANGUAGES: Lazy<HashMap<&'static str, LanguageSpec>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "assemblyscript",
        spec(
            "input.ts",
            "output.wasm",
            "asc",
            &["input.ts", "-o", "output.wasm", "--optimize"],
            true,
        ),
    );
    map.insert(
        "tinygo",
        spec(
            "main.go",
            "output.wasm",
            "tinygo",
            &["build", "-o", "output.wasm", "-target", "wasi", "main.go"],
            true,
        ),
    );
    map.insert(
        "zig",
        spec(
            "input.zig",
            "input.wasm",
            "zig",
            &[
                "build-exe",
                "input.zig",
                "-target",
                "wasm32-freestanding",
                "-fno-entry",
                "-rdynamic",
            ],
            true,
        ),
    );
    map
});

/// Look up the built-in spec for `language`, if recognized.
pub fn builtin(language: &str) -> Option<&'static LanguageSpec> {
    BUILTIN_LANGUAGES.get(language)
}

/// The set of built-in language names, for the `languages` administrative
/// surface.
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUILTIN_LANGUAGES.keys().copied().collect();
    names.sort_unstable();
    names
}
