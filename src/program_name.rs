//! Resolve the name this binary was invoked as.
//!
//! Error messages and hints embed the program name so they stay correct when
//! the binary is installed under an alias.

use std::sync::OnceLock;

const DEFAULT_NAME: &str = "sta";

static PROGRAM_NAME: OnceLock<String> = OnceLock::new();

/// The invoked program name, derived from argv[0] once per process.
pub fn program_name() -> &'static str {
    PROGRAM_NAME.get_or_init(|| {
        std::env::args()
            .next()
            .as_deref()
            .and_then(|arg0| {
                std::path::Path::new(arg0)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string())
    })
}
