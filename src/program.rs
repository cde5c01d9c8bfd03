//! The program being evaluated.

use std::path::{Path, PathBuf};

/// Immutable input: source text plus the few facts needed to run it.
#[derive(Debug, Clone, Default)]
pub struct Program {
    body: String,
    missing_newline: bool,
    pub filename: Option<PathBuf>,
    pub encoding: Option<String>,
    pub stdin: String,
}

impl Program {
    pub fn new(source: impl Into<String>) -> Self {
        let mut body = source.into();
        let missing_newline = !body.ends_with('\n');
        if missing_newline {
            body.push('\n');
        }
        Self {
            body,
            missing_newline,
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl AsRef<Path>) -> Self {
        self.filename = Some(filename.as_ref().to_path_buf());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    /// Source text, always ending in a newline.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether the trailing newline of `body` was added by us.
    pub fn missing_newline(&self) -> bool {
        self.missing_newline
    }

    /// Undo the newline normalization on text derived from `body`.
    pub fn restore_newline(&self, mut text: String) -> String {
        if self.missing_newline && text.ends_with('\n') {
            text.pop();
        }
        text
    }
}
