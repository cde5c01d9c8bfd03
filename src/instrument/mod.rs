//! Rewrites a Ruby program so every statement reports its value.
//!
//! Each statement becomes `<record>(LINE, (STATEMENT))`, where `LINE` is the
//! statement's last line. Only same-line text is inserted, so line `N` of the
//! instrumented program is always line `N` of the original.

use std::{fmt, path::PathBuf};

use serde::Serialize;

mod lexer;
mod scan;

pub use scan::{scan, Comment, Layout, Scan, Statement};

/// Marker scheme shared by the instrumentor and the annotation merger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    /// Callable receiving `(line, value)` and returning `value`.
    pub record: String,
    pub value: String,
    pub exception: String,
    pub stdout: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            record: "::Linewise.record_result".into(),
            value: "# => ".into(),
            exception: "# ~> ".into(),
            stdout: "# >> ".into(),
        }
    }
}

/// A structural error found before any code runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxError {
    pub line_number: usize,
    pub explanation: String,
    pub filename: Option<PathBuf>,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filename {
            Some(name) => write!(f, "{}:{}: {}", name.display(), self.line_number, self.explanation),
            None => write!(f, "line {}: {}", self.line_number, self.explanation),
        }
    }
}

impl std::error::Error for SyntaxError {}

/// Check `body` for structural syntax errors without running it.
pub fn check_syntax(body: &str) -> Result<(), SyntaxError> {
    scan(body).map(|_| ())
}

/// Produce the instrumented program.
pub fn instrument(body: &str, markers: &Markers) -> Result<String, SyntaxError> {
    let scan = scan(body)?;

    // (offset, rank, order, text): closers sort before openers at the same
    // offset; inner closers before outer ones, outer openers before inner ones.
    let mut inserts: Vec<(usize, u8, isize, String)> = Vec::with_capacity(scan.statements.len() * 2);
    for stmt in &scan.statements {
        let depth = stmt.depth as isize;
        inserts.push((stmt.start, 1, depth, format!("{}({}, (", markers.record, stmt.line)));
        inserts.push((stmt.end, 0, -depth, "))".to_string()));
    }
    inserts.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

    let extra: usize = inserts.iter().map(|i| i.3.len()).sum();
    let mut out = String::with_capacity(body.len() + extra);
    let mut at = 0;
    for (offset, _, _, text) in inserts {
        out.push_str(&body[at..offset]);
        out.push_str(&text);
        at = offset;
    }
    out.push_str(&body[at..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(src: &str) -> String {
        instrument(src, &Markers { record: "r".into(), ..Markers::default() }).unwrap()
    }

    #[test]
    fn wraps_each_statement() {
        assert_eq!(rewrite("a = 1\nb = 2\n"), "r(1, (a = 1))\nr(2, (b = 2))\n");
    }

    #[test]
    fn nested_statements_are_wrapped_inside_out() {
        let got = rewrite("[1].each do |x|\n  x + 1\nend\n");
        assert_eq!(got, "r(3, ([1].each do |x|\n  r(2, (x + 1))\nend))\n");
    }

    #[test]
    fn line_count_is_preserved() {
        let src = "x = <<~EOS\n  a\nEOS\nif x\n  1\nelse\n  2\nend\ndef f = 3\n";
        let got = rewrite(src);
        assert_eq!(got.lines().count(), src.lines().count());
        assert!(got.contains("\n  a\nEOS\n"));
    }

    #[test]
    fn comments_and_literals_are_untouched() {
        let got = rewrite("x = \"a; b\" # note\n");
        assert_eq!(got, "r(1, (x = \"a; b\")) # note\n");
    }

    #[test]
    fn single_line_clauses() {
        let got = rewrite("v = if true then 1 else 2 end\n");
        assert_eq!(got, "r(1, (v = if true then r(1, (1)) else r(1, (2)) end))\n");
    }

    #[test]
    fn programs_without_expressions_are_unchanged() {
        assert_eq!(rewrite("# just a comment\n\n"), "# just a comment\n\n");
    }

    #[test]
    fn division_by_a_local_is_not_a_regexp() {
        assert_eq!(rewrite("x = 4\ny = x /2\n"), "r(1, (x = 4))\nr(2, (y = x /2))\n");
    }

    #[test]
    fn singleton_class_body() {
        let src = "class <<self\n  def a; end\nend\n";
        let got = rewrite(src);
        assert!(got.starts_with("r(3, (class <<self\n"));
        assert_eq!(got.lines().count(), src.lines().count());
    }

    #[test]
    fn escaped_multibyte_character_literal() {
        assert!(check_syntax("x = ?\\é\n").is_ok());
        assert_eq!(rewrite("x = ?\\é\nx\n"), "r(1, (x = ?\\é))\nr(2, (x))\n");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = instrument("class Foo\n", &Markers::default()).unwrap_err();
        assert_eq!(err.line_number, 1);
        assert_eq!(err.to_string(), "line 1: unexpected end-of-input, missing 'end' for 'class'");
    }
}
