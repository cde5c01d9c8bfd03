//! Merges evaluation results back into the source as trailing comments.

use std::{fmt, str::FromStr};

use crate::execution::{Capture, EvalResult, ExceptionRecord};
use crate::instrument::{scan, Layout, Markers};

/// Where inline annotations start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Alignment {
    /// Two spaces after each line's code.
    Line,
    /// One column per run of non-blank lines.
    #[default]
    Chunk,
    /// One column for the whole file.
    File,
}

impl FromStr for Alignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(Alignment::Line),
            "chunk" => Ok(Alignment::Chunk),
            "file" => Ok(Alignment::File),
            other => Err(format!("unknown alignment '{other}' (expected line, chunk or file)")),
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Alignment::Line => "line",
            Alignment::Chunk => "chunk",
            Alignment::File => "file",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotateOptions {
    pub alignment: Alignment,
    /// Longest rendering of a single line's annotation; `None` keeps everything.
    pub max_result_length: Option<usize>,
    pub markers: Markers,
}

const ELLIPSIS: &str = "...";

/// Annotate `body` (newline terminated) with `result`.
///
/// Lines without captures, lines that end inside a literal, and lines that
/// already carry a comment come back unchanged.
pub fn annotate(body: &str, result: &EvalResult, options: &AnnotateOptions) -> String {
    let layout = scan(body).map(|s| s.layout).unwrap_or_default();
    let lines: Vec<&str> = body.split_inclusive('\n').collect();
    let annotatable = |idx: usize| is_annotatable(&layout, idx + 1);
    let hidden = hidden(&layout, lines.len(), result);
    if !hidden.is_empty() {
        tracing::debug!(lines = ?hidden, "values left out on lines that end in a comment or inside a literal");
    }
    let columns = columns(&lines, options.alignment, &annotatable);

    let mut out = String::with_capacity(body.len() * 2);
    for (idx, raw) in lines.iter().enumerate() {
        let (text, newline) = split_newline(raw);
        let annotation = result
            .line(idx + 1)
            .filter(|l| !l.is_empty() && annotatable(idx))
            .map(|l| render_captures(&l.captures, options));
        match annotation {
            Some(annotation) => {
                let code = text.trim_end();
                out.push_str(code);
                let width = code.chars().count();
                let pad = columns[idx].max(width + 2) - width;
                out.extend(std::iter::repeat(' ').take(pad));
                out.push_str(&annotation);
            }
            None => out.push_str(text),
        }
        out.push_str(newline);
    }

    if !result.stdout.is_empty() {
        push_block(&mut out, &options.markers.stdout, result.stdout.lines());
    }
    if let Some(exception) = result.exception() {
        push_block(&mut out, &options.markers.exception, exception_lines(exception));
    }
    out
}

/// Lines that produced values `annotate` leaves out, because the line
/// already ends in a comment or ends inside a multi-line literal.
pub fn hidden_lines(body: &str, result: &EvalResult) -> Vec<usize> {
    let layout = scan(body).map(|s| s.layout).unwrap_or_default();
    hidden(&layout, body.split_inclusive('\n').count(), result)
}

fn hidden(layout: &Layout, line_count: usize, result: &EvalResult) -> Vec<usize> {
    (1..=line_count)
        .filter(|&line| result.line(line).map(|l| !l.is_empty()).unwrap_or(false))
        .filter(|&line| !is_annotatable(layout, line))
        .collect()
}

fn is_annotatable(layout: &Layout, line: usize) -> bool {
    layout.ends_in_code(line) && layout.comment_on(line).is_none()
}

/// Strip inline annotations and trailing annotation blocks left by an
/// earlier run. Other comments are kept.
pub fn remove_annotations(body: &str, markers: &Markers) -> String {
    let Ok(scan) = scan(body) else {
        return body.to_string();
    };
    let prefixes = [markers.value.trim_end(), markers.exception.trim_end(), markers.stdout.trim_end()];
    let is_marker = |comment: &str| prefixes.iter().any(|p| comment.starts_with(p));

    enum Kept<'a> {
        Line(&'a str),
        Trimmed(&'a str, &'a str),
        Block,
    }

    let mut offset = 0;
    let mut kept = Vec::new();
    for (idx, raw) in body.split_inclusive('\n').enumerate() {
        let (text, newline) = split_newline(raw);
        let entry = match scan.layout.comment_on(idx + 1) {
            Some(c) if is_marker(&body[c.start..c.end]) => {
                let code = &text[..c.start - offset];
                if code.trim().is_empty() {
                    Kept::Block
                } else {
                    Kept::Trimmed(code.trim_end(), newline)
                }
            }
            _ => Kept::Line(raw),
        };
        kept.push(entry);
        offset += raw.len();
    }

    // A trailing run of blank lines and block lines is one appended block.
    let mut tail = kept.len();
    while tail > 0 && matches!(kept[tail - 1], Kept::Block | Kept::Line("\n") | Kept::Line("\r\n")) {
        tail -= 1;
    }
    if kept[tail..].iter().any(|k| matches!(k, Kept::Block)) {
        kept.truncate(tail);
    }

    let mut out = String::with_capacity(body.len());
    for entry in kept {
        match entry {
            Kept::Line(raw) => out.push_str(raw),
            Kept::Trimmed(code, newline) => {
                out.push_str(code);
                out.push_str(newline);
            }
            Kept::Block => {}
        }
    }
    out
}

fn split_newline(raw: &str) -> (&str, &str) {
    let text = raw.trim_end_matches(['\n', '\r']);
    (text, &raw[text.len()..])
}

/// Annotation column for each line, by index.
fn columns(lines: &[&str], alignment: Alignment, annotatable: &dyn Fn(usize) -> bool) -> Vec<usize> {
    let width = |idx: usize| split_newline(lines[idx]).0.trim_end().chars().count();
    let mut columns = vec![0; lines.len()];
    match alignment {
        Alignment::Line => {}
        Alignment::File => {
            let max = (0..lines.len()).filter(|&i| annotatable(i)).map(width).max().unwrap_or(0);
            columns.fill(max + 2);
        }
        Alignment::Chunk => {
            let mut start = 0;
            while start < lines.len() {
                let mut end = start;
                while end < lines.len() && !lines[end].trim().is_empty() {
                    end += 1;
                }
                let max = (start..end).filter(|&i| annotatable(i)).map(width).max().unwrap_or(0);
                columns[start..end].fill(max + 2);
                start = end + 1;
            }
        }
    }
    columns
}

fn render_captures(captures: &[Capture], options: &AnnotateOptions) -> String {
    let values: Vec<&str> = captures
        .iter()
        .filter_map(|c| match c {
            Capture::Value { text } => Some(text.as_str()),
            Capture::Exception { .. } => None,
        })
        .collect();
    let exceptions: Vec<String> = captures
        .iter()
        .filter_map(|c| match c {
            Capture::Exception { class_name, message } => Some(format!("{class_name}: {message}")),
            Capture::Value { .. } => None,
        })
        .collect();

    let mut out = String::new();
    if !values.is_empty() {
        out.push_str(&options.markers.value);
        out.push_str(&single_line(&values.join(", ")));
    }
    if !exceptions.is_empty() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&options.markers.exception);
        out.push_str(&single_line(&exceptions.join(", ")));
    }
    match options.max_result_length {
        Some(max) => truncate(out, max),
        None => out,
    }
}

fn single_line(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

fn truncate(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

fn exception_lines(exception: &ExceptionRecord) -> Vec<&str> {
    let mut lines = vec![exception.class_name.as_str()];
    lines.extend(exception.message.lines());
    if !exception.backtrace.is_empty() {
        lines.push("");
        lines.extend(exception.backtrace.iter().map(String::as_str));
    }
    lines
}

fn push_block<'a>(out: &mut String, marker: &str, lines: impl IntoIterator<Item = &'a str>) {
    out.push('\n');
    for line in lines {
        if line.is_empty() {
            out.push_str(marker.trim_end());
        } else {
            out.push_str(marker);
            out.push_str(line);
        }
        out.push('\n');
    }
}
