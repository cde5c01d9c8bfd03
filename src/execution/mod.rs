//! Evaluation results and the handler that accumulates them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::events::EventHandler;

/// One reported occurrence on a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Capture {
    Value { text: String },
    Exception { class_name: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineResult {
    pub captures: Vec<Capture>,
}

impl LineResult {
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().filter_map(|c| match c {
            Capture::Value { text } => Some(text.as_str()),
            Capture::Exception { .. } => None,
        })
    }

    pub fn has_exception(&self) -> bool {
        self.captures.iter().any(|c| matches!(c, Capture::Exception { .. }))
    }
}

/// An exception that escaped the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionRecord {
    pub line: usize,
    pub class_name: String,
    pub message: String,
    pub backtrace: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvalResult {
    pub lines: BTreeMap<usize, LineResult>,
    pub stdout: String,
    pub exceptions: Vec<ExceptionRecord>,
    /// The program reported `finished`; false means it died first.
    pub finished: bool,
    pub exit_status: Option<i32>,
    pub dropped_captures: usize,
}

impl EvalResult {
    pub fn line(&self, line: usize) -> Option<&LineResult> {
        self.lines.get(&line)
    }

    pub fn values_at(&self, line: usize) -> Vec<&str> {
        self.line(line).map(|l| l.values().collect()).unwrap_or_default()
    }

    pub fn has_exception(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn exception(&self) -> Option<&ExceptionRecord> {
        self.exceptions.last()
    }
}

/// Builds an [`EvalResult`] from events, keeping at most `max_line_captures`
/// captures per line.
#[derive(Debug, Default)]
pub struct UpdateResult {
    result: EvalResult,
    max_line_captures: Option<usize>,
}

impl UpdateResult {
    pub fn new(max_line_captures: Option<usize>) -> Self {
        Self {
            result: EvalResult::default(),
            max_line_captures,
        }
    }

    pub fn result(&self) -> &EvalResult {
        &self.result
    }

    pub fn into_result(self) -> EvalResult {
        self.result
    }

    fn capture(&mut self, line: usize, capture: Capture) {
        let entry = self.result.lines.entry(line).or_default();
        if let Some(max) = self.max_line_captures {
            if entry.captures.len() >= max {
                self.result.dropped_captures += 1;
                tracing::trace!(line, max, "capture dropped");
                return;
            }
        }
        entry.captures.push(capture);
    }
}

impl EventHandler for UpdateResult {
    fn on_value(&mut self, line: usize, text: &str) {
        self.capture(line, Capture::Value { text: text.to_string() });
    }

    fn on_exception(&mut self, line: usize, class_name: &str, message: &str, backtrace: &[String]) {
        self.capture(
            line,
            Capture::Exception {
                class_name: class_name.to_string(),
                message: message.to_string(),
            },
        );
        self.result.exceptions.push(ExceptionRecord {
            line,
            class_name: class_name.to_string(),
            message: message.to_string(),
            backtrace: backtrace.to_vec(),
        });
    }

    fn on_stdout(&mut self, text: &str) {
        self.result.stdout.push_str(text);
    }

    fn on_finished(&mut self, exit_status: i32) {
        self.result.finished = true;
        self.result.exit_status = Some(exit_status);
        if self.result.dropped_captures > 0 {
            tracing::debug!(dropped = self.result.dropped_captures, "captures over the per-line cap were dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;

    #[test]
    fn keeps_first_captures_up_to_the_cap() {
        let mut store = UpdateResult::new(Some(2));
        for i in 1..=5 {
            store.handle(&Event::Value { line: 3, text: i.to_string() });
        }
        store.handle(&Event::Value { line: 4, text: "x".into() });
        store.handle(&Event::Finished { exit_status: 0 });

        let result = store.into_result();
        assert_eq!(result.values_at(3), vec!["1", "2"]);
        assert_eq!(result.values_at(4), vec!["x"]);
        assert_eq!(result.dropped_captures, 3);
        assert!(result.finished);
    }

    #[test]
    fn unbounded_by_default() {
        let mut store = UpdateResult::new(None);
        for i in 0..1000 {
            store.on_value(1, &i.to_string());
        }
        assert_eq!(store.result().line(1).map(LineResult::len), Some(1000));
    }

    #[test]
    fn exceptions_are_data() {
        let mut store = UpdateResult::new(None);
        store.on_value(1, "1");
        store.on_exception(2, "RuntimeError", "boom", &["program.rb:2:in `<main>'".to_string()]);
        store.on_stdout("a");
        store.on_stdout("b\n");
        store.on_finished(1);

        let result = store.into_result();
        assert!(result.line(2).unwrap().has_exception());
        assert!(!result.line(1).unwrap().has_exception());
        assert_eq!(result.exception().unwrap().message, "boom");
        assert_eq!(result.stdout, "ab\n");
        assert_eq!(result.exit_status, Some(1));
    }

    #[test]
    fn exception_counts_against_the_cap() {
        let mut store = UpdateResult::new(Some(1));
        store.on_value(2, "1");
        store.on_exception(2, "RuntimeError", "boom", &[]);
        let result = store.into_result();
        assert_eq!(result.line(2).unwrap().len(), 1);
        assert_eq!(result.exceptions.len(), 1);
    }
}
