//! Printers: annotated program on stdout, diagnostics on stderr.

use owo_colors::OwoColorize;
use serde::Serialize;

use linewise::engine::Outcome;
use linewise::execution::EvalResult;
use linewise::instrument::SyntaxError;
use linewise::process::UnexpectedExit;

pub struct TextPrinter {
    pub color: bool,
}

impl TextPrinter {
    /// The program text as-is; it already carries its own trailing newline (or not).
    pub fn print_body(&self, body: &str) {
        print!("{body}");
    }

    pub fn syntax_error(&self, error: &SyntaxError) {
        self.diagnostic("syntax error", &error.to_string());
    }

    pub fn timed_out(&self, seconds: f64) {
        self.diagnostic("timeout", &format!("program ran longer than {seconds} seconds"));
    }

    pub fn unexpected(&self, exit: &UnexpectedExit) {
        self.diagnostic("unexpected exit", &exit.to_string());
    }

    fn diagnostic(&self, label: &str, text: &str) {
        if self.color {
            eprintln!("{}: {}", label.red().bold(), text);
        } else {
            eprintln!("{label}: {text}");
        }
    }
}

/// `--json` rendering of a whole run.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JsonReport<'a> {
    Success {
        annotated_body: &'a str,
        result: &'a EvalResult,
    },
    TimedOut {
        body: &'a str,
    },
    UnexpectedException {
        body: &'a str,
        exit: &'a UnexpectedExit,
    },
    SyntaxError {
        body: &'a str,
        error: &'a SyntaxError,
    },
}

impl<'a> JsonReport<'a> {
    pub fn new(outcome: &'a Outcome, body: &'a str) -> Self {
        match outcome {
            Outcome::Success(result) => JsonReport::Success { annotated_body: body, result },
            Outcome::TimedOut => JsonReport::TimedOut { body },
            Outcome::UnexpectedException(exit) => JsonReport::UnexpectedException { body, exit },
            Outcome::SyntaxError(error) => JsonReport::SyntaxError { body, error },
        }
    }

    pub fn print(&self) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}
