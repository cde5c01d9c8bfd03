//! Evaluates a program once and answers questions about the run.

use crate::annotate::{annotate, remove_annotations, AnnotateOptions};
use crate::config::EvalOptions;
use crate::error::{Error, Result};
use crate::events::{DebugHandler, EventHandler};
use crate::execution::{EvalResult, UpdateResult};
use crate::instrument::{check_syntax, instrument, SyntaxError};
use crate::process::{RubyRunner, RunOutcome, Runner, UnexpectedExit};
use crate::program::Program;

/// How an evaluation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(EvalResult),
    TimedOut,
    UnexpectedException(UnexpectedExit),
    SyntaxError(SyntaxError),
}

impl Outcome {
    pub fn result(&self) -> Option<&EvalResult> {
        match self {
            Outcome::Success(result) => Some(result),
            _ => None,
        }
    }
}

pub struct Engine<R = RubyRunner> {
    program: Program,
    options: EvalOptions,
    annotate_options: AnnotateOptions,
    runner: R,
    prepared_body: String,
    syntax_error: Option<SyntaxError>,
    outcome: Option<Outcome>,
    annotated_body: Option<String>,
}

impl Engine<RubyRunner> {
    pub fn new(program: Program, options: EvalOptions, annotate_options: AnnotateOptions) -> Self {
        Self::with_runner(program, options, annotate_options, RubyRunner::new())
    }
}

impl<R: Runner> Engine<R> {
    pub fn with_runner(program: Program, mut options: EvalOptions, annotate_options: AnnotateOptions, runner: R) -> Self {
        if let Some(filename) = &program.filename {
            options.filename = filename.clone();
        }
        if program.encoding.is_some() {
            options.encoding = program.encoding.clone();
        }
        if !program.stdin.is_empty() {
            options.stdin = program.stdin.clone();
        }
        let prepared_body = remove_annotations(program.body(), &annotate_options.markers);
        let syntax_error = check_syntax(&prepared_body).err().map(|mut e| {
            e.filename = program.filename.clone();
            e
        });
        Self {
            program,
            options,
            annotate_options,
            runner,
            prepared_body,
            syntax_error,
            outcome: None,
            annotated_body: None,
        }
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn missing_newline(&self) -> bool {
        self.program.missing_newline()
    }

    /// Source with old annotations removed, always newline terminated.
    pub fn prepared_body(&self) -> &str {
        &self.prepared_body
    }

    /// `prepared_body` with the caller's trailing newline convention.
    pub fn cleaned_body(&self) -> String {
        self.program.restore_newline(self.prepared_body.clone())
    }

    pub fn is_syntax_error(&self) -> bool {
        self.syntax_error.is_some()
    }

    pub fn syntax_error(&self) -> Option<&SyntaxError> {
        self.syntax_error.as_ref()
    }

    /// Run the program. Later calls return the first outcome without running again.
    pub async fn evaluate(&mut self) -> Result<&Outcome> {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.run().await?,
        };
        Ok(self.outcome.insert(outcome))
    }

    async fn run(&self) -> Result<Outcome> {
        if let Some(error) = &self.syntax_error {
            tracing::debug!(%error, "not running a program with a syntax error");
            return Ok(Outcome::SyntaxError(error.clone()));
        }
        self.options.validate()?;
        let instrumented = match instrument(&self.prepared_body, &self.annotate_options.markers) {
            Ok(instrumented) => instrumented,
            Err(error) => return Ok(Outcome::SyntaxError(error)),
        };
        tracing::trace!(body = %instrumented, "instrumented program");

        let mut store = UpdateResult::new(self.options.max_line_captures);
        let ran = if self.options.debug {
            let mut logged = DebugHandler::new(&mut store);
            let ran = self.runner.run(&instrumented, &self.options, &mut logged).await?;
            let seen = logged.seen();
            tracing::debug!(events = seen, "event stream closed");
            ran
        } else {
            self.runner.run(&instrumented, &self.options, &mut store as &mut dyn EventHandler).await?
        };

        Ok(match ran {
            RunOutcome::Completed => Outcome::Success(store.into_result()),
            RunOutcome::TimedOut => Outcome::TimedOut,
            RunOutcome::Crashed(exit) => {
                tracing::debug!(%exit, "program stopped unexpectedly");
                Outcome::UnexpectedException(exit)
            }
        })
    }

    pub fn outcome(&self) -> Result<&Outcome> {
        self.outcome.as_ref().ok_or(Error::MustEvaluateFirst("outcome"))
    }

    /// Results of a successful run; `None` after any other outcome.
    pub fn results(&self) -> Result<Option<&EvalResult>> {
        let outcome = self.outcome.as_ref().ok_or(Error::MustEvaluateFirst("results"))?;
        Ok(outcome.result())
    }

    pub fn timed_out(&self) -> Result<bool> {
        let outcome = self.outcome.as_ref().ok_or(Error::MustEvaluateFirst("timed_out"))?;
        Ok(matches!(outcome, Outcome::TimedOut))
    }

    pub fn unexpected_exception(&self) -> Result<Option<&UnexpectedExit>> {
        let outcome = self
            .outcome
            .as_ref()
            .ok_or(Error::MustEvaluateFirst("unexpected_exception"))?;
        Ok(match outcome {
            Outcome::UnexpectedException(exit) => Some(exit),
            _ => None,
        })
    }

    pub fn is_unexpected_exception(&self) -> Result<bool> {
        self.unexpected_exception()
            .map(|exit| exit.is_some())
            .map_err(|_| Error::MustEvaluateFirst("is_unexpected_exception"))
    }

    /// The cleaned body with results merged in. Unannotated unless the run
    /// succeeded.
    pub fn annotated_body(&mut self) -> Result<String> {
        if let Some(body) = &self.annotated_body {
            return Ok(body.clone());
        }
        let outcome = self.outcome.as_ref().ok_or(Error::MustEvaluateFirst("annotated_body"))?;
        let body = match outcome.result() {
            Some(result) => {
                let annotated = annotate(&self.prepared_body, result, &self.annotate_options);
                self.program.restore_newline(annotated)
            }
            None => self.cleaned_body(),
        };
        self.annotated_body = Some(body.clone());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::annotate::Alignment;
    use crate::events::Event;

    /// Replays canned events and counts how often it was asked to run.
    #[derive(Clone, Default)]
    struct Scripted {
        events: Vec<Event>,
        outcome: Option<RunOutcome>,
        calls: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<String>>>,
    }

    impl Scripted {
        fn new(events: Vec<Event>) -> Self {
            Self { events, ..Default::default() }
        }

        fn ending(mut self, outcome: RunOutcome) -> Self {
            self.outcome = Some(outcome);
            self
        }
    }

    #[async_trait]
    impl Runner for Scripted {
        async fn run(&self, body: &str, _options: &EvalOptions, handler: &mut dyn EventHandler) -> Result<RunOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(body.to_string());
            for event in &self.events {
                handler.handle(event);
            }
            Ok(self.outcome.clone().unwrap_or(RunOutcome::Completed))
        }
    }

    fn value(line: usize, text: &str) -> Event {
        Event::Value { line, text: text.into() }
    }

    fn line_aligned() -> AnnotateOptions {
        AnnotateOptions { alignment: Alignment::Line, ..Default::default() }
    }

    fn engine(src: &str, runner: Scripted) -> Engine<Scripted> {
        Engine::with_runner(Program::new(src), EvalOptions::new(), line_aligned(), runner)
    }

    #[tokio::test]
    async fn runs_once_and_annotates() {
        let runner = Scripted::new(vec![value(1, "2"), Event::Finished { exit_status: 0 }]);
        let calls = runner.calls.clone();
        let mut engine = engine("1 + 1", runner);

        assert!(matches!(engine.evaluate().await.unwrap(), Outcome::Success(_)));
        assert!(matches!(engine.evaluate().await.unwrap(), Outcome::Success(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(engine.missing_newline());
        assert_eq!(engine.annotated_body().unwrap(), "1 + 1  # => 2");
        assert_eq!(engine.results().unwrap().unwrap().values_at(1), vec!["2"]);
        assert!(!engine.timed_out().unwrap());
        assert!(!engine.is_unexpected_exception().unwrap());
    }

    #[tokio::test]
    async fn runner_sees_the_instrumented_body() {
        let runner = Scripted::new(vec![]);
        let bodies = runner.bodies.clone();
        let mut engine = engine("a = 1\n", runner);
        engine.evaluate().await.unwrap();
        assert_eq!(bodies.lock().unwrap().as_slice(), ["::Linewise.record_result(1, (a = 1))\n"]);
    }

    #[tokio::test]
    async fn syntax_errors_never_reach_the_runner() {
        let runner = Scripted::new(vec![]);
        let calls = runner.calls.clone();
        let program = Program::new("def foo\n").with_filename("f.rb");
        let mut engine = Engine::with_runner(program, EvalOptions::new(), line_aligned(), runner);

        assert!(engine.is_syntax_error());
        let error = engine.syntax_error().unwrap();
        assert_eq!(error.line_number, 1);
        assert_eq!(error.to_string(), "f.rb:1: unexpected end-of-input, missing 'end' for 'def'");

        assert!(matches!(engine.evaluate().await.unwrap(), Outcome::SyntaxError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.results().unwrap(), None);
        assert_eq!(engine.annotated_body().unwrap(), "def foo\n");
    }

    #[tokio::test]
    async fn capture_cap_applies() {
        let events = (0..10).map(|i| value(2, &i.to_string())).collect();
        let options = EvalOptions { max_line_captures: Some(3), ..EvalOptions::new() };
        let program = Program::new("10.times do |i|\n  i\nend\n");
        let mut engine = Engine::with_runner(program, options, line_aligned(), Scripted::new(events));
        engine.evaluate().await.unwrap();
        let result = engine.results().unwrap().unwrap();
        assert_eq!(result.values_at(2), vec!["0", "1", "2"]);
        assert_eq!(result.dropped_captures, 7);
    }

    #[tokio::test]
    async fn debug_mode_still_stores_events() {
        let events = vec![value(1, "1"), value(1, "2"), Event::Finished { exit_status: 0 }];
        let options = EvalOptions { debug: true, max_line_captures: Some(1), ..EvalOptions::new() };
        let program = Program::new("x = 1\n");
        let mut engine = Engine::with_runner(program, options, line_aligned(), Scripted::new(events));
        engine.evaluate().await.unwrap();
        let result = engine.results().unwrap().unwrap();
        assert_eq!(result.values_at(1), vec!["1"]);
        assert_eq!(result.dropped_captures, 1);
        assert!(result.finished);
    }

    #[tokio::test]
    async fn timeout_exposes_no_results() {
        let runner = Scripted::new(vec![value(1, "1")]).ending(RunOutcome::TimedOut);
        let mut engine = engine("loop { 1 }\n", runner);
        assert_eq!(engine.evaluate().await.unwrap(), &Outcome::TimedOut);
        assert!(engine.timed_out().unwrap());
        assert_eq!(engine.results().unwrap(), None);
        assert_eq!(engine.annotated_body().unwrap(), "loop { 1 }\n");
    }

    #[tokio::test]
    async fn crash_is_an_unexpected_exception() {
        let exit = UnexpectedExit { status: Some(139), stderr: "boom".into(), reason: "died".into() };
        let runner = Scripted::new(vec![]).ending(RunOutcome::Crashed(exit.clone()));
        let mut engine = engine("1\n", runner);
        engine.evaluate().await.unwrap();
        assert!(engine.is_unexpected_exception().unwrap());
        assert_eq!(engine.unexpected_exception().unwrap(), Some(&exit));
        assert!(!engine.timed_out().unwrap());
    }

    #[test]
    fn accessors_require_evaluation() {
        let mut engine = engine("1\n", Scripted::new(vec![]));
        assert!(matches!(engine.results(), Err(Error::MustEvaluateFirst("results"))));
        assert!(matches!(engine.timed_out(), Err(Error::MustEvaluateFirst("timed_out"))));
        assert!(matches!(engine.annotated_body(), Err(Error::MustEvaluateFirst("annotated_body"))));
        assert!(matches!(
            engine.unexpected_exception(),
            Err(Error::MustEvaluateFirst("unexpected_exception"))
        ));
        assert!(matches!(
            engine.is_unexpected_exception(),
            Err(Error::MustEvaluateFirst("is_unexpected_exception"))
        ));
        // these never need a run
        assert!(!engine.is_syntax_error());
        assert_eq!(engine.cleaned_body(), "1\n");
    }

    #[tokio::test]
    async fn previous_annotations_are_replaced() {
        let runner = Scripted::new(vec![value(1, "3")]);
        let mut engine = engine("1 + 2  # => 99\n", runner);
        assert_eq!(engine.prepared_body(), "1 + 2\n");
        engine.evaluate().await.unwrap();
        assert_eq!(engine.annotated_body().unwrap(), "1 + 2  # => 3\n");
    }

    #[tokio::test]
    async fn program_level_settings_override_options() {
        let program = Program::new("gets\n").with_stdin("hi\n").with_encoding("UTF-8").with_filename("x/y.rb");
        let engine = Engine::with_runner(program, EvalOptions::new(), line_aligned(), Scripted::new(vec![]));
        assert_eq!(engine.options().stdin, "hi\n");
        assert_eq!(engine.options().encoding.as_deref(), Some("UTF-8"));
        assert_eq!(engine.options().filename, std::path::PathBuf::from("x/y.rb"));
    }
}
