//! Event handlers: one method per event kind.

use super::Event;

pub trait EventHandler: Send {
    fn on_value(&mut self, _line: usize, _text: &str) {}

    fn on_exception(&mut self, _line: usize, _class_name: &str, _message: &str, _backtrace: &[String]) {}

    fn on_stdout(&mut self, _text: &str) {}

    fn on_finished(&mut self, _exit_status: i32) {}

    fn on_debug(&mut self, _text: &str) {}

    /// Route `event` to its method. Wrappers override this to see everything.
    fn handle(&mut self, event: &Event) {
        match event {
            Event::Value { line, text } => self.on_value(*line, text),
            Event::Exception { line, class_name, message, backtrace } => {
                self.on_exception(*line, class_name, message, backtrace)
            }
            Event::Stdout { text } => self.on_stdout(text),
            Event::Finished { exit_status } => self.on_finished(*exit_status),
            Event::Debug { text } => self.on_debug(text),
        }
    }
}

impl<H: EventHandler + ?Sized> EventHandler for &mut H {
    fn on_value(&mut self, line: usize, text: &str) {
        (**self).on_value(line, text)
    }

    fn on_exception(&mut self, line: usize, class_name: &str, message: &str, backtrace: &[String]) {
        (**self).on_exception(line, class_name, message, backtrace)
    }

    fn on_stdout(&mut self, text: &str) {
        (**self).on_stdout(text)
    }

    fn on_finished(&mut self, exit_status: i32) {
        (**self).on_finished(exit_status)
    }

    fn on_debug(&mut self, text: &str) {
        (**self).on_debug(text)
    }

    fn handle(&mut self, event: &Event) {
        (**self).handle(event)
    }
}

impl<H: EventHandler + ?Sized> EventHandler for Box<H> {
    fn on_value(&mut self, line: usize, text: &str) {
        (**self).on_value(line, text)
    }

    fn on_exception(&mut self, line: usize, class_name: &str, message: &str, backtrace: &[String]) {
        (**self).on_exception(line, class_name, message, backtrace)
    }

    fn on_stdout(&mut self, text: &str) {
        (**self).on_stdout(text)
    }

    fn on_finished(&mut self, exit_status: i32) {
        (**self).on_finished(exit_status)
    }

    fn on_debug(&mut self, text: &str) {
        (**self).on_debug(text)
    }

    fn handle(&mut self, event: &Event) {
        (**self).handle(event)
    }
}

/// Forwards every event to each inner handler, in order.
#[derive(Default)]
pub struct CompositeHandler<'a> {
    handlers: Vec<Box<dyn EventHandler + 'a>>,
}

impl<'a> CompositeHandler<'a> {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn with(mut self, handler: impl EventHandler + 'a) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for CompositeHandler<'_> {
    fn handle(&mut self, event: &Event) {
        for handler in &mut self.handlers {
            handler.handle(event);
        }
    }
}

/// Logs each event at `debug` level, then hands it to the wrapped handler.
pub struct DebugHandler<H> {
    inner: H,
    seen: usize,
}

impl<H: EventHandler> DebugHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner, seen: 0 }
    }

    pub fn into_inner(self) -> H {
        self.inner
    }

    pub fn seen(&self) -> usize {
        self.seen
    }
}

impl<H: EventHandler> EventHandler for DebugHandler<H> {
    fn handle(&mut self, event: &Event) {
        self.seen += 1;
        match event {
            Event::Value { line, text } => tracing::debug!(line, %text, "value"),
            Event::Exception { line, class_name, message, .. } => {
                tracing::debug!(line, %class_name, %message, "exception")
            }
            Event::Stdout { text } => tracing::debug!(bytes = text.len(), "stdout"),
            Event::Finished { exit_status } => tracing::debug!(exit_status, "finished"),
            Event::Debug { text } => tracing::debug!(%text, "program debug"),
        }
        self.inner.handle(event);
    }
}
