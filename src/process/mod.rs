//! Interpreter process management (startup/IO/teardown).

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::EvalOptions;
use crate::error::Result;
use crate::events::EventHandler;

pub mod ruby;

pub use ruby::RubyRunner;

/// The program stopped without reporting that it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnexpectedExit {
    pub status: Option<i32>,
    pub stderr: String,
    pub reason: String,
}

impl fmt::Display for UnexpectedExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (exit status {code})", self.reason)?,
            None => write!(f, "{} (killed by signal)", self.reason)?,
        }
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            write!(f, "\n{stderr}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program reported `finished`, whatever its exit status.
    Completed,
    TimedOut,
    Crashed(UnexpectedExit),
}

/// Runs an instrumented body, feeding every event to `handler`.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, body: &str, options: &EvalOptions, handler: &mut dyn EventHandler) -> Result<RunOutcome>;
}
