//! Run a Ruby program and annotate each line with the values it produced.
//!
//! ```no_run
//! # async fn demo() -> linewise::Result<()> {
//! use linewise::{AnnotateOptions, Engine, EvalOptions, Program};
//!
//! let mut engine = Engine::new(Program::new("1 + 1\n"), EvalOptions::new(), AnnotateOptions::default());
//! engine.evaluate().await?;
//! assert_eq!(engine.annotated_body()?, "1 + 1  # => 2\n");
//! # Ok(())
//! # }
//! ```

pub mod annotate;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod instrument;
pub mod process;
pub mod program;

pub use annotate::{annotate, hidden_lines, remove_annotations, Alignment, AnnotateOptions};
pub use config::{Config, EvalOptions};
pub use engine::{Engine, Outcome};
pub use error::{Error, Result};
pub use events::{CompositeHandler, DebugHandler, Event, EventHandler};
pub use execution::{Capture, EvalResult, LineResult, UpdateResult};
pub use instrument::{check_syntax, instrument, Markers, SyntaxError};
pub use process::{RubyRunner, RunOutcome, Runner, UnexpectedExit};
pub use program::Program;
