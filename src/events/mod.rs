//! Event stream between the running program and the controller.
//!
//! Every frame is one JSON object on one line, tagged by `"event"`:
//!
//! ```text
//! {"event":"value","line":3,"text":"[1, 2]"}
//! {"event":"exception","line":5,"class_name":"RuntimeError","message":"boom","backtrace":[]}
//! {"event":"stdout","text":"hello\n"}
//! {"event":"finished","exit_status":0}
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub mod handler;

pub use handler::{CompositeHandler, DebugHandler, EventHandler};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Value {
        line: usize,
        text: String,
    },
    Exception {
        line: usize,
        class_name: String,
        message: String,
        #[serde(default)]
        backtrace: Vec<String>,
    },
    Stdout {
        text: String,
    },
    Finished {
        #[serde(default)]
        exit_status: i32,
    },
    Debug {
        text: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Value { .. } => "value",
            Event::Exception { .. } => "exception",
            Event::Stdout { .. } => "stdout",
            Event::Finished { .. } => "finished",
            Event::Debug { .. } => "debug",
        }
    }

    /// Encode as a single frame, newline included.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        let mut frame = serde_json::to_string(self)?;
        frame.push('\n');
        Ok(frame)
    }

    pub fn from_frame(frame: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(frame)
    }
}

/// How a stream of frames ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The peer closed the connection on a frame boundary.
    Closed,
    /// The connection closed in the middle of a frame.
    Truncated { bytes: usize },
    /// A complete frame that is not a valid event.
    Malformed { frame: String, error: String },
}

/// Read one frame. `Ok(None)` once the reader is exhausted.
///
/// Cancel safe: bytes of an interrupted read stay in `buf` and the next call
/// continues the same frame.
pub async fn next_event<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<Result<Event, StreamEnd>>>
where
    R: AsyncBufRead + Unpin,
{
    reader.read_until(b'\n', buf).await?;
    let parsed = parse_frame(buf);
    buf.clear();
    Ok(parsed)
}

fn parse_frame(buf: &[u8]) -> Option<Result<Event, StreamEnd>> {
    if buf.is_empty() {
        return None;
    }
    if buf.last() != Some(&b'\n') {
        return Some(Err(StreamEnd::Truncated { bytes: buf.len() }));
    }
    let frame = &buf[..buf.len() - 1];
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
    if frame.is_empty() {
        return Some(Err(StreamEnd::Malformed {
            frame: String::new(),
            error: "empty frame".into(),
        }));
    }
    Some(Event::from_frame(frame).map_err(|e| StreamEnd::Malformed {
        frame: String::from_utf8_lossy(frame).into_owned(),
        error: e.to_string(),
    }))
}

/// Dispatch every frame of `reader` to `handler`, strictly in arrival order.
pub async fn read_events<R>(reader: &mut R, handler: &mut dyn EventHandler) -> std::io::Result<StreamEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    loop {
        match next_event(reader, &mut buf).await? {
            None => return Ok(StreamEnd::Closed),
            Some(Ok(event)) => handler.handle(&event),
            Some(Err(end)) => {
                tracing::warn!(?end, "event stream ended abnormally");
                return Ok(end);
            }
        }
    }
}
