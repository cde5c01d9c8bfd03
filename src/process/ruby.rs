//! Ruby interpreter bootstrap and event I/O.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
    time::timeout,
};

use super::{RunOutcome, Runner, UnexpectedExit};
use crate::config::{EvalOptions, DEFAULT_FILENAME};
use crate::error::{Error, Result};
use crate::events::{next_event, Event, EventHandler, StreamEnd};

/// Runtime support loaded into the child before the program.
pub const PRELUDE: &str = include_str!("prelude.rb");
const PRELUDE_NAME: &str = "linewise_prelude.rb";

/// Wait this long for a process to exit on its own before killing it.
const REAP_GRACE: Duration = Duration::from_secs(2);
const PIPE_GRACE: Duration = Duration::from_millis(500);

pub const ENV_PORT: &str = "LINEWISE_EVENT_PORT";
pub const ENV_PROGRAM: &str = "LINEWISE_PROGRAM";
pub const ENV_TRACE: &str = "LINEWISE_TRACE";

/// Runs programs with a real interpreter, one process per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RubyRunner;

impl RubyRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for RubyRunner {
    async fn run(&self, body: &str, options: &EvalOptions, handler: &mut dyn EventHandler) -> Result<RunOutcome> {
        let dir = tempfile::Builder::new().prefix("linewise").tempdir()?;
        let prelude = dir.path().join(PRELUDE_NAME);
        std::fs::write(&prelude, PRELUDE)?;
        let file_name = options
            .filename
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_FILENAME.into());
        let program = dir.path().join(file_name);
        std::fs::write(&program, body)?;

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, options.port));
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind { addr, source })?;
        let port = listener.local_addr()?.port();

        let mut child = command(options, dir.path(), &prelude, &program, port)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: options.interpreter.clone(),
                source,
            })?;
        tracing::debug!(pid = ?child.id(), port, program = %program.display(), "interpreter started");

        if let Some(mut stdin) = child.stdin.take() {
            let payload = options.stdin.clone().into_bytes();
            tokio::spawn(async move {
                // The program may exit without reading all of it.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::trace!(error = %e, "stdin closed early");
                }
            });
        }
        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let stdout = child.stdout.take();

        let exchanged = if options.timeout.is_zero() {
            exchange(&listener, &mut child, stdout, handler).await?
        } else {
            match timeout(options.timeout, exchange(&listener, &mut child, stdout, handler)).await {
                Ok(exchanged) => exchanged?,
                Err(_) => {
                    tracing::debug!(timeout = ?options.timeout, "evaluation timed out, killing interpreter");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill interpreter");
                    }
                    return Ok(RunOutcome::TimedOut);
                }
            }
        };

        let status = exchanged.status;
        tracing::debug!(?status, finished = exchanged.finished, "interpreter exited");
        if exchanged.finished {
            return Ok(RunOutcome::Completed);
        }
        let reason = match exchanged.end {
            None => "program exited before connecting".to_string(),
            Some(StreamEnd::Closed) => "program exited before reporting completion".to_string(),
            Some(StreamEnd::Truncated { bytes }) => format!("event stream cut off after {bytes} bytes of a frame"),
            Some(StreamEnd::Malformed { error, .. }) => format!("malformed event frame: {error}"),
        };
        Ok(RunOutcome::Crashed(UnexpectedExit {
            status: status.code(),
            stderr: collect(stderr).await,
            reason,
        }))
    }
}

fn command(options: &EvalOptions, dir: &Path, prelude: &Path, program: &Path, port: u16) -> Command {
    let mut cmd = Command::new(&options.interpreter);
    cmd.arg("-I").arg(dir);
    for path in &options.load_path_dirs {
        cmd.arg("-I").arg(path);
    }
    cmd.arg("-r").arg(prelude);
    for lib in &options.require_files {
        cmd.arg("-r").arg(lib);
    }
    if let Some(encoding) = &options.encoding {
        cmd.arg("-E").arg(encoding);
    }
    cmd.arg(program)
        .env(ENV_PORT, port.to_string())
        .env(ENV_PROGRAM, program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if options.debug {
        cmd.env(ENV_TRACE, "1");
    }
    cmd
}

struct Exchanged {
    /// How the event stream ended; `None` when the program never connected.
    end: Option<StreamEnd>,
    finished: bool,
    status: ExitStatus,
}

async fn exchange(
    listener: &TcpListener,
    child: &mut Child,
    mut stdout: Option<ChildStdout>,
    handler: &mut dyn EventHandler,
) -> Result<Exchanged> {
    let mut chunk = vec![0u8; 8192];
    let mut pending = Vec::new();
    let stream = tokio::select! {
        accepted = listener.accept() => accepted?.0,
        status = child.wait() => {
            let status = status?;
            drain(&mut stdout, &mut chunk, &mut pending, handler).await;
            return Ok(Exchanged { end: None, finished: false, status });
        }
    };

    let mut events = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    let mut finished = false;
    let end = loop {
        tokio::select! {
            frame = next_event(&mut events, &mut buf) => match frame? {
                None => break StreamEnd::Closed,
                Some(Ok(event)) => {
                    finished |= matches!(event, Event::Finished { .. });
                    handler.handle(&event);
                }
                Some(Err(end)) => {
                    tracing::warn!(?end, "event stream ended abnormally");
                    break end;
                }
            },
            read = read_chunk(&mut stdout, &mut chunk) => match read {
                Ok(0) | Err(_) => {
                    flush(&mut pending, handler);
                    stdout = None;
                }
                Ok(n) => {
                    let text = decode_chunk(&mut pending, &chunk[..n]);
                    if !text.is_empty() {
                        handler.on_stdout(&text);
                    }
                }
            },
        }
    };

    let status = reap(child).await?;
    drain(&mut stdout, &mut chunk, &mut pending, handler).await;
    Ok(Exchanged { end: Some(end), finished, status })
}

async fn read_chunk(stdout: &mut Option<ChildStdout>, chunk: &mut [u8]) -> std::io::Result<usize> {
    match stdout {
        Some(out) => out.read(chunk).await,
        None => std::future::pending().await,
    }
}

/// Forward whatever is left on the stdout pipe of an exited child.
async fn drain(
    stdout: &mut Option<ChildStdout>,
    chunk: &mut [u8],
    pending: &mut Vec<u8>,
    handler: &mut dyn EventHandler,
) {
    if let Some(out) = stdout.as_mut() {
        loop {
            match timeout(PIPE_GRACE, out.read(chunk)).await {
                Ok(Ok(n)) if n > 0 => {
                    let text = decode_chunk(pending, &chunk[..n]);
                    if !text.is_empty() {
                        handler.on_stdout(&text);
                    }
                }
                _ => break,
            }
        }
    }
    *stdout = None;
    flush(pending, handler);
}

/// Decode a stdout read. An incomplete UTF-8 sequence at the end is held in
/// `pending` until the next read completes it.
fn decode_chunk(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    let mut text = String::with_capacity(pending.len());
    loop {
        let (valid, invalid) = match std::str::from_utf8(pending) {
            Ok(_) => (pending.len(), None),
            Err(e) => (e.valid_up_to(), e.error_len()),
        };
        text.push_str(&String::from_utf8_lossy(&pending[..valid]));
        match invalid {
            Some(len) => {
                text.push(char::REPLACEMENT_CHARACTER);
                pending.drain(..valid + len);
            }
            None => {
                pending.drain(..valid);
                return text;
            }
        }
    }
}

/// Emit bytes still held back once stdout has closed.
fn flush(pending: &mut Vec<u8>, handler: &mut dyn EventHandler) {
    if !pending.is_empty() {
        handler.on_stdout(&String::from_utf8_lossy(pending));
        pending.clear();
    }
}

async fn reap(child: &mut Child) -> Result<ExitStatus> {
    match timeout(REAP_GRACE, child.wait()).await {
        Ok(status) => Ok(status?),
        Err(_) => {
            tracing::debug!("interpreter still running after its event stream closed, killing it");
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}

async fn collect(stderr: Option<JoinHandle<String>>) -> String {
    match stderr {
        Some(task) => match timeout(PIPE_GRACE, task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        },
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpStream;

    use super::*;
    use crate::execution::{EvalResult, UpdateResult};

    /// Run `exchange` against a stand-in child while a peer writes `frames`.
    async fn exchange_frames(frames: &'static [u8]) -> (Exchanged, EvalResult) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut child = Command::new("sleep")
            .arg("1")
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take();
        let peer = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(frames).await.unwrap();
        });
        let mut store = UpdateResult::new(None);
        let exchanged = exchange(&listener, &mut child, stdout, &mut store).await.unwrap();
        peer.await.unwrap();
        (exchanged, store.into_result())
    }

    #[tokio::test]
    async fn exchange_dispatches_until_finished() {
        let (exchanged, result) = exchange_frames(
            b"{\"event\":\"value\",\"line\":1,\"text\":\"2\"}\n{\"event\":\"stdout\",\"text\":\"hi\"}\n{\"event\":\"finished\",\"exit_status\":0}\n",
        )
        .await;
        assert!(exchanged.finished);
        assert_eq!(exchanged.end, Some(StreamEnd::Closed));
        assert_eq!(result.values_at(1), vec!["2"]);
        assert_eq!(result.stdout, "hi");
    }

    #[tokio::test]
    async fn exchange_reports_a_cut_off_frame() {
        let (exchanged, result) = exchange_frames(b"{\"event\":\"value\",\"line\":1,\"text\":\"2\"}\n{\"event\":\"fin").await;
        assert!(!exchanged.finished);
        assert_eq!(exchanged.end, Some(StreamEnd::Truncated { bytes: 13 }));
        assert_eq!(result.values_at(1), vec!["2"]);
    }

    #[tokio::test]
    async fn exchange_stops_at_a_malformed_frame() {
        let (exchanged, result) = exchange_frames(b"garbage\n{\"event\":\"finished\",\"exit_status\":0}\n").await;
        assert!(!exchanged.finished);
        assert!(matches!(exchanged.end, Some(StreamEnd::Malformed { .. })));
        assert!(!result.finished);
    }

    #[tokio::test]
    async fn exchange_without_a_connection_ends_with_the_child() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut child = Command::new("sh")
            .args(["-c", "printf out"])
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take();
        let mut store = UpdateResult::new(None);
        let exchanged = exchange(&listener, &mut child, stdout, &mut store).await.unwrap();
        assert_eq!(exchanged.end, None);
        assert!(exchanged.status.success());
        assert_eq!(store.into_result().stdout, "out");
    }

    #[tokio::test]
    async fn timed_out_exchange_leaves_a_killable_child() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let mut child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        let mut store = UpdateResult::new(None);
        let waited = timeout(Duration::from_millis(100), exchange(&listener, &mut child, None, &mut store)).await;
        assert!(waited.is_err());
        child.kill().await.unwrap();
        assert!(!child.wait().await.unwrap().success());
    }

    #[test]
    fn split_multibyte_output_is_reassembled() {
        let bytes = "añb".as_bytes();
        let mut pending = Vec::new();
        assert_eq!(decode_chunk(&mut pending, &bytes[..2]), "a");
        assert_eq!(pending, vec![0xC3]);
        assert_eq!(decode_chunk(&mut pending, &bytes[2..]), "ñb");
        assert!(pending.is_empty());
    }

    #[test]
    fn invalid_output_bytes_are_replaced() {
        let mut pending = Vec::new();
        assert_eq!(decode_chunk(&mut pending, b"a\xFFb"), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[test]
    fn held_back_bytes_are_flushed_at_close() {
        let mut pending = vec![0xE2, 0x82];
        let mut store = UpdateResult::new(None);
        flush(&mut pending, &mut store);
        assert!(pending.is_empty());
        assert_eq!(store.into_result().stdout, "\u{FFFD}");
    }

    #[test]
    fn command_line_order() {
        let options = EvalOptions {
            load_path_dirs: vec!["lib".into()],
            require_files: vec!["set".into()],
            encoding: Some("UTF-8".into()),
            ..EvalOptions::new()
        };
        let cmd = command(&options, Path::new("/tmp/d"), Path::new("/tmp/d/p.rb"), Path::new("/tmp/d/program.rb"), 4000);
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "ruby");
        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-I", "/tmp/d", "-I", "lib", "-r", "/tmp/d/p.rb", "-r", "set", "-E", "UTF-8", "/tmp/d/program.rb"]
        );
        let envs: Vec<_> = std
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into_owned(), v?.to_string_lossy().into_owned())))
            .collect();
        assert!(envs.contains(&(ENV_PORT.to_string(), "4000".to_string())));
        assert!(!envs.iter().any(|(k, _)| k == ENV_TRACE));
    }

    #[test]
    fn prelude_defines_the_recorder() {
        assert!(PRELUDE.contains("def record_result(line, value)"));
        assert!(PRELUDE.contains(ENV_PORT));
        assert!(PRELUDE.contains(ENV_PROGRAM));
        assert!(!PRELUDE.contains("CAPTURE_CAP"));
    }
}
