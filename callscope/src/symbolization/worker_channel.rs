//! One symbolizer subprocess and its request/response pairing
//!
//! The symbolizer reads one hex offset per line and answers each with two
//! lines, the function name and `file:line`. Answers come back strictly in
//! request order and carry no identifier, so the channel keeps the submitted
//! offsets in a FIFO and pairs the n-th answer with the n-th offset.
//!
//! ```text
//!   submit(o) ──► [ o3 | o2 | o1 ] ──► drainer ──► Resolution { o1, sym, loc }
//!       │          bounded FIFO (K)       ▲
//!       ▼                                 │
//!   stdin "o\n" ──► symbolizer ──► stdout "sym\nloc\n"
//! ```
//!
//! The drainer reads a full answer before taking its offset out of the FIFO,
//! so a request occupies its slot from `Sent` until `Delivered` and at most K
//! requests are ever unanswered. `submit` waits for a free slot.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::tool::SymbolizerTool;
use crate::domain::{ChannelError, RequestState};

/// Raw symbolizer answer for one file offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub offset: u64,
    pub symbol: String,
    pub location: String,
}

type Drainer = JoinHandle<Result<Vec<Resolution>, ChannelError>>;

/// A running symbolizer bound to one object file
pub struct WorkerChannel {
    object: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    pending: Option<mpsc::Sender<u64>>,
    drainer: Option<Drainer>,
    submitted: usize,
}

impl WorkerChannel {
    /// Spawn the symbolizer for `object`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`ChannelError::ToolNotFound`] if the program is missing and
    /// [`ChannelError::Spawn`] for any other spawn failure.
    pub fn open(tool: &SymbolizerTool, object: &Path) -> Result<Self, ChannelError> {
        let mut child = Command::new(tool.program())
            .args(tool.args_for(object))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ChannelError::ToolNotFound { command: tool.command().to_string() }
                } else {
                    ChannelError::Spawn { command: tool.command().to_string(), source }
                }
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ChannelError::Spawn {
                command: tool.command().to_string(),
                source: std::io::Error::other("symbolizer pipes not captured"),
            });
        };

        let (pending_tx, pending_rx) = mpsc::channel(tool.max_in_flight());
        let drainer = tokio::spawn(drain_responses(
            BufReader::new(stdout).lines(),
            pending_rx,
            tool.read_timeout(),
        ));

        debug!(
            "Started {} (pid {:?}) for {}",
            tool.command(),
            child.id(),
            object.display()
        );

        Ok(Self {
            object: object.to_path_buf(),
            child,
            stdin: Some(stdin),
            pending: Some(pending_tx),
            drainer: Some(drainer),
            submitted: 0,
        })
    }

    #[must_use]
    pub fn object(&self) -> &Path {
        &self.object
    }

    /// Number of offsets submitted so far
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Queue `offset` for resolution, waiting while K requests are unanswered.
    ///
    /// On error the subprocess has been killed and the channel must be dropped.
    ///
    /// # Errors
    /// Returns the drainer's error if the symbolizer stopped answering, or an
    /// I/O error if the request could not be written.
    pub async fn submit(&mut self, offset: u64) -> Result<(), ChannelError> {
        trace!("{}: 0x{offset:x} {}", self.object.display(), RequestState::AwaitingCapacity);
        let reserved = match &self.pending {
            Some(pending) => pending.send(offset).await.is_ok(),
            None => {
                return Err(ChannelError::Protocol {
                    state: RequestState::AwaitingCapacity,
                    detail: "submit after the channel was closed".to_string(),
                })
            }
        };
        if !reserved {
            // The drainer dropped its end of the FIFO, so it holds the real failure
            return Err(self.fail(None).await);
        }

        let request = format!("{offset:x}\n");
        let written = match self.stdin.as_mut() {
            Some(stdin) => write_request(stdin, &request).await,
            None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        };
        if let Err(source) = written {
            let cause = ChannelError::Io { state: RequestState::Sent, source };
            return Err(self.fail(Some(cause)).await);
        }

        self.submitted += 1;
        trace!("{}: 0x{offset:x} {}", self.object.display(), RequestState::Sent);
        Ok(())
    }

    /// Signal end of input, collect every outstanding answer and wait for exit.
    ///
    /// Answers are returned in submission order.
    ///
    /// # Errors
    /// Returns [`ChannelError::Process`] if the symbolizer exits before
    /// answering everything or exits unsuccessfully, and
    /// [`ChannelError::Protocol`] for malformed answers.
    pub async fn close(mut self) -> Result<Vec<Resolution>, ChannelError> {
        self.finish().await
    }

    /// [`close`](Self::close) without consuming the channel.
    ///
    /// Cancel safe: if the future is dropped the channel can still be
    /// [`abort`](Self::abort)ed, which stops the drainer and reaps the child.
    pub(crate) async fn finish(&mut self) -> Result<Vec<Resolution>, ChannelError> {
        self.stdin = None;
        self.pending = None;

        let Some(drainer) = self.drainer.as_mut() else {
            return Err(ChannelError::Protocol {
                state: RequestState::Delivered,
                detail: "channel already failed".to_string(),
            });
        };

        // Stays in `self` while awaited, so a dropped finish leaves it abortable
        let drained = join_drainer(drainer).await;
        self.drainer = None;
        match drained {
            Ok(results) => {
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|source| ChannelError::Io { state: RequestState::Delivered, source })?;
                if !status.success() {
                    return Err(ChannelError::Process { exit_code: status.code(), outstanding: 0 });
                }
                debug!("{}: {} offsets resolved", self.object.display(), results.len());
                Ok(results)
            }
            Err(err) => {
                let status = self.kill_and_reap().await;
                Err(with_exit_status(err, status))
            }
        }
    }

    /// Kill the subprocess and stop the drainer, discarding pending answers.
    pub async fn abort(mut self) {
        self.stdin = None;
        self.pending = None;
        self.kill_and_reap().await;
        if let Some(drainer) = self.drainer.take() {
            drainer.abort();
            let _ = drainer.await;
        }
        debug!("{}: symbolizer aborted", self.object.display());
    }

    async fn fail(&mut self, cause: Option<ChannelError>) -> ChannelError {
        self.stdin = None;
        self.pending = None;
        let status = self.kill_and_reap().await;

        let drained = match self.drainer.as_mut() {
            Some(drainer) => join_drainer(drainer).await,
            None => Ok(Vec::new()),
        };
        self.drainer = None;
        let err = match (drained, cause) {
            // An early exit explains a failed write better than EPIPE does
            (Err(err @ ChannelError::Process { .. }), _) | (Err(err), None) => err,
            (_, Some(cause)) => cause,
            (Ok(_), None) => ChannelError::Process { exit_code: None, outstanding: 0 },
        };
        with_exit_status(err, status)
    }

    /// Best-effort kill; an already exited process is not an error.
    async fn kill_and_reap(&mut self) -> Option<ExitStatus> {
        if let Err(err) = self.child.start_kill() {
            trace!("{}: kill skipped: {err}", self.object.display());
        }
        self.child.wait().await.ok()
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        // The child goes with kill_on_drop, but a grandchild may hold stdout open
        if let Some(drainer) = self.drainer.take() {
            drainer.abort();
        }
    }
}

async fn write_request(stdin: &mut ChildStdin, request: &str) -> std::io::Result<()> {
    stdin.write_all(request.as_bytes()).await?;
    stdin.flush().await
}

async fn join_drainer(drainer: &mut Drainer) -> Result<Vec<Resolution>, ChannelError> {
    match drainer.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
        Err(_) => Err(ChannelError::Cancelled),
    }
}

/// Fill in the exit code the drainer could not observe.
fn with_exit_status(err: ChannelError, status: Option<ExitStatus>) -> ChannelError {
    match err {
        ChannelError::Process { exit_code: None, outstanding } => ChannelError::Process {
            exit_code: status.and_then(|status| status.code()),
            outstanding,
        },
        other => other,
    }
}

/// Pair answers from `stdout` with offsets from `pending` until both end.
async fn drain_responses(
    mut stdout: Lines<BufReader<ChildStdout>>,
    mut pending: mpsc::Receiver<u64>,
    read_timeout: Option<Duration>,
) -> Result<Vec<Resolution>, ChannelError> {
    let mut results = Vec::new();

    loop {
        let mut state = RequestState::AwaitingSymbolLine;
        let Some(symbol) = read_response_line(&mut stdout, &pending, state, read_timeout).await?
        else {
            return match pending.recv().await {
                None => Ok(results),
                Some(_) => {
                    Err(ChannelError::Process { exit_code: None, outstanding: pending.len() + 1 })
                }
            };
        };

        state = RequestState::AwaitingLocationLine;
        let Some(location) = read_response_line(&mut stdout, &pending, state, read_timeout).await?
        else {
            return Err(ChannelError::Process { exit_code: None, outstanding: pending.len() });
        };
        if !location.contains(':') {
            return Err(ChannelError::Protocol {
                state,
                detail: format!("expected file:line, got {location:?}"),
            });
        }

        state = RequestState::Delivered;
        let Some(offset) = pending.recv().await else {
            return Err(ChannelError::Protocol {
                state,
                detail: format!("answer {symbol:?} / {location:?} without a request"),
            });
        };
        trace!("0x{offset:x} {state}: {symbol} at {location}");
        results.push(Resolution { offset, symbol, location });
    }
}

/// Read one trimmed answer line; `None` at end of output.
///
/// With a `limit`, fails once a whole window of that length passes with a
/// request outstanding and no output. Idle channels wait indefinitely.
async fn read_response_line(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    pending: &mpsc::Receiver<u64>,
    state: RequestState,
    limit: Option<Duration>,
) -> Result<Option<String>, ChannelError> {
    let next = match limit {
        Some(limit) => loop {
            let busy = !pending.is_empty();
            // next_line is cancel safe, a partial line survives the timeout
            match tokio::time::timeout(limit, stdout.next_line()).await {
                Ok(next) => break next,
                Err(_) if busy => {
                    return Err(ChannelError::Timeout { state, seconds: limit.as_secs() })
                }
                Err(_) => {}
            }
        },
        None => stdout.next_line().await,
    };
    let Some(line) = next.map_err(|source| ChannelError::Io { state, source })? else {
        return Ok(None);
    };

    let line = line.trim();
    if line.is_empty() {
        return Err(ChannelError::Protocol { state, detail: "empty line".to_string() });
    }
    Ok(Some(line.to_string()))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// A symbolizer whose background child keeps stdout open after it is killed
    fn lingering_symbolizer(dir: &Path) -> SymbolizerTool {
        let path = dir.join("addr2line");
        std::fs::write(&path, "#!/bin/sh
sleep 5 &
wait
").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        SymbolizerTool::locate(path.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_dropping_a_closing_channel_stops_its_drainer() {
        let dir = tempfile::tempdir().unwrap();
        let tool = lingering_symbolizer(dir.path());
        let mut channel = WorkerChannel::open(&tool, &dir.path().join("libfoo.so")).unwrap();
        let drainer = channel.drainer.as_ref().unwrap().abort_handle();

        let finished = tokio::time::timeout(Duration::from_millis(100), channel.finish()).await;
        assert!(finished.is_err(), "nothing should end the drain yet");
        assert!(channel.drainer.is_some());
        assert!(!drainer.is_finished());

        drop(channel);
        tokio::time::timeout(Duration::from_secs(2), async {
            while !drainer.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("drainer outlived its channel");
    }

    #[tokio::test]
    async fn test_abort_after_interrupted_finish_reaps_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let tool = lingering_symbolizer(dir.path());
        let mut channel = WorkerChannel::open(&tool, &dir.path().join("libfoo.so")).unwrap();
        let pid = channel.child.id().unwrap();
        let drainer = channel.drainer.as_ref().unwrap().abort_handle();

        let finished = tokio::time::timeout(Duration::from_millis(100), channel.finish()).await;
        assert!(finished.is_err());

        channel.abort().await;
        assert!(drainer.is_finished());
        assert!(!Path::new(&format!("/proc/{pid}")).exists(), "child {pid} not reaped");
    }
}
