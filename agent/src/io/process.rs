//! Child process execution with a wall-clock limit and bounded output capture.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// A descendant kept a pipe open past the drain grace; output is incomplete.
    pub abandoned: bool,
}

impl CommandOutput {
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Render stdout and stderr as a single log, noting truncation and timeouts.
    pub fn render_log(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        match self.status.code() {
            Some(code) => buf.push_str(&format!("\n[exit code {code}]\n")),
            None => buf.push_str("\n[terminated by signal]\n"),
        }
        if self.timed_out {
            buf.push_str("[timed out]\n");
        }
        if self.abandoned {
            buf.push_str("[output abandoned: pipe held open by a descendant]\n");
        }
        buf
    }
}

/// Time allowed for the output readers to see EOF once the child has been reaped.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is closed. Output is read concurrently while the child runs. `output_limit_bytes` bounds
/// the amount of stdout/stderr stored in memory (bytes beyond this are discarded while still
/// draining the pipe). On unix the child leads its own process group, and the whole group is
/// killed once the child is reaped, so background descendants cannot outlive the call. On timeout
/// `timed_out` is set; callers must not trust its output.
///
/// Returns within `timeout` plus a short drain grace even when a descendant escaped the group and
/// still holds the pipes; that reader is abandoned and its output counted as `abandoned`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => {
            kill_group(&child);
            status
        }
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_group(&child);
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let stdout = collect_output(&stdout_rx, drain_deadline).context("collect stdout")?;
    let stderr = collect_output(&stderr_rx, drain_deadline).context("collect stderr")?;
    let abandoned = stdout.abandoned || stderr.abandoned;
    if abandoned {
        warn!("output pipe still held open by a detached descendant, abandoning reader");
    }

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        timed_out,
        abandoned,
    })
}

/// Kill every process left in the child's group. The child must still be unreaped or
/// have just been reaped; a group that is already gone is not an error.
#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        warn!(pid = child.id(), "child pid out of range, not killing its group");
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid, err = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

struct StreamOutput {
    bytes: Vec<u8>,
    truncated: usize,
    abandoned: bool,
}

fn spawn_reader<R>(reader: R, limit: usize) -> Receiver<Result<(Vec<u8>, usize)>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only when the reader was abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn collect_output(
    rx: &Receiver<Result<(Vec<u8>, usize)>>,
    deadline: Instant,
) -> Result<StreamOutput> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => {
            let (bytes, truncated) = result?;
            Ok(StreamOutput {
                bytes,
                truncated,
                abandoned: false,
            })
        }
        Err(RecvTimeoutError::Timeout) => Ok(StreamOutput {
            bytes: Vec::new(),
            truncated: 0,
            abandoned: true,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
