// src/exec/process.rs

//! Child process runner with a hard wall-clock timeout.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exec::sandbox::SandboxHandle;

/// How long to wait for the stdout/stderr readers after the child has been
/// reaped. Orphaned grandchildren can keep a pipe open indefinitely; once
/// the grace expires they are killed and whatever was read is kept.
const READER_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a finished (or killed) child process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code; a death by signal `n` is reported as `128 + n`.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// The timeout fired and the process tree was killed.
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run a whitespace-split `command` inside `sandbox`.
///
/// No shell is involved: quotes, pipes and globs are passed through as
/// literal arguments.
pub async fn run_in_sandbox(
    sandbox: &SandboxHandle,
    command: &str,
    working_dir: &Path,
    timeout: Duration,
) -> Result<ProcessOutcome, ExecError> {
    let mut argv = command.split_whitespace();
    let program = argv.next().ok_or(ExecError::EmptyCommand)?;
    let args: Vec<&str> = argv.collect();

    run_argv(program, &args, &sandbox.env_vars(), working_dir, timeout).await
}

/// Spawn `program args...` in `working_dir` with extra environment `envs`,
/// wait up to `timeout`, and capture both output streams in full.
///
/// On timeout the child's whole process group is killed and the returned
/// outcome has `timed_out = true`.
pub async fn run_argv<S: AsRef<std::ffi::OsStr>>(
    program: &str,
    args: &[S],
    envs: &[(String, String)],
    working_dir: &Path,
    timeout: Duration,
) -> Result<ProcessOutcome, ExecError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so a timeout can take down everything the command
    // started.
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(program, cwd = ?working_dir, ?timeout, "spawning process");

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let pid = child.id();
    let stdout_reader = child.stdout.take().map(OutputReader::spawn);
    let stderr_reader = child.stderr.take().map(OutputReader::spawn);

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (
            status.map_err(|source| ExecError::Wait {
                program: program.to_string(),
                source,
            })?,
            false,
        ),
        Err(_elapsed) => {
            info!(program, ?timeout, "process exceeded timeout; killing process tree");
            kill_process_tree(&mut child).await;
            let status = child.wait().await.map_err(|source| ExecError::Wait {
                program: program.to_string(),
                source,
            })?;
            (status, true)
        }
    };

    let deadline = tokio::time::Instant::now() + READER_GRACE;
    let (stdout, stdout_open) = OutputReader::finish(stdout_reader, deadline).await;
    let (stderr, stderr_open) = OutputReader::finish(stderr_reader, deadline).await;
    if stdout_open || stderr_open {
        warn!(
            program,
            "output pipe still open after process exit; killing leftover processes"
        );
        kill_group(pid);
    }
    let exit_code = exit_code_of(status);

    debug!(program, exit_code, timed_out, "process finished");

    Ok(ProcessOutcome {
        exit_code,
        stdout,
        stderr,
        timed_out,
        elapsed: started.elapsed(),
    })
}

/// Background reader for one output pipe.
///
/// Bytes land in a shared buffer as they arrive, so output read before the
/// reader is abandoned is never lost.
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R: AsyncRead + Unpin + Send + 'static>(stream: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = tokio::spawn(read_stream(stream, Arc::clone(&buf)));
        Self { buf, handle }
    }

    /// Wait for EOF until `deadline`. Returns the captured text and whether
    /// the pipe was still open when the reader was abandoned.
    async fn finish(reader: Option<Self>, deadline: tokio::time::Instant) -> (String, bool) {
        let Some(mut reader) = reader else {
            return (String::new(), false);
        };

        let still_open = match tokio::time::timeout_at(deadline, &mut reader.handle).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(error = %e, "output reader task failed; keeping partial output");
                false
            }
            Err(_) => {
                reader.handle.abort();
                true
            }
        };

        let text = String::from_utf8_lossy(&lock(&reader.buf)).into_owned();
        (text, still_open)
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut stream: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "error reading child output; keeping partial output");
                break;
            }
        }
    }
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn kill_process_tree(child: &mut Child) {
    kill_group(child.id());

    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already gone when killing");
    }
}

/// SIGKILL the process group led by `pid` (the child was spawned as its
/// own group leader).
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    // -1 is reserved for "never executed".
    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cwd() -> std::path::PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn captures_exit_code_and_both_streams() {
        let outcome = run_argv(
            "sh",
            &["-c", "echo out; echo err >&2; exit 3"],
            &[],
            &cwd(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert_eq!(outcome.combined_output(), "out\n\nerr\n");
    }

    #[tokio::test]
    async fn timeout_kills_the_process_promptly() {
        let started = Instant::now();
        let outcome = run_argv("sleep", &["30"], &[], &cwd(), Duration::from_millis(200))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_also_kills_grandchildren() {
        let started = Instant::now();
        let outcome = run_argv(
            "sh",
            &["-c", "sleep 30 & sleep 30"],
            &[],
            &cwd(),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn output_survives_a_background_process_holding_the_pipes() {
        let started = Instant::now();
        let outcome = run_argv(
            "sh",
            &["-c", "echo visible-output; echo visible-err >&2; sleep 5 &"],
            &[],
            &cwd(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout.trim(), "visible-output");
        assert_eq!(outcome.stderr.trim(), "visible-err");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_argv::<&str>(
            "definitely-not-a-real-binary-wary",
            &[],
            &[],
            &cwd(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected_before_spawning() {
        let sandbox = SandboxHandle::detached(cwd(), "unknown", Default::default());
        let err = run_in_sandbox(&sandbox, "   ", &cwd(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[tokio::test]
    async fn sandbox_command_is_split_on_whitespace() {
        let sandbox = SandboxHandle::detached(cwd(), "unknown", Default::default());
        let outcome = run_in_sandbox(&sandbox, "echo  hello   world", &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "hello world");
        assert!(outcome.success());
    }
}
