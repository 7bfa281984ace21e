//! Local execution transport.

use super::{ExecOptions, ExecOutput};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Execute a shell script locally via `bash`, bounded by `opts.timeout`.
///
/// The script is piped to stdin. Uses bash (not sh/dash) because toolchain
/// scripts commonly rely on `set -o pipefail`. The script leads its own
/// process group; on timeout the whole group is terminated and whatever
/// output arrived so far is returned with `timed_out` set.
pub fn exec_local(script: &str, opts: &ExecOptions) -> Result<ExecOutput, String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;
    rt.block_on(exec_local_async(script, opts))
}

/// Output pipes of a running script, read as data arrives.
struct Capture {
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    out: Vec<u8>,
    err: Vec<u8>,
}

impl Capture {
    fn open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Read one chunk from whichever pipe is ready. Cancel-safe.
    async fn read_some(&mut self) {
        let mut out_chunk = [0u8; 8192];
        let mut err_chunk = [0u8; 8192];
        tokio::select! {
            n = read_pipe(&mut self.stdout, &mut out_chunk) => match n {
                Some(n) => self.out.extend_from_slice(&out_chunk[..n]),
                None => self.stdout = None,
            },
            n = read_pipe(&mut self.stderr, &mut err_chunk) => match n {
                Some(n) => self.err.extend_from_slice(&err_chunk[..n]),
                None => self.stderr = None,
            },
        }
    }

    /// Read until both pipes close, bounded since a detached grandchild can
    /// hold them open.
    async fn drain(&mut self, bound: Duration) {
        let _ = tokio::time::timeout(bound, async {
            while self.open() {
                self.read_some().await;
            }
        })
        .await;
    }
}

/// `None` on EOF or error. A closed pipe never resolves.
async fn read_pipe<R: AsyncReadExt + Unpin>(pipe: &mut Option<R>, buf: &mut [u8]) -> Option<usize> {
    match pipe {
        Some(p) => match p.read(buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(n),
        },
        None => std::future::pending().await,
    }
}

async fn exec_local_async(script: &str, opts: &ExecOptions) -> Result<ExecOutput, String> {
    let mut cmd = Command::new("bash");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = opts.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    let mut capture = Capture {
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        out: Vec::new(),
        err: Vec::new(),
    };

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let deadline = tokio::time::sleep(opts.timeout);
    tokio::pin!(deadline);
    let status = loop {
        tokio::select! {
            _ = capture.read_some(), if capture.open() => {}
            status = child.wait() => {
                break Some(status.map_err(|e| format!("wait error: {}", e))?);
            }
            _ = &mut deadline => break None,
        }
    };

    let timed_out = status.is_none();
    if timed_out {
        tracing::warn!(timeout_secs = opts.timeout.as_secs(), "script timed out, terminating");
        terminate(&mut child, opts.grace).await;
    }
    capture.drain(Duration::from_millis(500)).await;

    Ok(ExecOutput {
        exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
        stdout: String::from_utf8_lossy(&capture.out).to_string(),
        stderr: String::from_utf8_lossy(&capture.err).to_string(),
        timed_out,
    })
}

/// SIGTERM the script's process group, give the shell `grace` to exit,
/// then SIGKILL whatever is left in the group.
async fn terminate(child: &mut Child, grace: Duration) {
    let pid = child.id();
    super::signal_group(pid, false);
    let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
    super::signal_group(pid, true);
    if !exited {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn opts() -> ExecOptions {
        ExecOptions::new(Duration::from_secs(10))
    }

    #[test]
    fn test_local_echo() {
        let out = exec_local("echo hello", &opts()).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_local_failure() {
        let out = exec_local("exit 42", &opts()).unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 42);
    }

    #[test]
    fn test_local_stderr() {
        let out = exec_local("echo err >&2", &opts()).unwrap();
        assert!(out.success());
        assert!(out.stderr.contains("err"));
    }

    #[test]
    fn test_local_signal_killed() {
        let out = exec_local("kill -9 $$", &opts()).unwrap();
        assert_eq!(out.exit_code, -1);
        assert!(!out.timed_out);
    }

    #[test]
    fn test_local_pipefail() {
        let out = exec_local("set -euo pipefail\nfalse | true", &opts()).unwrap();
        assert!(!out.success(), "pipefail should catch false in pipeline");
    }

    #[test]
    fn test_local_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts().cwd(dir.path()).env("SIGBUILD_TEST_VAR", "value-1");
        let out = exec_local("pwd\necho \"$SIGBUILD_TEST_VAR\"", &o).unwrap();
        assert!(out.success());
        let lines: Vec<_> = out.stdout.lines().collect();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(lines[0]).canonicalize().unwrap(),
            canonical
        );
        assert_eq!(lines[1], "value-1");
    }

    #[test]
    fn test_local_timeout() {
        let o = ExecOptions::new(Duration::from_millis(300));
        let start = Instant::now();
        let out = exec_local("sleep 5", &o).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_local_timeout_stops_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let mark = dir.path().join("late");
        let o = ExecOptions::new(Duration::from_millis(300))
            .grace(Duration::from_millis(200))
            .env("MARK", mark.display().to_string());
        let out = exec_local("sh -c 'sleep 2; echo late > \"$MARK\"'\necho after", &o).unwrap();
        assert!(out.timed_out);
        std::thread::sleep(Duration::from_secs(3));
        assert!(!mark.exists(), "child of a timed-out script kept running");
    }

    #[test]
    fn test_local_timeout_keeps_partial_output() {
        let o = ExecOptions::new(Duration::from_millis(500)).grace(Duration::from_millis(200));
        let out = exec_local("echo compiling\necho 'warning: slow' >&2\nsleep 5", &o).unwrap();
        assert!(out.timed_out);
        assert_eq!(out.stdout, "compiling\n");
        assert!(out.diagnostics().contains("warning: slow"));
    }

    #[test]
    fn test_local_timeout_escalates_to_kill() {
        let o = ExecOptions::new(Duration::from_millis(300)).grace(Duration::from_millis(300));
        let start = Instant::now();
        let out = exec_local("trap '' TERM\nwhile true; do sleep 0.1; done", &o).unwrap();
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
