//! External command transport: toolchain scripts run locally under bash.

pub mod local;

use std::path::PathBuf;
use std::time::Duration;

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Tool output to attach to an error: stderr, then stdout.
    pub fn diagnostics(&self) -> String {
        match (self.stderr.trim().is_empty(), self.stdout.trim().is_empty()) {
            (false, true) => self.stderr.clone(),
            (true, false) => self.stdout.clone(),
            (true, true) => String::new(),
            (false, false) => format!("{}\n{}", self.stderr.trim_end(), self.stdout),
        }
    }

    /// One-line reason for a failed run.
    pub fn failure_reason(&self, timeout: Duration) -> String {
        if self.timed_out {
            format!("timed out after {}s", timeout.as_secs())
        } else if self.exit_code < 0 {
            "was killed by a signal".to_string()
        } else {
            format!("exited with code {}", self.exit_code)
        }
    }
}

/// How to run one script.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL once the timeout fires
    pub grace: Duration,
}

impl ExecOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            timeout,
            grace: Duration::from_secs(5),
        }
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Execute a toolchain script with the given options.
pub fn exec_script(script: &str, opts: &ExecOptions) -> Result<ExecOutput, String> {
    tracing::debug!(
        cwd = ?opts.cwd,
        timeout_secs = opts.timeout.as_secs(),
        "exec script"
    );
    local::exec_local(script, opts)
}

/// Signal every process in the group led by `pid`: SIGTERM, or SIGKILL
/// when `force` is set. Children run with `process_group(0)`, so the
/// group id is the leader's pid.
#[cfg(unix)]
pub fn signal_group(pid: Option<u32>, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let _ = killpg(Pid::from_raw(pid), signal);
}

#[cfg(not(unix))]
pub fn signal_group(_pid: Option<u32>, _force: bool) {}
