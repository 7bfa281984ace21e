//! Execution runner: launch a verified artifact, stream its output, and
//! bound how long it may live.
//!
//! The child runs in its own process group. On timeout or interrupt the
//! group gets SIGTERM, then SIGKILL once the grace period runs out.

use super::artifact;
use super::error::RunError;
use super::types::{RunOutcome, RunStatus};
use crate::transport;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Receives child output as it arrives, one line at a time.
pub trait OutputSink {
    fn stdout_line(&mut self, line: &str);
    fn stderr_line(&mut self, line: &str);
}

/// Forwards child output to this process's stdout/stderr.
#[derive(Debug, Default)]
pub struct StdSink;

impl OutputSink for StdSink {
    fn stdout_line(&mut self, line: &str) {
        println!("{}", line);
    }

    fn stderr_line(&mut self, line: &str) {
        eprintln!("{}", line);
    }
}

/// What to launch and under which limits.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Environment overlay on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Stop the child after this long (`None` = run until it exits)
    pub duration: Option<Duration>,
    /// Time between SIGTERM and SIGKILL
    pub grace: Duration,
}

impl RunSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            duration: None,
            grace: Duration::from_secs(5),
        }
    }
}

/// Map an outcome to the error it represents, if any. A user stop is not
/// an error.
pub fn outcome_error(outcome: &RunOutcome, spec: &RunSpec) -> Option<RunError> {
    match outcome.status {
        RunStatus::Completed | RunStatus::Stopped => None,
        RunStatus::Failed => Some(RunError::Failed {
            exit_code: outcome.exit_code,
        }),
        RunStatus::TimedOut => Some(RunError::TimedOut {
            seconds: spec.duration.map(|d| d.as_secs()).unwrap_or_default(),
        }),
    }
}

/// Launch the artifact and block until it ends.
pub fn run(spec: &RunSpec, sink: &mut dyn OutputSink) -> Result<RunOutcome, RunError> {
    artifact::verify(&spec.program).map_err(|reason| RunError::Spawn {
        path: spec.program.clone(),
        reason,
    })?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RunError::Io {
            reason: format!("cannot start runtime: {}", e),
        })?;
    rt.block_on(run_async(spec, sink))
}

/// How the wait loop ended.
enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
}

async fn run_async(spec: &RunSpec, sink: &mut dyn OutputSink) -> Result<RunOutcome, RunError> {
    let start = Instant::now();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| RunError::Spawn {
        path: spec.program.clone(),
        reason: e.to_string(),
    })?;
    tracing::debug!(program = %spec.program.display(), pid = ?child.id(), "artifact started");

    let io_err = |what: &str| RunError::Io {
        reason: format!("cannot capture child {}", what),
    };
    let mut stdout = BufReader::new(child.stdout.take().ok_or_else(|| io_err("stdout"))?).lines();
    let mut stderr = BufReader::new(child.stderr.take().ok_or_else(|| io_err("stderr"))?).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    let deadline = async {
        match spec.duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let ending = loop {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(l)) => sink.stdout_line(&l),
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(l)) => sink.stderr_line(&l),
                _ => stderr_open = false,
            },
            status = child.wait() => {
                let status = status.map_err(|e| RunError::Io { reason: e.to_string() })?;
                break Ending::Exited(status);
            }
            _ = &mut deadline => break Ending::TimedOut,
            _ = &mut interrupt => break Ending::Interrupted,
        }
    };

    let (status, exit_status) = match ending {
        Ending::Exited(s) if s.success() => (RunStatus::Completed, s),
        Ending::Exited(s) => (RunStatus::Failed, s),
        Ending::TimedOut => {
            tracing::info!("run duration elapsed, stopping artifact");
            (RunStatus::TimedOut, terminate(&mut child, spec.grace).await?)
        }
        Ending::Interrupted => {
            tracing::info!("interrupted, stopping artifact");
            (RunStatus::Stopped, terminate(&mut child, spec.grace).await?)
        }
    };

    // Pick up whatever the child wrote before it went away. Bounded, since
    // a stray grandchild can hold the pipes open.
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(l)) => sink.stdout_line(&l),
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(l)) => sink.stderr_line(&l),
                    _ => stderr_open = false,
                },
            }
        }
    })
    .await;

    Ok(RunOutcome {
        status,
        exit_code: exit_status.code(),
        duration: start.elapsed(),
    })
}

/// SIGTERM the child's process group, then SIGKILL after `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus, RunError> {
    let pid = child.id();
    transport::signal_group(pid, false);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(|e| RunError::Io {
            reason: e.to_string(),
        }),
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "artifact ignored SIGTERM, killing");
            transport::signal_group(pid, true);
            let _ = child.start_kill();
            child.wait().await.map_err(|e| RunError::Io {
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    #[derive(Default)]
    struct Capture {
        out: Vec<String>,
        err: Vec<String>,
    }

    impl OutputSink for Capture {
        fn stdout_line(&mut self, line: &str) {
            self.out.push(line.to_string());
        }

        fn stderr_line(&mut self, line: &str) {
            self.err.push(line.to_string());
        }
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("app");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_clean_exit_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RunSpec::new(script(dir.path(), "echo hello\necho oops >&2"));
        let mut sink = Capture::default();
        let outcome = run(&spec, &mut sink).unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(sink.out, vec!["hello"]);
        assert_eq!(sink.err, vec!["oops"]);
        assert!(outcome_error(&outcome, &spec).is_none());
    }

    #[test]
    fn test_nonzero_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = RunSpec::new(script(dir.path(), "exit 3"));
        spec.duration = Some(Duration::from_secs(2));
        let outcome = run(&spec, &mut Capture::default()).unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.exit_code, Some(3));
        let err = outcome_error(&outcome, &spec).unwrap();
        assert_eq!(err.to_string(), "artifact exited with code 3");
    }

    #[test]
    fn test_duration_bound_is_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = RunSpec::new(script(dir.path(), "echo started\nsleep 30"));
        spec.duration = Some(Duration::from_secs(2));
        spec.grace = Duration::from_secs(1);
        let mut sink = Capture::default();
        let outcome = run(&spec, &mut sink).unwrap();
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(outcome.duration >= Duration::from_secs(2));
        assert!(outcome.duration < Duration::from_secs(10));
        assert_eq!(sink.out, vec!["started"]);
        assert!(matches!(
            outcome_error(&outcome, &spec),
            Some(RunError::TimedOut { seconds: 2 })
        ));
    }

    #[test]
    fn test_sigterm_ignored_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = RunSpec::new(script(
            dir.path(),
            "trap '' TERM\nwhile true; do sleep 0.1; done",
        ));
        spec.duration = Some(Duration::from_secs(1));
        spec.grace = Duration::from_secs(1);
        let outcome = run(&spec, &mut Capture::default()).unwrap();
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(outcome.duration >= Duration::from_secs(2));
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[test]
    fn test_env_overlay_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = RunSpec::new(script(dir.path(), "echo \"$KUKSA_DATABROKER_ADDR\""));
        spec.env = vec![(
            "KUKSA_DATABROKER_ADDR".to_string(),
            "broker:55555".to_string(),
        )];
        let mut sink = Capture::default();
        run(&spec, &mut sink).unwrap();
        assert_eq!(sink.out, vec!["broker:55555"]);
    }

    #[test]
    fn test_missing_artifact_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RunSpec::new(dir.path().join("absent"));
        let err = run(&spec, &mut Capture::default()).unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_stopped_is_not_an_error() {
        let outcome = RunOutcome {
            status: RunStatus::Stopped,
            exit_code: None,
            duration: Duration::from_secs(1),
        };
        assert!(outcome_error(&outcome, &RunSpec::new("/bin/true")).is_none());
    }
}
