//! Error taxonomy for the pipeline.
//!
//! Every stage failure maps to exactly one variant here. Tool diagnostics
//! ride along in `diagnostics` fields so `Display` stays a single line.

use super::types::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// No application source could be resolved.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("no application source found (checked: {})", .checked.join(", "))]
    NotFound { checked: Vec<String> },

    #[error("application source from {origin} is empty")]
    Empty { origin: String },

    #[error("cannot read {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
}

/// Specification resolution or binding generation failed.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("--spec-url and --spec-file are mutually exclusive")]
    Conflict,

    #[error("failed to fetch specification from {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("specification file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("specification from {origin} is not a JSON object: {reason}")]
    Parse { origin: String, reason: String },

    #[error("binding generator {reason}")]
    Generation { reason: String, diagnostics: String },
}

/// Pair of a checked candidate path and why it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCheck {
    pub path: PathBuf,
    pub reason: String,
}

/// No qualifying binary was produced.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("no executable artifact found; checked: {}", format_checks(.checked))]
    NotFound { checked: Vec<CandidateCheck> },
}

fn format_checks(checked: &[CandidateCheck]) -> String {
    if checked.is_empty() {
        return "(no candidates configured)".to_string();
    }
    checked
        .iter()
        .map(|c| format!("{} ({})", c.path.display(), c.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The launched artifact did not finish cleanly.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to launch {}: {reason}", .path.display())]
    Spawn { path: PathBuf, reason: String },

    #[error("artifact exited with {}", describe_exit(.exit_code))]
    Failed { exit_code: Option<i32> },

    #[error("artifact still running after {seconds}s, terminated")]
    TimedOut { seconds: u64 },

    #[error("runner error: {reason}")]
    Io { reason: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "a signal".to_string(),
    }
}

/// Umbrella error surfaced by every stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("{stage} requires {missing}; run the earlier stages first")]
    PrerequisiteMissing { stage: Stage, missing: String },

    #[error("dependency installation {reason}")]
    DependencyInstall { reason: String, diagnostics: String },

    #[error("compiler {reason}")]
    Compile { reason: String, diagnostics: String },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("build cache: {0}")]
    Cache(String),

    #[error("workspace: {0}")]
    Workspace(String),
}

impl PipelineError {
    /// Verbatim tool output attached to the error, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        let text = match self {
            Self::Compile { diagnostics, .. } => diagnostics,
            Self::DependencyInstall { diagnostics, .. } => diagnostics,
            Self::Spec(SpecError::Generation { diagnostics, .. }) => diagnostics,
            _ => return None,
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_not_found_lists_every_path() {
        let err = ArtifactError::NotFound {
            checked: vec![
                CandidateCheck {
                    path: PathBuf::from("/ws/build/app"),
                    reason: "missing".to_string(),
                },
                CandidateCheck {
                    path: PathBuf::from("/ws/build/bin/app"),
                    reason: "not executable".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("/ws/build/app (missing)"));
        assert!(msg.contains("/ws/build/bin/app (not executable)"));
    }

    #[test]
    fn test_prerequisite_message_names_stage() {
        let err = PipelineError::PrerequisiteMissing {
            stage: Stage::Compile,
            missing: "generated bindings".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "compile requires generated bindings; run the earlier stages first"
        );
    }

    #[test]
    fn test_diagnostics_kept_out_of_display() {
        let err = PipelineError::Compile {
            reason: "exited with code 2".to_string(),
            diagnostics: "main.cpp:3:1: error: expected ';'\n".to_string(),
        };
        assert_eq!(err.to_string(), "compiler exited with code 2");
        assert!(err.diagnostics().unwrap().contains("expected ';'"));
    }

    #[test]
    fn test_empty_diagnostics_are_none() {
        let err = PipelineError::DependencyInstall {
            reason: "timed out after 10s".to_string(),
            diagnostics: "  \n".to_string(),
        };
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn test_run_failed_signal() {
        let err = RunError::Failed { exit_code: None };
        assert_eq!(err.to_string(), "artifact exited with a signal");
    }

    #[test]
    fn test_input_not_found_lists_channels() {
        let err = InputError::NotFound {
            checked: vec!["stdin".to_string(), "file app.cpp".to_string()],
        };
        assert!(err.to_string().contains("stdin, file app.cpp"));
    }
}
