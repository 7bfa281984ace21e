//! Human-readable rendering of stage results and the final result line.

use crate::core::types::{PipelineReport, StageResult, StageStatus};

/// One progress line for a finished stage.
pub fn stage_line(result: &StageResult) -> String {
    format!(
        "  [{:<7}] {:<18} {} ({}ms)",
        result.status.to_string(),
        result.name.name(),
        one_line(&result.message),
        result.duration_ms
    )
}

/// Summary block printed after the stage lines.
pub fn summary(report: &PipelineReport) -> Vec<String> {
    let count = |status: StageStatus| report.stages.iter().filter(|s| s.status == status).count();
    let mut lines = vec![format!(
        "Pipeline {}: {} ok, {} skipped, {} failed (run {})",
        report.overall_status,
        count(StageStatus::Success),
        count(StageStatus::Skipped),
        count(StageStatus::Failed),
        report.run_id
    )];
    if let (Some(path), Some(size)) = (&report.artifact_path, report.artifact_size_bytes) {
        lines.push(format!("  Artifact: {} ({} bytes)", path.display(), size));
    }
    lines
}

/// The machine-greppable last line of a pipeline command.
pub fn result_line(report: &PipelineReport) -> String {
    match report.failed_stage() {
        Some(failed) => failure_line(failed.name.name(), &failed.message),
        None => match (&report.artifact_path, report.artifact_size_bytes) {
            (Some(path), Some(size)) => format!(
                "RESULT: success artifact={} size={}",
                path.display(),
                size
            ),
            _ => "RESULT: success".to_string(),
        },
    }
}

/// Result line for a failure outside the stage loop.
pub fn failure_line(stage: &str, message: &str) -> String {
    format!("RESULT: failed stage={} message={}", stage, one_line(message))
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
