//! Stage planning: decide up front which stages run and why others don't.

use super::spec::SpecDecision;
use super::types::*;

/// Compute the stage plan for a full build. Pure.
///
/// Compile is always planned; whether it actually invokes the toolchain is
/// settled by the cache check inside the stage, against fingerprints of what
/// is on disk at that point.
pub fn plan_stages(flags: &BuildFlags, decision: SpecDecision) -> Vec<PlannedStage> {
    Stage::ALL
        .iter()
        .map(|&stage| {
            let skip_reason = skip_reason(stage, flags, decision);
            PlannedStage {
                stage,
                required: skip_reason.is_none(),
                skip_reason,
            }
        })
        .collect()
}

fn skip_reason(stage: Stage, flags: &BuildFlags, decision: SpecDecision) -> Option<String> {
    match stage {
        Stage::GenerateBindings if flags.skip_vss => Some("skipped by --skip-vss".to_string()),
        Stage::GenerateBindings if !decision.regenerates() => {
            Some("reusing generated bindings".to_string())
        }
        Stage::InstallDeps if flags.skip_deps => Some("skipped by --skip-deps".to_string()),
        _ => None,
    }
}

/// One-line summary of a plan, e.g. for `--verbose` output.
pub fn describe_plan(plan: &[PlannedStage]) -> String {
    plan.iter()
        .map(|p| {
            if p.required {
                p.stage.name().to_string()
            } else {
                format!("({})", p.stage.name())
            }
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}
