//! Stage pipeline: the ordered build loop, granular stage entry points, and
//! clean.
//!
//! validate → prepare-workspace → resolve-spec → generate-bindings →
//! install-deps → compile → locate-artifact → finalize
//!
//! The plan is computed once up front and executed as a plain loop. The
//! first failure halts the run. The cache record is only written by
//! finalize, and only for a compile that completed.

use super::artifact::{self, LocatedArtifact};
use super::cache;
use super::error::{PipelineError, SpecError};
use super::input;
use super::planner;
use super::spec::{self, GeneratedState, RegenerateReason, SpecDecision};
use super::types::*;
use super::workspace::{self, Layout};
use crate::provenance::{eventlog, hasher};
use crate::transport::{self, ExecOptions, ExecOutput};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Everything a pipeline run needs besides the request.
pub struct PipelineConfig<'a> {
    pub config: &'a BuildConfig,
    pub layout: &'a Layout,
    pub spec_source: &'a SpecSource,
    /// Command name recorded in the event log
    pub command: &'a str,
    /// Write events.jsonl and report.json
    pub persist: bool,
    /// Called after each stage finishes, in order
    pub on_stage: Option<&'a dyn Fn(&StageResult)>,
}

/// What a stage did when it did not fail.
enum StageOutcome {
    Done(String),
    Skipped(String),
}

/// Mutable state threaded through one run.
struct StageContext<'a> {
    cfg: &'a PipelineConfig<'a>,
    request: Option<&'a BuildRequest>,
    flags: BuildFlags,
    run_id: String,
    granular: bool,
    compiled: bool,
    artifact: Option<LocatedArtifact>,
}

impl<'a> StageContext<'a> {
    fn new(
        cfg: &'a PipelineConfig<'a>,
        request: Option<&'a BuildRequest>,
        flags: BuildFlags,
        granular: bool,
    ) -> Self {
        Self {
            cfg,
            request,
            flags,
            run_id: eventlog::generate_run_id(),
            granular,
            compiled: false,
            artifact: None,
        }
    }

    fn layout(&self) -> &'a Layout {
        self.cfg.layout
    }

    fn config(&self) -> &'a BuildConfig {
        self.cfg.config
    }

    fn require_request(&self, stage: Stage) -> Result<&'a BuildRequest, PipelineError> {
        self.request
            .ok_or_else(|| PipelineError::PrerequisiteMissing {
                stage,
                missing: "an application source".to_string(),
            })
    }

    fn log(&self, event: PipelineEvent) {
        if self.cfg.persist {
            let _ = eventlog::append_event(&self.layout().events_file(), event);
        }
    }
}

/// Run the full pipeline for one build request.
pub fn run_pipeline(cfg: &PipelineConfig, request: &BuildRequest) -> PipelineReport {
    let flags = request.flags;
    let mut ctx = StageContext::new(cfg, Some(request), flags, false);

    if flags.clean {
        match clean(cfg.layout) {
            Ok(removed) => tracing::info!(removed = removed.len(), "cleaned workspace"),
            Err(e) => {
                let failed = PlannedStage {
                    stage: Stage::PrepareWorkspace,
                    required: true,
                    skip_reason: None,
                };
                return execute_with(&mut ctx, &[failed], Some(PipelineError::Workspace(e)));
            }
        }
    }

    let generated = GeneratedState::inspect(cfg.layout, &cfg.config.spec);
    let decision = spec::decide(cfg.spec_source, &generated, flags.force);
    let plan = planner::plan_stages(&flags, decision);
    tracing::debug!(
        decision = ?decision,
        plan = %planner::describe_plan(&plan),
        "stage plan"
    );

    execute(&mut ctx, &plan)
}

/// Run the named stages in isolation, assuming earlier stages' outputs are
/// already in the workspace. Validate and prepare need a request.
pub fn run_granular(
    cfg: &PipelineConfig,
    stages: &[Stage],
    request: Option<&BuildRequest>,
    flags: BuildFlags,
) -> PipelineReport {
    let mut ctx = StageContext::new(cfg, request, flags, true);
    let decision = SpecDecision::Regenerate(RegenerateReason::Requested);
    let plan: Vec<PlannedStage> = planner::plan_stages(&flags, decision)
        .into_iter()
        .filter(|p| stages.contains(&p.stage))
        .collect();
    execute(&mut ctx, &plan)
}

fn execute(ctx: &mut StageContext, plan: &[PlannedStage]) -> PipelineReport {
    execute_with(ctx, plan, None)
}

/// The stage loop. `preset` fails the first stage without running it.
fn execute_with(
    ctx: &mut StageContext,
    plan: &[PlannedStage],
    mut preset: Option<PipelineError>,
) -> PipelineReport {
    ctx.log(PipelineEvent::PipelineStarted {
        run_id: ctx.run_id.clone(),
        command: ctx.cfg.command.to_string(),
        source_origin: ctx
            .request
            .map(|r| r.origin.to_string())
            .unwrap_or_else(|| "workspace".to_string()),
        spec_source: ctx.cfg.spec_source.to_string(),
        sigbuild_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut stages = Vec::with_capacity(plan.len());
    for planned in plan {
        let start = Instant::now();
        let outcome = match (preset.take(), &planned.skip_reason) {
            (Some(err), _) => Err(err),
            (None, Some(reason)) => Ok(StageOutcome::Skipped(reason.clone())),
            (None, None) => run_stage(ctx, planned.stage),
        };
        let result = stage_result(planned.stage, outcome, start.elapsed());

        ctx.log(PipelineEvent::StageFinished {
            run_id: ctx.run_id.clone(),
            stage: result.name,
            status: result.status,
            duration_ms: result.duration_ms,
            message: result.message.clone(),
        });
        if let Some(on_stage) = ctx.cfg.on_stage {
            on_stage(&result);
        }

        let failed = result.status == StageStatus::Failed;
        stages.push(result);
        if failed {
            break;
        }
    }

    let overall_status = if stages.iter().any(|s| s.status == StageStatus::Failed) {
        OverallStatus::Failed
    } else {
        OverallStatus::Success
    };
    let (artifact_path, artifact_size_bytes) = match (&ctx.artifact, overall_status) {
        (Some(a), OverallStatus::Success) => (Some(a.path.clone()), Some(a.size)),
        _ => (None, None),
    };

    let report = PipelineReport {
        run_id: ctx.run_id.clone(),
        stages,
        overall_status,
        artifact_path,
        artifact_size_bytes,
    };

    ctx.log(PipelineEvent::PipelineCompleted {
        run_id: report.run_id.clone(),
        status: report.overall_status,
        artifact: report.artifact_path.clone(),
    });
    if ctx.cfg.persist {
        if let Err(e) = write_report(ctx.layout(), &report) {
            tracing::warn!(error = %e, "cannot write report");
        }
    }

    report
}

fn stage_result(
    stage: Stage,
    outcome: Result<StageOutcome, PipelineError>,
    elapsed: Duration,
) -> StageResult {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let (status, message, detail) = match outcome {
        Ok(StageOutcome::Done(message)) => (StageStatus::Success, message, None),
        Ok(StageOutcome::Skipped(reason)) => (StageStatus::Skipped, reason, None),
        Err(e) => {
            tracing::debug!(stage = %stage, error = %e, "stage failed");
            let detail = e.diagnostics().map(str::to_string);
            (StageStatus::Failed, e.to_string(), detail)
        }
    };
    StageResult {
        name: stage,
        status,
        message,
        duration_ms,
        detail,
    }
}

fn run_stage(ctx: &mut StageContext, stage: Stage) -> Result<StageOutcome, PipelineError> {
    tracing::debug!(stage = %stage, "stage started");
    match stage {
        Stage::Validate => validate(ctx),
        Stage::PrepareWorkspace => prepare_workspace(ctx),
        Stage::ResolveSpec => resolve_spec(ctx),
        Stage::GenerateBindings => generate_bindings(ctx),
        Stage::InstallDeps => install_deps(ctx),
        Stage::Compile => compile(ctx),
        Stage::LocateArtifact => locate_artifact(ctx),
        Stage::Finalize => finalize(ctx),
    }
}

// ============================================================================
// Stages
// ============================================================================

fn validate(ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
    let request = ctx.require_request(Stage::Validate)?;
    let check = input::check_source(
        &request.source,
        &request.origin,
        &ctx.config().input.markers,
    )?;
    for warning in &check.warnings {
        tracing::warn!(origin = %request.origin, "{}", warning);
    }

    let mut message = format!(
        "{} bytes, {} lines from {}",
        check.bytes, check.lines, request.origin
    );
    if !check.warnings.is_empty() {
        message.push_str(&format!("; {} warning(s)", check.warnings.len()));
    }
    Ok(StageOutcome::Done(message))
}

fn prepare_workspace(ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
    let request = ctx.require_request(Stage::PrepareWorkspace)?;
    let layout = ctx.layout();
    layout.create_dirs().map_err(PipelineError::Workspace)?;

    // Leave an identical file alone so its mtime doesn't trigger rebuilds.
    let path = layout.source_file();
    if std::fs::read(&path).is_ok_and(|existing| existing == request.source) {
        return Ok(StageOutcome::Done(format!("{} unchanged", path.display())));
    }
    std::fs::write(&path, &request.source).map_err(|e| {
        PipelineError::Workspace(format!("cannot write {}: {}", path.display(), e))
    })?;
    Ok(StageOutcome::Done(format!(
        "wrote {} ({} bytes)",
        path.display(),
        request.source.len()
    )))
}

fn resolve_spec(ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
    let layout = ctx.layout();
    require_file(Stage::ResolveSpec, &layout.source_file(), "a prepared source")?;

    let resolved = spec::load(ctx.cfg.spec_source, &ctx.config().spec)?;
    spec::materialize(&resolved, layout).map_err(PipelineError::Workspace)?;

    let mut message = format!("{} ({})", resolved.used, resolved.fingerprint);
    if resolved.fell_back {
        message.push_str(", fell back from remote");
    }
    Ok(StageOutcome::Done(message))
}

fn generate_bindings(ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
    let layout = ctx.layout();
    let config = ctx.config();
    let spec_file = layout.spec_file();
    require_file(Stage::GenerateBindings, &spec_file, "a resolved specification")?;

    let generated_dir = layout.generated_dir();
    workspace::remove_path(&generated_dir).map_err(PipelineError::Workspace)?;
    std::fs::create_dir_all(&generated_dir).map_err(|e| {
        PipelineError::Workspace(format!("cannot create {}: {}", generated_dir.display(), e))
    })?;

    let timeout = Duration::from_secs(config.timeouts.generate_secs);
    let out = run_tool(ctx, &config.toolchain.generate, timeout).map_err(|e| {
        SpecError::Generation {
            reason: format!("could not be started: {}", e),
            diagnostics: String::new(),
        }
    })?;
    if !out.success() {
        return Err(SpecError::Generation {
            reason: out.failure_reason(timeout),
            diagnostics: out.diagnostics(),
        }
        .into());
    }
    if !layout.has_generated_output() {
        return Err(SpecError::Generation {
            reason: format!("produced no output in {}", generated_dir.display()),
            diagnostics: out.diagnostics(),
        }
        .into());
    }

    let fingerprint = hasher::hash_file(&spec_file).map_err(PipelineError::Workspace)?;
    workspace::write_stamp(&layout.generated_stamp(), &fingerprint)
        .map_err(PipelineError::Workspace)?;
    Ok(StageOutcome::Done(format!("generated from {}", fingerprint)))
}

fn install_deps(ctx: &StageContext) -> Result<StageOutcome, PipelineError> {
    let layout = ctx.layout();
    let config = ctx.config();
    let Some(manifest) = config.deps.manifest.as_deref() else {
        return Ok(StageOutcome::Skipped(
            "no dependency manifest configured".to_string(),
        ));
    };

    let fingerprint = hasher::hash_file_if_exists(manifest)
        .map_err(PipelineError::Workspace)?
        .ok_or_else(|| PipelineError::DependencyInstall {
            reason: format!("failed: manifest {} not found", manifest.display()),
            diagnostics: String::new(),
        })?;
    if !ctx.flags.force && workspace::read_stamp(&layout.deps_stamp()) == Some(fingerprint.clone())
    {
        return Ok(StageOutcome::Skipped(
            "dependency manifest unchanged".to_string(),
        ));
    }

    let timeout = Duration::from_secs(config.timeouts.install_secs);
    let out = run_tool(ctx, &config.toolchain.install, timeout).map_err(|e| {
        PipelineError::DependencyInstall {
            reason: format!("could not be started: {}", e),
            diagnostics: String::new(),
        }
    })?;
    if !out.success() {
        return Err(PipelineError::DependencyInstall {
            reason: out.failure_reason(timeout),
            diagnostics: out.diagnostics(),
        });
    }

    workspace::write_stamp(&layout.deps_stamp(), &fingerprint)
        .map_err(PipelineError::Workspace)?;
    Ok(StageOutcome::Done(format!(
        "installed from {}",
        manifest.display()
    )))
}

fn compile(ctx: &mut StageContext) -> Result<StageOutcome, PipelineError> {
    let layout = ctx.layout();
    let config = ctx.config();
    let source = layout.source_file();
    require_file(Stage::Compile, &source, "a prepared source")?;
    if !layout.has_generated_output() {
        return Err(PipelineError::PrerequisiteMissing {
            stage: Stage::Compile,
            missing: "generated bindings".to_string(),
        });
    }

    let source_fingerprint = hasher::hash_file(&source).map_err(PipelineError::Workspace)?;
    let spec_fingerprint = consumed_spec_fingerprint(layout)?;
    let record = cache::load_record(layout).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable build cache");
        None
    });
    if cache::should_skip_compile(
        record.as_ref(),
        &source_fingerprint,
        &spec_fingerprint,
        ctx.flags.force,
    ) {
        return Ok(StageOutcome::Skipped("up to date (cache hit)".to_string()));
    }

    let timeout = Duration::from_secs(config.timeouts.compile_secs);
    let out = run_tool(ctx, &config.toolchain.compile, timeout).map_err(|e| {
        PipelineError::Compile {
            reason: format!("could not be started: {}", e),
            diagnostics: String::new(),
        }
    })?;
    if !out.success() {
        return Err(PipelineError::Compile {
            reason: out.failure_reason(timeout),
            diagnostics: out.diagnostics(),
        });
    }

    cache::save_compile_stamp(
        layout,
        &CompileStamp {
            source_fingerprint,
            spec_fingerprint,
        },
    )
    .map_err(PipelineError::Workspace)?;
    ctx.compiled = true;
    Ok(StageOutcome::Done(format!("compiled {}", source.display())))
}

fn locate_artifact(ctx: &mut StageContext) -> Result<StageOutcome, PipelineError> {
    let found = artifact::locate(&ctx.config().artifact.candidates, ctx.layout())?;
    let message = format!("{} ({} bytes)", found.path.display(), found.size);
    ctx.artifact = Some(found);
    Ok(StageOutcome::Done(message))
}

fn finalize(ctx: &mut StageContext) -> Result<StageOutcome, PipelineError> {
    if !ctx.compiled && !ctx.granular {
        return Ok(StageOutcome::Done("cache unchanged".to_string()));
    }

    let layout = ctx.layout();
    let stamp = cache::load_compile_stamp(layout)
        .map_err(PipelineError::Cache)?
        .ok_or_else(|| PipelineError::PrerequisiteMissing {
            stage: Stage::Finalize,
            missing: "a completed compile".to_string(),
        })?;
    let located = match ctx.artifact.clone() {
        Some(a) => a,
        None => {
            let a = artifact::locate(&ctx.config().artifact.candidates, layout)?;
            ctx.artifact = Some(a.clone());
            a
        }
    };
    let artifact_path = absolute(&located.path);

    let existing = cache::load_record(layout).ok().flatten();
    if existing.is_some_and(|r| {
        r.source_fingerprint == stamp.source_fingerprint
            && r.spec_fingerprint == stamp.spec_fingerprint
            && r.artifact_path == artifact_path
    }) {
        return Ok(StageOutcome::Done("cache unchanged".to_string()));
    }

    let record = cache::new_record(
        stamp.source_fingerprint.clone(),
        stamp.spec_fingerprint.clone(),
        artifact_path,
    );
    cache::save_record(layout, &record).map_err(PipelineError::Cache)?;
    ctx.log(PipelineEvent::CacheUpdated {
        run_id: ctx.run_id.clone(),
        source_fingerprint: stamp.source_fingerprint,
        spec_fingerprint: stamp.spec_fingerprint,
    });
    Ok(StageOutcome::Done(format!(
        "cache updated ({})",
        layout.cache_file().display()
    )))
}

// ============================================================================
// Helpers
// ============================================================================

fn require_file(stage: Stage, path: &Path, what: &str) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::PrerequisiteMissing {
            stage,
            missing: format!("{} ({})", what, path.display()),
        })
    }
}

/// Fingerprint of the spec the current bindings came from. Falls back to
/// the workspace document when the bindings carry no stamp.
fn consumed_spec_fingerprint(layout: &Layout) -> Result<Fingerprint, PipelineError> {
    if let Some(fp) = workspace::read_stamp(&layout.generated_stamp()) {
        return Ok(fp);
    }
    hasher::hash_file_if_exists(&layout.spec_file())
        .map_err(PipelineError::Workspace)?
        .ok_or_else(|| PipelineError::PrerequisiteMissing {
            stage: Stage::Compile,
            missing: "a resolved specification".to_string(),
        })
}

fn run_tool(ctx: &StageContext, script: &str, timeout: Duration) -> Result<ExecOutput, String> {
    transport::exec_script(script, &script_options(ctx.cfg, timeout))
}

/// Working directory and `SIGBUILD_*` variables for toolchain scripts.
pub fn script_options(cfg: &PipelineConfig, timeout: Duration) -> ExecOptions {
    let layout = cfg.layout;
    let manifest = cfg
        .config
        .deps
        .manifest
        .as_deref()
        .map(|m| absolute(m).display().to_string())
        .unwrap_or_default();
    let path = |p: PathBuf| absolute(&p).display().to_string();

    ExecOptions::new(timeout)
        .cwd(absolute(&layout.root))
        .env("SIGBUILD_WORKSPACE", path(layout.root.clone()))
        .env("SIGBUILD_SOURCE", path(layout.source_file()))
        .env("SIGBUILD_SPEC", path(layout.spec_file()))
        .env("SIGBUILD_GENERATED_DIR", path(layout.generated_dir()))
        .env("SIGBUILD_DEPS_DIR", path(layout.deps_dir()))
        .env("SIGBUILD_DEPS_MANIFEST", manifest)
        .env("SIGBUILD_BUILD_DIR", path(layout.build_dir()))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn write_report(layout: &Layout, report: &PipelineReport) -> Result<(), String> {
    let path = layout.report_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    let json =
        serde_json::to_string_pretty(report).map_err(|e| format!("serialize error: {}", e))?;
    std::fs::write(&path, json).map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

/// Remove build output, generated bindings, the dependency stamp and the
/// cache record. Returns the paths that existed.
pub fn clean(layout: &Layout) -> Result<Vec<PathBuf>, String> {
    let mut removed = Vec::new();
    for path in [layout.build_dir(), layout.generated_dir(), layout.deps_stamp()] {
        if workspace::remove_path(&path)? {
            removed.push(path);
        }
    }
    if cache::clear(layout)? {
        removed.push(layout.cache_file());
    }
    Ok(removed)
}
