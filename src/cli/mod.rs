//! CLI subcommands: build, run, validate, clean, status, init, completions,
//! plus one alias per pipeline stage for granular invocation.

pub mod logging;
pub mod render;

use crate::core::config;
use crate::core::input::{self, InputChannels};
use crate::core::pipeline::{self, PipelineConfig};
use crate::core::runner::{self, RunSpec, StdSink};
use crate::core::spec;
use crate::core::types::*;
use crate::core::workspace::{self, Layout};
use crate::core::{artifact, cache};
use crate::provenance::{eventlog, hasher};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "sigbuild",
    version,
    about = "Deterministic build pipeline for signal-driven vehicle apps"
)]
pub struct Cli {
    /// Debug-level logs and the stage plan
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only warnings, errors and the final RESULT line
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbosity {
    pub verbose: bool,
    pub quiet: bool,
}

/// Where the application source comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Single source file (overrides input.file)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Directory holding the conventional source file (overrides input.dir)
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Ignore a piped stdin
    #[arg(long)]
    pub no_stdin: bool,
}

/// Which specification to build against.
#[derive(Args, Debug, Clone, Default)]
pub struct SpecArgs {
    /// Fetch the specification from this URL
    #[arg(long, env = "SIGBUILD_SPEC_URL")]
    pub spec_url: Option<String>,

    /// Use this local specification file
    #[arg(long, env = "SIGBUILD_SPEC_FILE")]
    pub spec_file: Option<PathBuf>,

    /// Resolve the default specification if the remote fetch fails
    #[arg(long)]
    pub spec_fallback: bool,
}

/// Arguments shared by build, run and the stage aliases.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Path to sigbuild.yaml
    #[arg(short, long, default_value = "sigbuild.yaml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub spec: SpecArgs,

    /// Ignore the build cache and regenerate bindings
    #[arg(long)]
    pub force: bool,

    /// Skip dependency installation
    #[arg(long)]
    pub skip_deps: bool,

    /// Skip binding generation
    #[arg(long)]
    pub skip_vss: bool,

    /// Remove build output and the cache record first
    #[arg(long)]
    pub clean: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter sigbuild.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the full pipeline
    Build(BuildArgs),

    /// Build, then launch the artifact
    Run {
        #[command(flatten)]
        build: BuildArgs,

        /// Stop the app after this many seconds
        duration: Option<u64>,

        /// Extra runtime environment (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },

    /// Check the config and the application source; no network, no toolchain
    Validate {
        /// Path to sigbuild.yaml
        #[arg(short, long, default_value = "sigbuild.yaml")]
        config: PathBuf,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Remove build output, generated bindings and the build cache record
    Clean {
        /// Path to sigbuild.yaml
        #[arg(short, long, default_value = "sigbuild.yaml")]
        config: PathBuf,
    },

    /// Show the build cache record and workspace stamps
    Status {
        /// Path to sigbuild.yaml
        #[arg(short, long, default_value = "sigbuild.yaml")]
        config: PathBuf,
    },

    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },

    /// Stage: validate the source and write it into the workspace
    Prepare(BuildArgs),

    /// Stage: resolve the specification into the workspace
    ResolveSpec(BuildArgs),

    /// Stage: generate bindings from the workspace specification
    Generate(BuildArgs),

    /// Stage: install dependencies from the manifest
    Install(BuildArgs),

    /// Stage: compile against the generated bindings
    Compile(BuildArgs),

    /// Stage: find and verify the built artifact
    Locate(BuildArgs),

    /// Stage: record the compiled artifact in the build cache
    Finalize(BuildArgs),
}

/// A failed command. `reported` is set once the failure is already on the
/// RESULT line, so the caller exits without printing it again.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub reported: bool,
}

impl CliError {
    /// Print the failure as the RESULT line for `stage`.
    fn report(stage: &str, message: String) -> Self {
        println!("{}", render::failure_line(stage, &message));
        Self {
            message,
            reported: true,
        }
    }
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        Self {
            message,
            reported: false,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, out: Verbosity) -> Result<(), CliError> {
    match cmd {
        Commands::Init { path } => Ok(cmd_init(&path)?),
        Commands::Build(args) => cmd_build(&args, out),
        Commands::Run {
            build,
            duration,
            env,
        } => cmd_run(&build, duration, &env, out),
        Commands::Validate { config, source } => cmd_validate(&config, &source, out),
        Commands::Clean { config } => Ok(cmd_clean(&config)?),
        Commands::Status { config } => Ok(cmd_status(&config)?),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
        Commands::Prepare(args) => cmd_stages(
            &args,
            &[Stage::Validate, Stage::PrepareWorkspace],
            "prepare",
            out,
        ),
        Commands::ResolveSpec(args) => cmd_stages(&args, &[Stage::ResolveSpec], "resolve-spec", out),
        Commands::Generate(args) => cmd_stages(&args, &[Stage::GenerateBindings], "generate", out),
        Commands::Install(args) => cmd_stages(&args, &[Stage::InstallDeps], "install", out),
        Commands::Compile(args) => cmd_stages(&args, &[Stage::Compile], "compile", out),
        Commands::Locate(args) => cmd_stages(&args, &[Stage::LocateArtifact], "locate", out),
        Commands::Finalize(args) => cmd_stages(&args, &[Stage::Finalize], "finalize", out),
    }
}

/// Parsed config plus everything derived from it for one invocation.
struct Project {
    config: BuildConfig,
    layout: Layout,
    spec_source: SpecSource,
}

/// Load, override and validate the project config. Failures are reported
/// against the validate stage, or resolve-spec for conflicting spec options.
fn load_project(
    path: &Path,
    source: &SourceArgs,
    spec: Option<&SpecArgs>,
) -> Result<Project, CliError> {
    let validate = Stage::Validate.name();
    let mut config =
        config::load_config(path).map_err(|e| CliError::report(validate, e))?;
    if let Some(ref file) = source.source {
        config.input.file.clone_from(file);
    }
    if let Some(ref dir) = source.source_dir {
        config.input.dir.clone_from(dir);
    }
    if source.no_stdin {
        config.input.read_stdin = false;
    }
    if spec.is_some_and(|s| s.spec_fallback) {
        config.spec.fallback_to_default = true;
    }

    let errors = config::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(CliError::report(
            validate,
            format!("{}: {} validation error(s)", path.display(), errors.len()),
        ));
    }

    let spec_source = match spec {
        Some(s) => spec::source_from_options(s.spec_url.clone(), s.spec_file.clone())
            .map_err(|e| CliError::report(Stage::ResolveSpec.name(), e.to_string()))?,
        None => SpecSource::Default,
    };
    let layout = Layout::from_config(&config);
    Ok(Project {
        config,
        layout,
        spec_source,
    })
}

fn flags(args: &BuildArgs, out: Verbosity) -> BuildFlags {
    BuildFlags {
        skip_deps: args.skip_deps,
        skip_vss: args.skip_vss,
        force: args.force,
        clean: args.clean,
        verbose: out.verbose,
        quiet: out.quiet,
    }
}

/// Resolve the application source into a request. Failures here are
/// reported against the validate stage.
fn resolve_request(
    config: &BuildConfig,
    flags: BuildFlags,
    run_duration: Option<Duration>,
) -> Result<BuildRequest, CliError> {
    let fail = |message: String| CliError::report(Stage::Validate.name(), message);
    let piped = if config.input.read_stdin {
        input::read_piped_stdin().map_err(fail)?
    } else {
        None
    };
    let channels = InputChannels::from_config(&config.input, piped);
    let (source, origin) = input::resolve(&channels).map_err(|e| fail(e.to_string()))?;
    tracing::info!(origin = %origin, bytes = source.len(), "application source resolved");
    Ok(BuildRequest {
        source,
        origin,
        flags,
        run_duration,
    })
}

fn print_stage(result: &StageResult) {
    println!("{}", render::stage_line(result));
    if let Some(ref detail) = result.detail {
        eprintln!("{}", detail.trim_end());
    }
}

fn print_stage_quiet(result: &StageResult) {
    if let Some(ref detail) = result.detail {
        eprintln!("{}", detail.trim_end());
    }
}

fn stage_printer(out: Verbosity) -> &'static dyn Fn(&StageResult) {
    if out.quiet {
        &print_stage_quiet
    } else {
        &print_stage
    }
}

/// Print the summary (unless quiet) and the RESULT line; error on failure.
fn finish(report: &PipelineReport, out: Verbosity) -> Result<(), CliError> {
    if !out.quiet {
        println!();
        for line in render::summary(report) {
            println!("{}", line);
        }
    }
    println!("{}", render::result_line(report));
    match report.failed_stage() {
        Some(failed) => Err(CliError {
            message: format!("{} failed", failed.name),
            reported: true,
        }),
        None => Ok(()),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("sigbuild.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, config::INIT_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized sigbuild project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

/// Run the full pipeline and return its report.
fn build(
    args: &BuildArgs,
    out: Verbosity,
    command: &str,
    run_duration: Option<Duration>,
) -> Result<(PipelineReport, Project), CliError> {
    let project = load_project(&args.config, &args.source, Some(&args.spec))?;
    let request = resolve_request(&project.config, flags(args, out), run_duration)?;

    if !out.quiet {
        println!(
            "Building {} ({}, spec: {})",
            project.config.name, request.origin, project.spec_source
        );
    }
    let cfg = PipelineConfig {
        config: &project.config,
        layout: &project.layout,
        spec_source: &project.spec_source,
        command,
        persist: true,
        on_stage: Some(stage_printer(out)),
    };
    let report = pipeline::run_pipeline(&cfg, &request);
    Ok((report, project))
}

fn cmd_build(args: &BuildArgs, out: Verbosity) -> Result<(), CliError> {
    let (report, _) = build(args, out, "build", None)?;
    finish(&report, out)
}

fn cmd_run(
    args: &BuildArgs,
    duration: Option<u64>,
    env: &[String],
    out: Verbosity,
) -> Result<(), CliError> {
    let overlays = parse_env_overlays(env).map_err(|e| CliError::report("run", e))?;
    let duration = duration.map(Duration::from_secs);
    let (report, project) = build(args, out, "run", duration)?;
    let artifact = match (&report.artifact_path, report.succeeded()) {
        (Some(path), true) => path.clone(),
        _ => return finish(&report, out),
    };
    if !out.quiet {
        for line in render::summary(&report) {
            println!("{}", line);
        }
    }

    let mut spec = RunSpec::new(&artifact);
    spec.env = project
        .config
        .runtime
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .chain(overlays)
        .collect();
    spec.duration = duration;
    spec.grace = Duration::from_secs(project.config.runtime.grace_period_secs);

    if !out.quiet {
        match duration {
            Some(d) => println!("Running {} for {}s", artifact.display(), d.as_secs()),
            None => println!("Running {} (Ctrl-C to stop)", artifact.display()),
        }
    }
    let outcome =
        runner::run(&spec, &mut StdSink).map_err(|e| CliError::report("run", e.to_string()))?;
    let _ = eventlog::append_event(
        &project.layout.events_file(),
        PipelineEvent::RunFinished {
            artifact: artifact.clone(),
            status: outcome.status,
            exit_code: outcome.exit_code,
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
        },
    );

    match runner::outcome_error(&outcome, &spec) {
        Some(e) => Err(CliError::report("run", e.to_string())),
        None => {
            println!(
                "RESULT: success artifact={} size={} run={}",
                artifact.display(),
                report.artifact_size_bytes.unwrap_or_default(),
                outcome.status
            );
            Ok(())
        }
    }
}

/// Parse repeated `KEY=VALUE` arguments.
fn parse_env_overlays(env: &[String]) -> Result<Vec<(String, String)>, String> {
    env.iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(format!("invalid --env '{}': expected KEY=VALUE", pair)),
        })
        .collect()
}

fn cmd_validate(path: &Path, source: &SourceArgs, out: Verbosity) -> Result<(), CliError> {
    let project = load_project(path, source, None)?;
    if !out.quiet {
        println!("OK: {} (config {})", project.config.name, path.display());
    }
    let request = resolve_request(&project.config, BuildFlags::default(), None)?;
    let cfg = PipelineConfig {
        config: &project.config,
        layout: &project.layout,
        spec_source: &project.spec_source,
        command: "validate",
        persist: false,
        on_stage: Some(stage_printer(out)),
    };
    let report = pipeline::run_granular(&cfg, &[Stage::Validate], Some(&request), request.flags);
    println!("{}", render::result_line(&report));
    match report.failed_stage() {
        Some(failed) => Err(CliError {
            message: failed.message.clone(),
            reported: true,
        }),
        None => Ok(()),
    }
}

fn cmd_stages(
    args: &BuildArgs,
    stages: &[Stage],
    command: &str,
    out: Verbosity,
) -> Result<(), CliError> {
    let project = load_project(&args.config, &args.source, Some(&args.spec))?;
    let flags = flags(args, out);
    let request = if stages.contains(&Stage::PrepareWorkspace) {
        Some(resolve_request(&project.config, flags, None)?)
    } else {
        None
    };

    let cfg = PipelineConfig {
        config: &project.config,
        layout: &project.layout,
        spec_source: &project.spec_source,
        command,
        persist: true,
        on_stage: Some(stage_printer(out)),
    };
    let report = pipeline::run_granular(&cfg, stages, request.as_ref(), flags);
    finish(&report, out)
}

fn cmd_clean(path: &Path) -> Result<(), String> {
    let config = config::load_config(path)?;
    let layout = Layout::from_config(&config);
    let removed = pipeline::clean(&layout)?;
    if removed.is_empty() {
        println!("Nothing to clean in {}", layout.root.display());
    } else {
        for p in &removed {
            println!("  Removed: {}", p.display());
        }
        println!("Cleaned {} path(s)", removed.len());
    }
    Ok(())
}

fn cmd_status(path: &Path) -> Result<(), String> {
    let config = config::load_config(path)?;
    let layout = Layout::from_config(&config);

    println!("Workspace: {}", layout.root.display());
    let source = layout.source_file();
    match hasher::hash_file_if_exists(&source)? {
        Some(fp) => println!("  Source:       {} ({})", source.display(), fp),
        None => println!("  Source:       (not prepared)"),
    }
    match hasher::hash_file_if_exists(&layout.spec_file())? {
        Some(fp) => println!("  Spec:         {} ({})", layout.spec_file().display(), fp),
        None => println!("  Spec:         (not resolved)"),
    }
    match workspace::read_stamp(&layout.generated_stamp()) {
        Some(fp) if layout.has_generated_output() => {
            println!("  Bindings:     generated from {}", fp)
        }
        _ if layout.has_generated_output() => println!("  Bindings:     present (unstamped)"),
        _ => println!("  Bindings:     (none)"),
    }
    match workspace::read_stamp(&layout.deps_stamp()) {
        Some(fp) => println!("  Dependencies: installed from {}", fp),
        None => println!("  Dependencies: (not installed)"),
    }

    println!("Build cache: {}", layout.cache_file().display());
    match cache::load_record(&layout)? {
        Some(record) => {
            println!("  Built at:     {}", record.built_at);
            println!("  Generator:    {}", record.generator);
            println!("  Source:       {}", record.source_fingerprint);
            println!("  Spec:         {}", record.spec_fingerprint);
            let validity = match artifact::verify(&record.artifact_path) {
                Ok(size) => format!("valid, {} bytes", size),
                Err(reason) => format!("INVALID: {}", reason),
            };
            println!(
                "  Artifact:     {} ({})",
                record.artifact_path.display(),
                validity
            );
        }
        None => println!("  (no record)"),
    }
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "sigbuild", &mut std::io::stdout());
}
