//! Domain types: project config, build requests, spec sources, the build
//! cache record, stage results, and the pipeline report.
//!
//! Config and persisted types derive Serialize/Deserialize so they roundtrip
//! through YAML (config, cache) and JSON (event log, report).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Project config (sigbuild.yaml)
// ============================================================================

/// Root configuration for a sigbuild project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Schema version (must be "1.0")
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable application name
    #[serde(default = "default_name")]
    pub name: String,

    /// Workspace root holding the persisted layout
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Build cache mount point (defaults to `<workspace>/cache`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub spec: SpecConfig,

    #[serde(default)]
    pub toolchain: ToolchainConfig,

    #[serde(default)]
    pub deps: DepsConfig,

    #[serde(default)]
    pub artifact: ArtifactConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: default_name(),
            workspace: default_workspace(),
            cache_dir: None,
            input: InputConfig::default(),
            spec: SpecConfig::default(),
            toolchain: ToolchainConfig::default(),
            deps: DepsConfig::default(),
            artifact: ArtifactConfig::default(),
            timeouts: TimeoutConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_name() -> String {
    "signal-app".to_string()
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".sigbuild")
}

fn default_true() -> bool {
    true
}

/// Where the application source may come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Single-file mount
    #[serde(default = "default_input_file")]
    pub file: PathBuf,

    /// Directory mount expected to contain `conventional_name`
    #[serde(default = "default_input_dir")]
    pub dir: PathBuf,

    /// Conventional source file name inside the directory mount
    #[serde(default = "default_conventional_name")]
    pub conventional_name: String,

    /// Read a piped stdin stream when stdin is not a terminal
    #[serde(default = "default_true")]
    pub read_stdin: bool,

    /// Fall back to the built-in template when nothing else yields bytes
    #[serde(default = "default_true")]
    pub fallback: bool,

    /// Structural markers (regexes); at least one should match
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            file: default_input_file(),
            dir: default_input_dir(),
            conventional_name: default_conventional_name(),
            read_stdin: true,
            fallback: true,
            markers: default_markers(),
        }
    }
}

fn default_input_file() -> PathBuf {
    PathBuf::from("app.cpp")
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("src")
}

fn default_conventional_name() -> String {
    "main.cpp".to_string()
}

fn default_markers() -> Vec<String> {
    vec![r"\bint\s+main\s*\(".to_string()]
}

/// Signal specification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecConfig {
    /// Default specification document (shipped with the toolchain image)
    #[serde(default = "default_spec_path")]
    pub default: PathBuf,

    /// Remote fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Resolve the default document when a remote fetch fails (opt-in)
    #[serde(default)]
    pub fallback_to_default: bool,
}

impl Default for SpecConfig {
    fn default() -> Self {
        Self {
            default: default_spec_path(),
            fetch_timeout_secs: default_fetch_timeout(),
            fallback_to_default: false,
        }
    }
}

fn default_spec_path() -> PathBuf {
    PathBuf::from("/opt/vss/vss.json")
}

fn default_fetch_timeout() -> u64 {
    30
}

/// Opaque toolchain invocations, each a bash script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_generate")]
    pub generate: String,

    #[serde(default = "default_install")]
    pub install: String,

    #[serde(default = "default_compile")]
    pub compile: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            generate: default_generate(),
            install: default_install(),
            compile: default_compile(),
        }
    }
}

fn default_generate() -> String {
    "vss-codegen --spec \"$SIGBUILD_SPEC\" --out \"$SIGBUILD_GENERATED_DIR\"".to_string()
}

fn default_install() -> String {
    "conan install \"$SIGBUILD_DEPS_MANIFEST\" --output-folder \"$SIGBUILD_DEPS_DIR\" --build=missing"
        .to_string()
}

fn default_compile() -> String {
    "cmake -S \"$SIGBUILD_WORKSPACE\" -B \"$SIGBUILD_BUILD_DIR\" -DCMAKE_BUILD_TYPE=Release\n\
     cmake --build \"$SIGBUILD_BUILD_DIR\" --parallel"
        .to_string()
}

/// Dependency manifest settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepsConfig {
    /// Manifest fingerprinted to decide whether installation is a no-op.
    /// `None` means the app has no third-party dependencies.
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

/// Where the toolchain may leave the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Ordered candidate paths, relative to the workspace; globs allowed
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
        }
    }
}

fn default_candidates() -> Vec<String> {
    vec![
        "build/app".to_string(),
        "build/bin/app".to_string(),
        "build/Release/app".to_string(),
        "build/src/app".to_string(),
    ]
}

/// Per-operation timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_generate_timeout")]
    pub generate_secs: u64,

    #[serde(default = "default_long_timeout")]
    pub install_secs: u64,

    #[serde(default = "default_long_timeout")]
    pub compile_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generate_secs: default_generate_timeout(),
            install_secs: default_long_timeout(),
            compile_secs: default_long_timeout(),
        }
    }
}

fn default_generate_timeout() -> u64 {
    300
}

fn default_long_timeout() -> u64 {
    1800
}

/// Runtime wiring for the launched artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Environment overlay (addresses of runtime collaborators)
    #[serde(default = "default_runtime_env")]
    pub env: IndexMap<String, String>,

    /// Seconds between SIGTERM and SIGKILL
    #[serde(default = "default_grace")]
    pub grace_period_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            env: default_runtime_env(),
            grace_period_secs: default_grace(),
        }
    }
}

fn default_runtime_env() -> IndexMap<String, String> {
    let mut env = IndexMap::new();
    env.insert(
        "KUKSA_DATABROKER_ADDR".to_string(),
        "127.0.0.1:55555".to_string(),
    );
    env.insert(
        "ZENOH_ROUTER".to_string(),
        "tcp/127.0.0.1:7447".to_string(),
    );
    env
}

fn default_grace() -> u64 {
    5
}

// ============================================================================
// Build request
// ============================================================================

/// Which input channel produced the application source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Pipe,
    File(PathBuf),
    Directory(PathBuf),
    Fallback,
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => write!(f, "stdin"),
            Self::File(p) => write!(f, "file {}", p.display()),
            Self::Directory(p) => write!(f, "directory {}", p.display()),
            Self::Fallback => write!(f, "built-in template"),
        }
    }
}

/// User-supplied switches for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
    pub skip_deps: bool,
    pub skip_vss: bool,
    pub force: bool,
    pub clean: bool,
    pub verbose: bool,
    pub quiet: bool,
}

/// Immutable per-invocation input.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: Vec<u8>,
    pub origin: SourceOrigin,
    pub flags: BuildFlags,
    pub run_duration: Option<Duration>,
}

// ============================================================================
// Specification source
// ============================================================================

/// The specification document to build against. Exactly one is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    Default,
    RemoteUrl(String),
    LocalFile(PathBuf),
}

impl SpecSource {
    pub fn is_custom(&self) -> bool {
        !matches!(self, Self::Default)
    }
}

impl fmt::Display for SpecSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::RemoteUrl(url) => write!(f, "url {}", url),
            Self::LocalFile(p) => write!(f, "file {}", p.display()),
        }
    }
}

// ============================================================================
// Fingerprints and the build cache
// ============================================================================

/// Content hash used purely as an equality oracle (`blake3:{hex}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hash(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted record of the last successful compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildCacheRecord {
    /// Schema version
    pub schema: String,

    /// Generator version
    pub generator: String,

    pub source_fingerprint: Fingerprint,

    pub spec_fingerprint: Fingerprint,

    pub artifact_path: PathBuf,

    /// ISO 8601 timestamp
    pub built_at: String,
}

/// Fingerprints a compile actually consumed, left in the build dir by the
/// compile stage and promoted into the cache record by finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileStamp {
    pub source_fingerprint: Fingerprint,
    pub spec_fingerprint: Fingerprint,
}

// ============================================================================
// Stages
// ============================================================================

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    PrepareWorkspace,
    ResolveSpec,
    GenerateBindings,
    InstallDeps,
    Compile,
    LocateArtifact,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Validate,
        Stage::PrepareWorkspace,
        Stage::ResolveSpec,
        Stage::GenerateBindings,
        Stage::InstallDeps,
        Stage::Compile,
        Stage::LocateArtifact,
        Stage::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::PrepareWorkspace => "prepare-workspace",
            Self::ResolveSpec => "resolve-spec",
            Self::GenerateBindings => "generate-bindings",
            Self::InstallDeps => "install-deps",
            Self::Compile => "compile",
            Self::LocateArtifact => "locate-artifact",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome class of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "OK"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// What one stage did. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: Stage,
    pub status: StageStatus,
    pub message: String,
    pub duration_ms: u64,

    /// Verbatim diagnostics from an external tool, when it failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One entry in the stage plan computed at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStage {
    pub stage: Stage,
    pub required: bool,

    /// Why the stage will not run, when `required` is false
    pub skip_reason: Option<String>,
}

// ============================================================================
// Pipeline report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Failed,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Ordered stage results plus the final verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub stages: Vec<StageResult>,
    pub overall_status: OverallStatus,
    pub artifact_path: Option<PathBuf>,
    pub artifact_size_bytes: Option<u64>,
}

impl PipelineReport {
    /// The stage that halted the pipeline, if any.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == stage)
    }

    pub fn succeeded(&self) -> bool {
        self.overall_status == OverallStatus::Success
    }
}

// ============================================================================
// Runner
// ============================================================================

/// How a launched artifact ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Exited on its own with code 0
    Completed,
    /// Non-zero exit or killed by a signal it did not ask for
    Failed,
    /// Duration bound elapsed
    TimedOut,
    /// Interrupted by the user
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

// ============================================================================
// Event log
// ============================================================================

/// Event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted {
        run_id: String,
        command: String,
        source_origin: String,
        spec_source: String,
        sigbuild_version: String,
    },
    StageFinished {
        run_id: String,
        stage: Stage,
        status: StageStatus,
        duration_ms: u64,
        message: String,
    },
    PipelineCompleted {
        run_id: String,
        status: OverallStatus,
        artifact: Option<PathBuf>,
    },
    CacheUpdated {
        run_id: String,
        source_fingerprint: Fingerprint,
        spec_fingerprint: Fingerprint,
    },
    RunFinished {
        artifact: PathBuf,
        status: RunStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

// ============================================================================
// Tests
// ============================================================================
