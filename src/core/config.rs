//! Project config parsing and validation.
//!
//! Parses sigbuild.yaml and checks structural constraints:
//! - Version must be "1.0"
//! - Toolchain scripts must be non-empty
//! - Artifact candidates must be non-empty
//! - Input markers must be valid regexes
//! - Timeouts must be positive

use super::types::BuildConfig;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Load the project config. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<BuildConfig, String> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(BuildConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a sigbuild.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<BuildConfig, String> {
    if yaml.trim().is_empty() {
        return Ok(BuildConfig::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &BuildConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }

    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }

    if config.workspace.as_os_str().is_empty() {
        push("workspace must not be empty".to_string());
    }

    for (label, script) in [
        ("generate", &config.toolchain.generate),
        ("install", &config.toolchain.install),
        ("compile", &config.toolchain.compile),
    ] {
        if script.trim().is_empty() {
            push(format!("toolchain.{} script is empty", label));
        }
    }

    if config.artifact.candidates.is_empty() {
        push("artifact.candidates must list at least one path".to_string());
    }
    for candidate in &config.artifact.candidates {
        if Path::new(candidate).is_absolute() {
            continue;
        }
        if candidate.split('/').any(|part| part == "..") {
            push(format!(
                "artifact candidate '{}' escapes the workspace",
                candidate
            ));
        }
    }

    if config.input.conventional_name.trim().is_empty()
        || config.input.conventional_name.contains('/')
    {
        push(format!(
            "input.conventional_name '{}' must be a plain file name",
            config.input.conventional_name
        ));
    }

    for marker in &config.input.markers {
        if let Err(e) = regex::Regex::new(marker) {
            push(format!("input marker '{}' is not a valid regex: {}", marker, e));
        }
    }

    for (label, secs) in [
        ("spec.fetch_timeout_secs", config.spec.fetch_timeout_secs),
        ("timeouts.generate_secs", config.timeouts.generate_secs),
        ("timeouts.install_secs", config.timeouts.install_secs),
        ("timeouts.compile_secs", config.timeouts.compile_secs),
    ] {
        if secs == 0 {
            push(format!("{} must be greater than zero", label));
        }
    }

    for key in config.runtime.env.keys() {
        if key.is_empty() || key.contains('=') {
            push(format!("runtime.env key '{}' is not a valid variable name", key));
        }
    }

    errors
}

/// Starter config written by `sigbuild init`.
pub const INIT_TEMPLATE: &str = r#"version: "1.0"
name: signal-app

# Persisted layout (app/, spec/, generated/, deps/, build/). Mount this
# directory to keep the cache across container runs.
workspace: .sigbuild
# cache_dir: /cache

input:
  file: app.cpp
  dir: src
  conventional_name: main.cpp
  read_stdin: true
  fallback: true

spec:
  default: /opt/vss/vss.json
  fetch_timeout_secs: 30
  fallback_to_default: false

toolchain:
  generate: vss-codegen --spec "$SIGBUILD_SPEC" --out "$SIGBUILD_GENERATED_DIR"
  install: conan install "$SIGBUILD_DEPS_MANIFEST" --output-folder "$SIGBUILD_DEPS_DIR" --build=missing
  compile: |
    cmake -S "$SIGBUILD_WORKSPACE" -B "$SIGBUILD_BUILD_DIR" -DCMAKE_BUILD_TYPE=Release
    cmake --build "$SIGBUILD_BUILD_DIR" --parallel

deps:
  manifest: conanfile.txt

artifact:
  candidates:
    - build/app
    - build/bin/app
    - build/Release/app

timeouts:
  generate_secs: 300
  install_secs: 1800
  compile_secs: 1800

runtime:
  env:
    KUKSA_DATABROKER_ADDR: "127.0.0.1:55555"
    ZENOH_ROUTER: "tcp/127.0.0.1:7447"
  grace_period_secs: 5
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &BuildConfig) -> Vec<String> {
        validate_config(config)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        let errors = messages(&BuildConfig::default());
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_init_template_parses_and_validates() {
        let config = parse_config(INIT_TEMPLATE).unwrap();
        assert_eq!(config.name, "signal-app");
        assert_eq!(config.artifact.candidates.len(), 3);
        assert!(config.deps.manifest.is_some());
        let errors = messages(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("sigbuild.yaml")).unwrap();
        assert_eq!(config.version, "1.0");
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse_config("   \n").unwrap();
        assert_eq!(config.name, "signal-app");
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("version: [unclosed").unwrap_err();
        assert!(err.contains("YAML parse error"));
    }

    #[test]
    fn test_bad_version() {
        let config = parse_config("version: \"2.0\"").unwrap();
        assert!(messages(&config).iter().any(|m| m.contains("version")));
    }

    #[test]
    fn test_collects_every_problem() {
        let yaml = r#"
version: "1.0"
name: ""
toolchain:
  compile: "  "
artifact:
  candidates: []
input:
  markers: ["(unclosed"]
timeouts:
  install_secs: 0
"#;
        let config = parse_config(yaml).unwrap();
        let errors = messages(&config);
        assert!(errors.iter().any(|m| m.contains("name")));
        assert!(errors.iter().any(|m| m.contains("toolchain.compile")));
        assert!(errors.iter().any(|m| m.contains("candidates")));
        assert!(errors.iter().any(|m| m.contains("not a valid regex")));
        assert!(errors.iter().any(|m| m.contains("timeouts.install_secs")));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_candidate_escaping_workspace() {
        let yaml = r#"
artifact:
  candidates: ["../elsewhere/app", "/abs/ok/app"]
"#;
        let config = parse_config(yaml).unwrap();
        let errors = messages(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("escapes the workspace"));
    }

    #[test]
    fn test_conventional_name_must_be_plain() {
        let config = parse_config("input:\n  conventional_name: src/main.cpp\n").unwrap();
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("plain file name")));
    }
}
