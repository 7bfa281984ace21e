//! Workspace layout: the stable on-disk paths shared with caller mounts.
//!
//! ```text
//! <workspace>/app/<conventional_name>     prepared source
//! <workspace>/spec/vss.json               active specification
//! <workspace>/generated/                  bindings (+ .spec-fingerprint)
//! <workspace>/deps/                       dependencies (+ .manifest-fingerprint)
//! <workspace>/build/                      toolchain output (+ .compile-stamp.yaml)
//! <workspace>/events.jsonl                event log
//! <workspace>/report.json                 last pipeline report
//! <cache_dir>/build-cache.yaml            build cache record
//! ```

use super::types::{BuildConfig, Fingerprint};
use std::path::{Path, PathBuf};

const GENERATED_STAMP: &str = ".spec-fingerprint";
const DEPS_STAMP: &str = ".manifest-fingerprint";
const COMPILE_STAMP: &str = ".compile-stamp.yaml";

/// Resolved paths for one workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    source_name: String,
}

impl Layout {
    pub fn from_config(config: &BuildConfig) -> Self {
        let root = config.workspace.clone();
        let cache_dir = config
            .cache_dir
            .clone()
            .unwrap_or_else(|| root.join("cache"));
        Self {
            root,
            cache_dir,
            source_name: config.input.conventional_name.clone(),
        }
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    pub fn source_file(&self) -> PathBuf {
        self.app_dir().join(&self.source_name)
    }

    pub fn spec_dir(&self) -> PathBuf {
        self.root.join("spec")
    }

    pub fn spec_file(&self) -> PathBuf {
        self.spec_dir().join("vss.json")
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    pub fn generated_stamp(&self) -> PathBuf {
        self.generated_dir().join(GENERATED_STAMP)
    }

    pub fn deps_dir(&self) -> PathBuf {
        self.root.join("deps")
    }

    pub fn deps_stamp(&self) -> PathBuf {
        self.deps_dir().join(DEPS_STAMP)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn compile_stamp(&self) -> PathBuf {
        self.build_dir().join(COMPILE_STAMP)
    }

    pub fn events_file(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn report_file(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join("build-cache.yaml")
    }

    /// Resolve a configured artifact candidate against the workspace.
    pub fn resolve(&self, candidate: &str) -> PathBuf {
        let p = Path::new(candidate);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// True when the generated dir holds anything besides its stamp.
    pub fn has_generated_output(&self) -> bool {
        dir_has_entries(&self.generated_dir(), &[GENERATED_STAMP])
    }

    /// Create the directory skeleton. Idempotent.
    pub fn create_dirs(&self) -> Result<(), String> {
        for dir in [
            self.app_dir(),
            self.spec_dir(),
            self.generated_dir(),
            self.deps_dir(),
            self.build_dir(),
            self.cache_dir.clone(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

fn dir_has_entries(dir: &Path, ignore: &[&str]) -> bool {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.flatten().any(|e| {
            let name = e.file_name();
            !ignore.iter().any(|i| name == *i)
        }),
        Err(_) => false,
    }
}

/// Read a fingerprint stamp file. `None` if absent or empty.
pub fn read_stamp(path: &Path) -> Option<Fingerprint> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Fingerprint::from_hash(trimmed.to_string()))
}

/// Write a fingerprint stamp file.
pub fn write_stamp(path: &Path, fp: &Fingerprint) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    std::fs::write(path, format!("{}\n", fp))
        .map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

/// Remove a file or directory tree if it exists. Returns whether anything
/// was removed.
pub fn remove_path(path: &Path) -> Result<bool, String> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(format!("cannot stat {}: {}", path.display(), e)),
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result
        .map(|_| true)
        .map_err(|e| format!("cannot remove {}: {}", path.display(), e))
}
