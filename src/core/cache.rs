//! Build cache: load, save (atomic), and the skip-compile decision.
//!
//! The record lives under a caller-provided mount so it outlives a single
//! container. It is only written after a completed compile and only removed
//! by an explicit clean.

use super::artifact;
use super::types::{BuildCacheRecord, CompileStamp, Fingerprint};
use super::workspace::Layout;
use crate::provenance::eventlog;
use std::path::{Path, PathBuf};

const SCHEMA: &str = "1.0";

/// Load the cache record. Returns None if it doesn't exist.
pub fn load_record(layout: &Layout) -> Result<Option<BuildCacheRecord>, String> {
    load_yaml(&layout.cache_file())
}

/// Save the cache record atomically (write to temp, then rename).
pub fn save_record(layout: &Layout, record: &BuildCacheRecord) -> Result<(), String> {
    save_yaml_atomic(&layout.cache_file(), record)
}

/// Create a record for an artifact built from the given fingerprints.
pub fn new_record(
    source_fingerprint: Fingerprint,
    spec_fingerprint: Fingerprint,
    artifact_path: PathBuf,
) -> BuildCacheRecord {
    BuildCacheRecord {
        schema: SCHEMA.to_string(),
        generator: format!("sigbuild {}", env!("CARGO_PKG_VERSION")),
        source_fingerprint,
        spec_fingerprint,
        artifact_path,
        built_at: eventlog::now_iso8601(),
    }
}

/// True iff a prior record matches both fingerprints, `force` is off, and
/// the recorded artifact still exists and is executable. No side effects.
pub fn should_skip_compile(
    record: Option<&BuildCacheRecord>,
    source_fingerprint: &Fingerprint,
    spec_fingerprint: &Fingerprint,
    force: bool,
) -> bool {
    let Some(record) = record else {
        return false;
    };
    !force
        && record.source_fingerprint == *source_fingerprint
        && record.spec_fingerprint == *spec_fingerprint
        && artifact::verify(&record.artifact_path).is_ok()
}

/// Remove the cache record. Returns whether one existed.
pub fn clear(layout: &Layout) -> Result<bool, String> {
    super::workspace::remove_path(&layout.cache_file())
}

/// Load the stamp left by the last compile.
pub fn load_compile_stamp(layout: &Layout) -> Result<Option<CompileStamp>, String> {
    load_yaml(&layout.compile_stamp())
}

/// Record which fingerprints the compile that just ran consumed.
pub fn save_compile_stamp(layout: &Layout, stamp: &CompileStamp) -> Result<(), String> {
    save_yaml_atomic(&layout.compile_stamp(), stamp)
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let value = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid cache file {}: {}", path.display(), e))?;
    Ok(Some(value))
}

fn save_yaml_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(value).map_err(|e| format!("serialize error: {}", e))?;

    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}
