//! Artifact location and verification.
//!
//! Candidates are checked in configured order; glob patterns expand in
//! sorted order. The first regular, non-empty, executable file wins.

use super::error::{ArtifactError, CandidateCheck};
use super::workspace::Layout;
use std::path::{Path, PathBuf};

/// A binary that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Find the first qualifying binary among the configured candidates.
pub fn locate(candidates: &[String], layout: &Layout) -> Result<LocatedArtifact, ArtifactError> {
    let mut checked = Vec::new();

    for candidate in candidates {
        for path in expand(candidate, layout, &mut checked) {
            match verify(&path) {
                Ok(size) => {
                    tracing::debug!(path = %path.display(), size, "artifact located");
                    return Ok(LocatedArtifact { path, size });
                }
                Err(reason) => checked.push(CandidateCheck { path, reason }),
            }
        }
    }

    Err(ArtifactError::NotFound { checked })
}

/// Expand one candidate into concrete paths. A glob that matches nothing is
/// recorded as checked so the error still names it.
fn expand(candidate: &str, layout: &Layout, checked: &mut Vec<CandidateCheck>) -> Vec<PathBuf> {
    let resolved = layout.resolve(candidate);
    if !is_pattern(candidate) {
        return vec![resolved];
    }

    let pattern = resolved.to_string_lossy().to_string();
    let paths = match glob::glob(&pattern) {
        Ok(paths) => {
            let mut v: Vec<PathBuf> = paths.flatten().collect();
            v.sort();
            v
        }
        Err(e) => {
            checked.push(CandidateCheck {
                path: resolved,
                reason: format!("invalid pattern: {}", e),
            });
            return Vec::new();
        }
    };
    if paths.is_empty() {
        checked.push(CandidateCheck {
            path: resolved,
            reason: "no match".to_string(),
        });
    }
    paths
}

fn is_pattern(candidate: &str) -> bool {
    candidate.contains(['*', '?', '['])
}

/// Check one path: must exist, be a regular file, be non-empty, and carry
/// an execute bit. Returns the size, or why it was rejected.
pub fn verify(path: &Path) -> Result<u64, String> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err("missing".to_string()),
        Err(e) => return Err(format!("unreadable: {}", e)),
    };
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    if meta.len() == 0 {
        return Err("empty".to_string());
    }
    if !is_executable(&meta) {
        return Err("not executable".to_string());
    }
    Ok(meta.len())
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}
