//! Input resolution: pick the application source from competing channels.
//!
//! Priority is fixed: piped stdin, single-file mount, directory mount,
//! built-in template. A channel that yields zero bytes falls through to the
//! next one. Validation is a heuristic and only warns.

use super::error::InputError;
use super::types::{InputConfig, SourceOrigin};
use regex::Regex;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

/// Template used when no channel provides a source.
pub const FALLBACK_TEMPLATE: &str = r#"// Built-in sigbuild template: prints vehicle speed updates.
#include <iostream>
#include "vss/signals.hpp"

int main() {
    auto client = vss::connect_from_env();
    client.subscribe(vss::Vehicle::Speed, [](const vss::Datapoint& dp) {
        std::cout << "Vehicle.Speed = " << dp.as_float() << std::endl;
    });
    return client.run();
}
"#;

/// The input channels available to one invocation.
#[derive(Debug, Clone, Default)]
pub struct InputChannels {
    pub piped: Option<Vec<u8>>,
    pub file: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub conventional_name: String,
    pub fallback: Option<Vec<u8>>,
}

impl InputChannels {
    /// Channels described by the project config plus an already-read stdin.
    pub fn from_config(config: &InputConfig, piped: Option<Vec<u8>>) -> Self {
        Self {
            piped,
            file: Some(config.file.clone()),
            dir: Some(config.dir.clone()),
            conventional_name: config.conventional_name.clone(),
            fallback: config
                .fallback
                .then(|| FALLBACK_TEMPLATE.as_bytes().to_vec()),
        }
    }
}

/// Read stdin when it is a pipe or file rather than a terminal.
pub fn read_piped_stdin() -> Result<Option<Vec<u8>>, String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buf = Vec::new();
    stdin
        .lock()
        .read_to_end(&mut buf)
        .map_err(|e| format!("cannot read stdin: {}", e))?;
    Ok(Some(buf))
}

/// Resolve exactly one source and its origin.
pub fn resolve(channels: &InputChannels) -> Result<(Vec<u8>, SourceOrigin), InputError> {
    let mut checked = Vec::new();

    checked.push("stdin".to_string());
    if let Some(ref bytes) = channels.piped {
        if !bytes.is_empty() {
            return Ok((bytes.clone(), SourceOrigin::Pipe));
        }
        tracing::debug!("stdin was piped but empty");
    }

    if let Some(ref file) = channels.file {
        checked.push(format!("file {}", file.display()));
        if let Some(bytes) = read_if_present(file)? {
            return Ok((bytes, SourceOrigin::File(file.clone())));
        }
    }

    if let Some(ref dir) = channels.dir {
        let candidate = dir.join(&channels.conventional_name);
        checked.push(format!("directory {}", candidate.display()));
        if let Some(bytes) = read_if_present(&candidate)? {
            return Ok((bytes, SourceOrigin::Directory(dir.clone())));
        }
    }

    if let Some(ref bytes) = channels.fallback {
        if !bytes.is_empty() {
            return Ok((bytes.clone(), SourceOrigin::Fallback));
        }
    }

    Err(InputError::NotFound { checked })
}

/// Non-empty contents of a regular file, `None` if missing or empty.
fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, InputError> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).map_err(|e| InputError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if bytes.is_empty() {
        tracing::debug!(path = %path.display(), "source file is empty, skipping");
        return Ok(None);
    }
    Ok(Some(bytes))
}

/// Outcome of the heuristic source check.
#[derive(Debug, Clone, Default)]
pub struct SourceCheck {
    pub bytes: usize,
    pub lines: usize,
    pub matched_marker: Option<String>,
    pub warnings: Vec<String>,
}

/// Superficially validate a resolved source. Only emptiness is fatal.
pub fn check_source(
    source: &[u8],
    origin: &SourceOrigin,
    markers: &[String],
) -> Result<SourceCheck, InputError> {
    if source.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(InputError::Empty {
            origin: origin.to_string(),
        });
    }

    let mut check = SourceCheck {
        bytes: source.len(),
        ..SourceCheck::default()
    };

    let text = match std::str::from_utf8(source) {
        Ok(t) => t,
        Err(e) => {
            check.warnings.push(format!(
                "source is not valid UTF-8 (first bad byte at offset {})",
                e.valid_up_to()
            ));
            return Ok(check);
        }
    };
    check.lines = text.lines().count();

    for marker in markers {
        match Regex::new(marker) {
            Ok(re) if re.is_match(text) => {
                check.matched_marker = Some(marker.clone());
                break;
            }
            Ok(_) => {}
            Err(e) => check
                .warnings
                .push(format!("skipping invalid marker '{}': {}", marker, e)),
        }
    }
    if check.matched_marker.is_none() && !markers.is_empty() {
        check.warnings.push(
            "no entry-point marker found; the compile stage will have the final word".to_string(),
        );
    }

    Ok(check)
}
