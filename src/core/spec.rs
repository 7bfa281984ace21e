//! Specification resolution: which signal document to build against, and
//! whether the generated bindings derived from it are stale.
//!
//! Any custom document (URL or local file) always regenerates. A failed
//! remote fetch is fatal unless fallback to the default was opted into.

use super::error::SpecError;
use super::types::{Fingerprint, SpecConfig, SpecSource};
use super::workspace::{self, Layout};
use crate::provenance::hasher;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Build the active source from the mutually exclusive CLI/env options.
pub fn source_from_options(
    url: Option<String>,
    file: Option<PathBuf>,
) -> Result<SpecSource, SpecError> {
    let url = url.filter(|u| !u.trim().is_empty());
    let file = file.filter(|f| !f.as_os_str().is_empty());
    match (url, file) {
        (Some(_), Some(_)) => Err(SpecError::Conflict),
        (Some(url), None) => Ok(SpecSource::RemoteUrl(url)),
        (None, Some(file)) => Ok(SpecSource::LocalFile(file)),
        (None, None) => Ok(SpecSource::Default),
    }
}

/// Why bindings must be regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateReason {
    NoGeneratedOutput,
    Forced,
    CustomSpec,
    SpecChanged,
    /// Generation was invoked on its own
    Requested,
}

impl fmt::Display for RegenerateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGeneratedOutput => write!(f, "no generated bindings yet"),
            Self::Forced => write!(f, "--force"),
            Self::CustomSpec => write!(f, "custom specification"),
            Self::SpecChanged => write!(f, "default specification changed"),
            Self::Requested => write!(f, "explicitly requested"),
        }
    }
}

/// Reuse the existing bindings or regenerate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecDecision {
    Reuse,
    Regenerate(RegenerateReason),
}

impl SpecDecision {
    pub fn regenerates(&self) -> bool {
        matches!(self, Self::Regenerate(_))
    }
}

/// What is on disk from the previous generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedState {
    pub has_output: bool,
    /// Fingerprint of the spec the bindings were generated from
    pub generated_from: Option<Fingerprint>,
    /// Fingerprint of the default document as it is now
    pub default_fingerprint: Option<Fingerprint>,
}

impl GeneratedState {
    pub fn inspect(layout: &Layout, config: &SpecConfig) -> Self {
        Self {
            has_output: layout.has_generated_output(),
            generated_from: workspace::read_stamp(&layout.generated_stamp()),
            default_fingerprint: hasher::hash_file_if_exists(&config.default)
                .ok()
                .flatten(),
        }
    }
}

/// Decide whether bindings must be regenerated. Pure.
pub fn decide(source: &SpecSource, generated: &GeneratedState, force: bool) -> SpecDecision {
    if !generated.has_output {
        return SpecDecision::Regenerate(RegenerateReason::NoGeneratedOutput);
    }
    if force {
        return SpecDecision::Regenerate(RegenerateReason::Forced);
    }
    if source.is_custom() {
        return SpecDecision::Regenerate(RegenerateReason::CustomSpec);
    }
    match (&generated.generated_from, &generated.default_fingerprint) {
        (Some(from), Some(current)) if from != current => {
            SpecDecision::Regenerate(RegenerateReason::SpecChanged)
        }
        _ => SpecDecision::Reuse,
    }
}

/// A specification document loaded into memory.
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    /// The source actually used (differs from the request after a fallback)
    pub used: SpecSource,
    pub fell_back: bool,
}

/// Load the document for `source`, fetching over the network if remote.
pub fn load(source: &SpecSource, config: &SpecConfig) -> Result<ResolvedSpec, SpecError> {
    let (bytes, used, fell_back) = match source {
        SpecSource::Default => (read_local(&config.default)?, SpecSource::Default, false),
        SpecSource::LocalFile(path) => (read_local(path)?, source.clone(), false),
        SpecSource::RemoteUrl(url) => {
            let timeout = Duration::from_secs(config.fetch_timeout_secs);
            match fetch_remote(url, timeout) {
                Ok(bytes) => (bytes, source.clone(), false),
                Err(e) if config.fallback_to_default => {
                    tracing::warn!(error = %e, "remote specification unavailable, using default");
                    (read_local(&config.default)?, SpecSource::Default, true)
                }
                Err(e) => return Err(e),
            }
        }
    };

    check_document(&bytes, &used)?;

    Ok(ResolvedSpec {
        fingerprint: hasher::hash_bytes(&bytes),
        bytes,
        used,
        fell_back,
    })
}

fn read_local(path: &Path) -> Result<Vec<u8>, SpecError> {
    if !path.is_file() {
        return Err(SpecError::NotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read(path).map_err(|_| SpecError::NotFound {
        path: path.to_path_buf(),
    })
}

/// The document must be a JSON object.
pub fn check_document(bytes: &[u8], origin: &SpecSource) -> Result<(), SpecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| SpecError::Parse {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(SpecError::Parse {
            origin: origin.to_string(),
            reason: "top-level value is not an object".to_string(),
        });
    }
    Ok(())
}

/// Fetch a remote document with a bounded timeout. No retries.
pub fn fetch_remote(url: &str, timeout: Duration) -> Result<Vec<u8>, SpecError> {
    let fail = |reason: String| SpecError::FetchFailed {
        url: url.to_string(),
        reason,
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(fail("only http:// and https:// URLs are supported".to_string()));
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| fail(format!("cannot start runtime: {}", e)))?;
    tracing::debug!(url, timeout_secs = timeout.as_secs(), "fetching specification");
    rt.block_on(fetch_async(url, timeout)).map_err(fail)
}

async fn fetch_async(url: &str, timeout: Duration) -> Result<Vec<u8>, String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("cannot build HTTP client: {}", e))?;
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            format!("timed out after {}s", timeout.as_secs())
        } else {
            e.to_string()
        }
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| format!("body read error: {}", e))?;
    Ok(body.to_vec())
}

/// Write the resolved document to the workspace (temp file, then rename).
pub fn materialize(spec: &ResolvedSpec, layout: &Layout) -> Result<PathBuf, String> {
    let path = layout.spec_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &spec.bytes)
        .map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp.display(),
            path.display(),
            e
        )
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    const DOC: &str = r#"{"Vehicle":{"type":"branch","children":{"Speed":{"type":"sensor","datatype":"float"}}}}"#;

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/vss.json", addr)
    }

    fn unused_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/vss.json", addr)
    }

    fn config_with_default(path: &Path) -> SpecConfig {
        SpecConfig {
            default: path.to_path_buf(),
            fetch_timeout_secs: 2,
            fallback_to_default: false,
        }
    }

    fn generated(has_output: bool) -> GeneratedState {
        GeneratedState {
            has_output,
            generated_from: None,
            default_fingerprint: None,
        }
    }

    #[test]
    fn test_source_from_options() {
        assert_eq!(source_from_options(None, None).unwrap(), SpecSource::Default);
        assert_eq!(
            source_from_options(Some("https://x/vss.json".into()), None).unwrap(),
            SpecSource::RemoteUrl("https://x/vss.json".into())
        );
        assert_eq!(
            source_from_options(None, Some(PathBuf::from("my.json"))).unwrap(),
            SpecSource::LocalFile(PathBuf::from("my.json"))
        );
        assert!(matches!(
            source_from_options(Some("https://x".into()), Some(PathBuf::from("y"))),
            Err(SpecError::Conflict)
        ));
        // Empty env values count as unset
        assert_eq!(
            source_from_options(Some(" ".into()), Some(PathBuf::new())).unwrap(),
            SpecSource::Default
        );
    }

    #[test]
    fn test_decide_default_with_output_reuses() {
        assert_eq!(
            decide(&SpecSource::Default, &generated(true), false),
            SpecDecision::Reuse
        );
    }

    #[test]
    fn test_decide_no_output_regenerates() {
        assert_eq!(
            decide(&SpecSource::Default, &generated(false), false),
            SpecDecision::Regenerate(RegenerateReason::NoGeneratedOutput)
        );
    }

    #[test]
    fn test_decide_force_regenerates() {
        assert_eq!(
            decide(&SpecSource::Default, &generated(true), true),
            SpecDecision::Regenerate(RegenerateReason::Forced)
        );
    }

    #[test]
    fn test_decide_custom_always_regenerates() {
        let url = SpecSource::RemoteUrl("https://x/vss.json".into());
        let file = SpecSource::LocalFile(PathBuf::from("vss.json"));
        assert_eq!(
            decide(&url, &generated(true), false),
            SpecDecision::Regenerate(RegenerateReason::CustomSpec)
        );
        assert!(decide(&file, &generated(true), false).regenerates());
    }

    #[test]
    fn test_decide_default_changed_regenerates() {
        let state = GeneratedState {
            has_output: true,
            generated_from: Some(hasher::hash_bytes(b"old")),
            default_fingerprint: Some(hasher::hash_bytes(b"new")),
        };
        assert_eq!(
            decide(&SpecSource::Default, &state, false),
            SpecDecision::Regenerate(RegenerateReason::SpecChanged)
        );
        let same = GeneratedState {
            default_fingerprint: Some(hasher::hash_bytes(b"old")),
            ..state
        };
        assert_eq!(decide(&SpecSource::Default, &same, false), SpecDecision::Reuse);
    }

    #[test]
    fn test_load_default() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("vss.json");
        std::fs::write(&default, DOC).unwrap();
        let spec = load(&SpecSource::Default, &config_with_default(&default)).unwrap();
        assert_eq!(spec.fingerprint, hasher::hash_bytes(DOC.as_bytes()));
        assert!(!spec.fell_back);
    }

    #[test]
    fn test_load_local_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_default(&dir.path().join("vss.json"));
        let err = load(
            &SpecSource::LocalFile(dir.path().join("custom.json")),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::NotFound { .. }));
    }

    #[test]
    fn test_load_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom.json");
        std::fs::write(&custom, "[1, 2, 3]").unwrap();
        let config = config_with_default(&dir.path().join("vss.json"));
        let err = load(&SpecSource::LocalFile(custom.clone()), &config).unwrap_err();
        assert!(matches!(err, SpecError::Parse { .. }));

        std::fs::write(&custom, "Vehicle:\n  type: branch\n").unwrap();
        let err = load(&SpecSource::LocalFile(custom), &config).unwrap_err();
        assert!(matches!(err, SpecError::Parse { .. }));
    }

    #[test]
    fn test_fetch_remote_ok() {
        let url = serve_once("HTTP/1.1 200 OK", DOC);
        let bytes = fetch_remote(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(bytes, DOC.as_bytes());
    }

    #[test]
    fn test_fetch_remote_http_error() {
        let url = serve_once("HTTP/1.1 404 Not Found", "missing");
        let err = fetch_remote(&url, Duration::from_secs(5)).unwrap_err();
        match err {
            SpecError::FetchFailed { reason, .. } => assert!(reason.contains("404")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fetch_remote_refused() {
        let err = fetch_remote(&unused_port_url(), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, SpecError::FetchFailed { .. }));
    }

    #[test]
    fn test_fetch_remote_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((_stream, _)) = listener.accept() {
                std::thread::sleep(Duration::from_secs(3));
            }
        });
        let start = std::time::Instant::now();
        let err = fetch_remote(&format!("http://{}/vss.json", addr), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, SpecError::FetchFailed { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_fetch_rejects_scheme() {
        let err = fetch_remote("ftp://example.com/vss.json", Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_remote_failure_is_fatal_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("vss.json");
        std::fs::write(&default, DOC).unwrap();
        let err = load(
            &SpecSource::RemoteUrl(unused_port_url()),
            &config_with_default(&default),
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::FetchFailed { .. }));
    }

    #[test]
    fn test_remote_failure_falls_back_when_opted_in() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("vss.json");
        std::fs::write(&default, DOC).unwrap();
        let config = SpecConfig {
            fallback_to_default: true,
            ..config_with_default(&default)
        };
        let spec = load(&SpecSource::RemoteUrl(unused_port_url()), &config).unwrap();
        assert!(spec.fell_back);
        assert_eq!(spec.used, SpecSource::Default);
    }

    #[test]
    fn test_materialize_writes_workspace_spec() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::core::types::BuildConfig {
            workspace: dir.path().join("ws"),
            ..Default::default()
        };
        let layout = Layout::from_config(&config);
        let spec = ResolvedSpec {
            bytes: DOC.as_bytes().to_vec(),
            fingerprint: hasher::hash_bytes(DOC.as_bytes()),
            used: SpecSource::Default,
            fell_back: false,
        };
        let path = materialize(&spec, &layout).unwrap();
        assert_eq!(path, layout.spec_file());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DOC);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
