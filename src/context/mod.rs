use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::StageError;

/// One unit of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Download,
    Transcribe,
    Summarize,
    BlogGen,
    PodcastGen,
}

impl StageKind {
    /// All stages in dependency (topological) order.
    pub const ORDER: [StageKind; 5] = [
        StageKind::Download,
        StageKind::Transcribe,
        StageKind::Summarize,
        StageKind::BlogGen,
        StageKind::PodcastGen,
    ];

    /// Directory name under the output root for this stage's artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Download => "download",
            StageKind::Transcribe => "transcribe",
            StageKind::Summarize => "summarize",
            StageKind::BlogGen => "blog",
            StageKind::PodcastGen => "podcast",
        }
    }

    /// File extension of the primary artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            StageKind::Download => "mp3",
            StageKind::Transcribe => "txt",
            StageKind::Summarize => "txt",
            StageKind::BlogGen => "md",
            StageKind::PodcastGen => "wav",
        }
    }

    /// Stages whose artifacts this stage consumes directly.
    pub fn predecessors(&self) -> &'static [StageKind] {
        match self {
            StageKind::Download => &[],
            StageKind::Transcribe => &[StageKind::Download],
            StageKind::Summarize => &[StageKind::Transcribe],
            // BlogGen and PodcastGen are siblings: both depend only on
            // Summarize, never on each other.
            StageKind::BlogGen => &[StageKind::Summarize],
            StageKind::PodcastGen => &[StageKind::Summarize],
        }
    }

    /// Whether the primary artifact is plain text (drives well-formedness checks).
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            StageKind::Transcribe | StageKind::Summarize | StageKind::BlogGen
        )
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interchangeable implementation strategy for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Local execution: external tool or deterministic in-process logic.
    Local,
    /// Deterministic templated generation with no external call.
    Template,
    /// Remote hosted-API generation.
    Hosted,
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendId::Local => write!(f, "local"),
            BackendId::Template => write!(f, "template"),
            BackendId::Hosted => write!(f, "hosted"),
        }
    }
}

/// Resource bounds applied to stage execution.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum number of words in the generated summary.
    pub summary_max_words: usize,

    /// Speech-recognition model size selector (tiny, base, small, medium, large).
    pub model_size: String,

    /// Upper bound on a single stage attempt.
    pub stage_timeout: Duration,

    /// Voice selector for local speech synthesis.
    pub tts_voice: String,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            summary_max_words: 150,
            model_size: "base".to_string(),
            stage_timeout: Duration::from_secs(600),
            tts_voice: "en".to_string(),
        }
    }
}

/// Immutable per-invocation configuration, owned by the orchestrator and
/// passed by reference to every stage executor.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// The video source reference as given on the command line.
    pub source_url: String,

    /// Deterministic identity derived from the source reference; all artifact
    /// paths for this run are keyed on it.
    pub source_id: String,

    /// Root directory for persisted artifacts.
    pub output_root: PathBuf,

    /// Chosen backend per stage. Stages absent from the map use their default.
    pub backends: HashMap<StageKind, BackendId>,

    /// Resource bounds for this run.
    pub limits: Limits,

    /// Optional human title carried into blog generation.
    pub title: Option<String>,

    /// Whether hosted-API backends are usable, resolved once at startup.
    pub hosted_api_enabled: bool,
}

impl RunContext {
    pub fn new(
        source_url: impl Into<String>,
        output_root: impl Into<PathBuf>,
        backends: HashMap<StageKind, BackendId>,
        limits: Limits,
    ) -> Self {
        let source_url = source_url.into();
        let source_id = derive_source_id(&source_url);
        Self {
            source_url,
            source_id,
            output_root: output_root.into(),
            backends,
            limits,
            title: None,
            hosted_api_enabled: false,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_hosted_api(mut self, enabled: bool) -> Self {
        self.hosted_api_enabled = enabled;
        self
    }

    /// Backend bound to a stage, falling back to the stage's natural default.
    pub fn backend_for(&self, stage: StageKind) -> BackendId {
        self.backends.get(&stage).copied().unwrap_or(match stage {
            StageKind::Download | StageKind::Transcribe | StageKind::PodcastGen => BackendId::Local,
            StageKind::Summarize | StageKind::BlogGen => BackendId::Template,
        })
    }
}

/// Validate that a source reference is a well-formed video URL.
///
/// Only `http` and `https` schemes are recognizable video sources; anything
/// else is rejected before any stage is attempted.
pub fn validate_source_url(url: &str) -> Result<Url, StageError> {
    let parsed =
        Url::parse(url).map_err(|_| StageError::InvalidInput(format!("not a URL: {}", url)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StageError::InvalidInput(format!(
            "URL must use http or https: {}",
            url
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(StageError::InvalidInput(format!("URL has no host: {}", url)));
    }

    Ok(parsed)
}

/// Derive a stable, filesystem-safe identity for a source reference.
///
/// YouTube-style video ids are used directly when recognizable so artifact
/// paths stay human-readable; everything else falls back to a hash prefix of
/// the raw reference. Invalid URLs still get an identity here - rejection is
/// the orchestrator's job, not this function's.
pub fn derive_source_id(source_url: &str) -> String {
    if let Ok(url) = Url::parse(source_url) {
        if let Some(id) = youtube_video_id(&url) {
            return sanitize_id(&id);
        }
    }

    let digest = Sha256::digest(source_url.as_bytes());
    // 12 hex chars is plenty for a single-user output tree.
    hex_prefix(&digest, 12)
}

fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.").to_lowercase();

    match host.as_str() {
        "youtube.com" | "m.youtube.com" => url
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned()),
        "youtu.be" => url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in bytes {
        if out.len() >= len {
            break;
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source_url() {
        assert!(validate_source_url("https://video.example/abc123").is_ok());
        assert!(validate_source_url("http://youtube.com/watch?v=x").is_ok());
        assert!(validate_source_url("not-a-url").is_err());
        assert!(validate_source_url("ftp://example.com/file.mp4").is_err());
        assert!(validate_source_url("file:///tmp/video.mp4").is_err());
    }

    #[test]
    fn test_source_id_from_youtube_urls() {
        assert_eq!(
            derive_source_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            "dQw4w9WgXcQ"
        );
        assert_eq!(derive_source_id("https://youtu.be/dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(
            derive_source_id("https://m.youtube.com/watch?v=abc_-123"),
            "abc_-123"
        );
    }

    #[test]
    fn test_source_id_fallback_is_stable() {
        let a = derive_source_id("https://video.example/abc123");
        let b = derive_source_id("https://video.example/abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let c = derive_source_id("https://video.example/other");
        assert_ne!(a, c);
    }

    #[test]
    fn test_stage_graph_shape() {
        assert!(StageKind::Download.predecessors().is_empty());
        assert_eq!(StageKind::BlogGen.predecessors(), &[StageKind::Summarize]);
        assert_eq!(StageKind::PodcastGen.predecessors(), &[StageKind::Summarize]);
        // Every predecessor appears earlier in ORDER.
        for (i, stage) in StageKind::ORDER.iter().enumerate() {
            for pred in stage.predecessors() {
                let j = StageKind::ORDER.iter().position(|s| s == pred).unwrap();
                assert!(j < i, "{} must precede {}", pred, stage);
            }
        }
    }

    #[test]
    fn test_backend_defaults() {
        let ctx = RunContext::new(
            "https://video.example/abc123",
            "/tmp/out",
            HashMap::new(),
            Limits::default(),
        );
        assert_eq!(ctx.backend_for(StageKind::Download), BackendId::Local);
        assert_eq!(ctx.backend_for(StageKind::BlogGen), BackendId::Template);

        let mut backends = HashMap::new();
        backends.insert(StageKind::BlogGen, BackendId::Hosted);
        let ctx = RunContext::new(
            "https://video.example/abc123",
            "/tmp/out",
            backends,
            Limits::default(),
        );
        assert_eq!(ctx.backend_for(StageKind::BlogGen), BackendId::Hosted);
    }
}
