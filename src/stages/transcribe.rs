use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

use super::{StageExecutor, StageInputs, StageOutput};
use crate::config::Config;
use crate::context::{RunContext, StageKind};
use crate::StageError;

/// Transcribe stage: local speech recognition via the whisper CLI.
pub struct WhisperTranscriber {
    whisper_path: String,
}

/// Time-aligned transcript segment.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

impl WhisperTranscriber {
    pub fn new(config: &Config) -> Self {
        Self {
            whisper_path: config.tools.whisper_path.clone(),
        }
    }

    /// Check if the whisper CLI is available.
    async fn whisper_available(&self) -> bool {
        Command::new(&self.whisper_path)
            .arg("--help")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn run_whisper(
        &self,
        audio: &Path,
        model_size: &str,
        out_dir: &Path,
    ) -> Result<WhisperOutput, StageError> {
        tracing::debug!("Transcribing {} with model {}", audio.display(), model_size);

        let audio_arg = audio.to_string_lossy();
        let output = Command::new(&self.whisper_path)
            .args([
                audio_arg.as_ref(),
                "--model", model_size,
                "--output_format", "json",
                "--output_dir", &out_dir.to_string_lossy(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::ModelLoadError(format!("failed to spawn whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::DecodeError(format!(
                "whisper failed: {}",
                stderr.trim()
            )));
        }

        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let json_path = out_dir.join(format!("{}.json", stem));

        let json = fs_err::read_to_string(&json_path).map_err(|e| {
            StageError::DecodeError(format!("whisper produced no JSON output: {}", e))
        })?;

        serde_json::from_str(&json)
            .map_err(|e| StageError::DecodeError(format!("unparseable whisper output: {}", e)))
    }
}

/// Render segments as `[start - end]: text` lines, times to two decimals.
pub fn format_segments(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push_str(&format!(
            "[{:.2} - {:.2}]: {}\n",
            segment.start,
            segment.end,
            segment.text.trim()
        ));
    }
    out
}

#[async_trait]
impl StageExecutor for WhisperTranscriber {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let media = inputs.get(&StageKind::Download).ok_or_else(|| {
            StageError::DecodeError("missing download input artifact".to_string())
        })?;

        if !self.whisper_available().await {
            return Err(StageError::ModelLoadError(format!(
                "{} is not available; install it with: pip install openai-whisper",
                self.whisper_path
            )));
        }

        let scratch = TempDir::new()
            .map_err(|e| StageError::DecodeError(format!("cannot create scratch dir: {}", e)))?;

        let result = self
            .run_whisper(&media.path, &ctx.limits.model_size, scratch.path())
            .await?;

        let transcript = result.text.trim().to_string();
        if transcript.is_empty() {
            return Err(StageError::DecodeError(
                "transcription produced no text".to_string(),
            ));
        }

        let segments = format_segments(&result.segments);

        Ok(StageOutput::bytes(transcript.into_bytes()).with_sibling(
            format!("{}_segments.txt", ctx.source_id),
            segments.into_bytes(),
        ))
    }

    fn name(&self) -> &'static str {
        "local whisper transcriber"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_segments_two_decimals() {
        let segments = vec![
            TranscriptSegment {
                start: 0.0,
                end: 4.519,
                text: " Hello and welcome.".to_string(),
            },
            TranscriptSegment {
                start: 4.519,
                end: 10.0,
                text: " Today we talk about pipelines.".to_string(),
            },
        ];

        let rendered = format_segments(&segments);
        assert_eq!(
            rendered,
            "[0.00 - 4.52]: Hello and welcome.\n\
             [4.52 - 10.00]: Today we talk about pipelines.\n"
        );
    }

    #[test]
    fn test_format_segments_empty() {
        assert_eq!(format_segments(&[]), "");
    }

    #[test]
    fn test_whisper_json_parse() {
        let json = r#"{
            "text": " Hello world.",
            "segments": [
                {"id": 0, "start": 0.0, "end": 2.5, "text": " Hello world.", "tokens": []}
            ],
            "language": "en"
        }"#;
        let parsed: WhisperOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text.trim(), "Hello world.");
        assert_eq!(parsed.segments.len(), 1);
        assert!((parsed.segments[0].end - 2.5).abs() < f64::EPSILON);
    }
}
