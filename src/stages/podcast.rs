use async_trait::async_trait;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

use super::{hosted::HostedClient, input_text, StageExecutor, StageInputs, StageOutput};
use crate::config::Config;
use crate::context::{RunContext, StageKind};
use crate::StageError;

/// Podcast stage: local text-to-speech via the espeak-ng CLI.
pub struct EspeakSynthesizer {
    espeak_path: String,
}

impl EspeakSynthesizer {
    pub fn new(config: &Config) -> Self {
        Self {
            espeak_path: config.tools.espeak_path.clone(),
        }
    }

    /// Check if espeak-ng is available.
    async fn espeak_available(&self) -> bool {
        Command::new(&self.espeak_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, StageError> {
        let scratch = TempDir::new()
            .map_err(|e| StageError::SynthesisError(format!("cannot create scratch dir: {}", e)))?;

        let text_path = scratch.path().join("narration.txt");
        let wav_path = scratch.path().join("narration.wav");

        fs_err::write(&text_path, text)
            .map_err(|e| StageError::SynthesisError(format!("cannot stage narration: {}", e)))?;

        tracing::debug!("Synthesizing {} chars with voice {}", text.len(), voice);

        let output = Command::new(&self.espeak_path)
            .args([
                "-v", voice,
                "-w", &wav_path.to_string_lossy(),
                "-f", &text_path.to_string_lossy(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::SynthesisError(format!("failed to spawn espeak: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::SynthesisError(format!(
                "espeak failed: {}",
                stderr.trim()
            )));
        }

        let audio = fs_err::read(&wav_path)
            .map_err(|e| StageError::SynthesisError(format!("no audio produced: {}", e)))?;

        if audio.is_empty() {
            return Err(StageError::SynthesisError(
                "synthesis produced empty audio".to_string(),
            ));
        }

        Ok(audio)
    }
}

#[async_trait]
impl StageExecutor for EspeakSynthesizer {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let summary = input_text(inputs, StageKind::Summarize)?;

        if !self.espeak_available().await {
            return Err(StageError::BackendUnavailable(format!(
                "{} is not available; install espeak-ng for local synthesis",
                self.espeak_path
            )));
        }

        let audio = self.synthesize(&summary, &ctx.limits.tts_voice).await?;
        Ok(StageOutput::bytes(audio))
    }

    fn name(&self) -> &'static str {
        "local espeak synthesizer"
    }
}

/// Hosted-API speech synthesis backend.
pub struct HostedSpeechSynthesizer {
    client: HostedClient,
}

impl HostedSpeechSynthesizer {
    pub fn new(client: HostedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageExecutor for HostedSpeechSynthesizer {
    async fn execute(
        &self,
        _ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let summary = input_text(inputs, StageKind::Summarize)?;
        let audio = self.client.speech(&summary).await?;
        Ok(StageOutput::bytes(audio))
    }

    fn name(&self) -> &'static str {
        "hosted API speech synthesizer"
    }
}
