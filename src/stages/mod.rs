use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::context::{BackendId, RunContext, StageKind};
use crate::store::Artifact;
use crate::StageError;

pub mod blog;
pub mod download;
pub mod hosted;
pub mod podcast;
pub mod summarize;
pub mod transcribe;

/// Artifacts of the predecessor stages, keyed by stage.
pub type StageInputs = HashMap<StageKind, Artifact>;

/// What a stage execution produced. Small text outputs are returned as
/// bytes; large media stays on disk in a staging location and is moved into
/// the store by the orchestrator.
#[derive(Debug)]
pub enum OutputPayload {
    Bytes(Vec<u8>),
    StagedFile(PathBuf),
}

/// Sibling file persisted next to a stage's primary artifact.
#[derive(Debug)]
pub struct SiblingFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug)]
pub struct StageOutput {
    pub payload: OutputPayload,
    pub siblings: Vec<SiblingFile>,
}

impl StageOutput {
    pub fn bytes(content: Vec<u8>) -> Self {
        Self {
            payload: OutputPayload::Bytes(content),
            siblings: Vec::new(),
        }
    }

    pub fn staged_file(path: PathBuf) -> Self {
        Self {
            payload: OutputPayload::StagedFile(path),
            siblings: Vec::new(),
        }
    }

    pub fn with_sibling(mut self, file_name: impl Into<String>, content: Vec<u8>) -> Self {
        self.siblings.push(SiblingFile {
            file_name: file_name.into(),
            content,
        });
        self
    }
}

/// Uniform contract every stage implementation satisfies. Backend selection
/// happens in [`executor_set`]; the orchestrator only ever sees this trait.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &RunContext,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;
}

/// Build the executor for every stage according to the context's backend
/// choices. Swapping a backend is a change here and in configuration, never
/// in the orchestrator.
pub fn executor_set(
    ctx: &RunContext,
    config: &Config,
) -> crate::Result<HashMap<StageKind, Box<dyn StageExecutor>>> {
    let mut executors: HashMap<StageKind, Box<dyn StageExecutor>> = HashMap::new();

    for stage in StageKind::ORDER {
        let backend = ctx.backend_for(stage);
        executors.insert(stage, executor_for(stage, backend, ctx, config)?);
    }

    Ok(executors)
}

fn executor_for(
    stage: StageKind,
    backend: BackendId,
    ctx: &RunContext,
    config: &Config,
) -> crate::Result<Box<dyn StageExecutor>> {
    let executor: Box<dyn StageExecutor> = match (stage, backend) {
        (StageKind::Download, BackendId::Local) => {
            Box::new(download::MediaDownloader::new(config)?)
        }
        (StageKind::Transcribe, BackendId::Local) => {
            Box::new(transcribe::WhisperTranscriber::new(config))
        }
        // "local" summarization without a bundled model is the same
        // deterministic extractive strategy the template selector names.
        (StageKind::Summarize, BackendId::Template | BackendId::Local) => {
            Box::new(summarize::ExtractiveSummarizer::new())
        }
        (StageKind::Summarize, BackendId::Hosted) => {
            Box::new(summarize::HostedSummarizer::new(hosted_client(ctx, config)?))
        }
        (StageKind::BlogGen, BackendId::Template | BackendId::Local) => {
            Box::new(blog::TemplateBlogWriter::new())
        }
        (StageKind::BlogGen, BackendId::Hosted) => {
            Box::new(blog::HostedBlogWriter::new(hosted_client(ctx, config)?))
        }
        (StageKind::PodcastGen, BackendId::Local) => {
            Box::new(podcast::EspeakSynthesizer::new(config))
        }
        (StageKind::PodcastGen, BackendId::Hosted) => {
            Box::new(podcast::HostedSpeechSynthesizer::new(hosted_client(ctx, config)?))
        }
        (stage, backend) => {
            anyhow::bail!("stage {} has no {} backend", stage, backend)
        }
    };

    Ok(executor)
}

fn hosted_client(ctx: &RunContext, config: &Config) -> crate::Result<hosted::HostedClient> {
    if !ctx.hosted_api_enabled {
        anyhow::bail!(
            "hosted backend requested but the hosted API is not configured \
             (set {} and enable it in the config file)",
            config.hosted.api_key_env
        );
    }
    hosted::HostedClient::new(config, ctx.limits.stage_timeout)
}

/// Read a required predecessor artifact as UTF-8 text.
pub(crate) fn input_text(inputs: &StageInputs, stage: StageKind) -> Result<String, StageError> {
    let artifact = inputs
        .get(&stage)
        .ok_or_else(|| StageError::DecodeError(format!("missing {} input artifact", stage)))?;

    let text = fs_err::read_to_string(&artifact.path).map_err(|e| {
        StageError::DecodeError(format!(
            "failed to read {} artifact {}: {}",
            stage,
            artifact.path.display(),
            e
        ))
    })?;

    if text.trim().is_empty() {
        return Err(StageError::DecodeError(format!(
            "{} artifact is empty: {}",
            stage,
            artifact.path.display()
        )));
    }

    Ok(text)
}
