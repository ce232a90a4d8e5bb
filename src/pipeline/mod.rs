use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::{validate_source_url, RunContext, StageKind};
use crate::stages::{OutputPayload, StageExecutor, StageInputs, StageOutput};
use crate::store::{Artifact, ArtifactStore};
use crate::FailureKind;

/// External cancellation signal, checked between stage attempts.
pub type CancelFlag = Arc<AtomicBool>;

/// Why a stage was never attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotAttemptedReason {
    /// A direct predecessor did not resolve to Success or Skipped.
    UpstreamFailed { stage: StageKind },
    /// The run was cancelled before this stage was reached.
    Cancelled,
}

/// Outcome of one stage within one run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage executed and its artifact was persisted.
    Success(Artifact),
    /// A valid cached artifact existed; execution was skipped.
    Skipped(Artifact),
    /// The stage executed and failed. No automatic retry: re-invoking the
    /// pipeline is the retry mechanism, made cheap by the cache.
    Failed { kind: FailureKind, message: String },
    /// The stage was never attempted.
    NotAttempted(NotAttemptedReason),
}

impl StageOutcome {
    /// Success and Skipped both satisfy downstream dependencies.
    pub fn is_resolved(&self) -> bool {
        matches!(self, StageOutcome::Success(_) | StageOutcome::Skipped(_))
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            StageOutcome::Success(artifact) | StageOutcome::Skipped(artifact) => Some(artifact),
            _ => None,
        }
    }
}

/// Terminal state of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage was driven to an outcome.
    Completed,
    /// Cancellation was observed before all stages were attempted.
    Cancelled,
    /// The source reference was invalid; no stage was attempted.
    Rejected { message: String },
}

/// Complete record of per-stage outcomes for one run. Append-only while the
/// run executes, immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub source_url: String,
    pub source_id: String,
    pub status: RunStatus,
    pub stages: IndexMap<StageKind, StageOutcome>,
}

impl RunManifest {
    fn new(ctx: &RunContext, status: RunStatus) -> Self {
        Self {
            source_url: ctx.source_url.clone(),
            source_id: ctx.source_id.clone(),
            status,
            stages: IndexMap::new(),
        }
    }

    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.stages.get(&stage)
    }

    /// True when every requested stage reached Success or Skipped. Drives
    /// the process exit code: partial completion of non-required stages is
    /// reported, not treated as a hard error.
    pub fn required_satisfied(&self, required: &[StageKind]) -> bool {
        required.iter().all(|stage| {
            self.outcome(*stage)
                .map(StageOutcome::is_resolved)
                .unwrap_or(false)
        })
    }
}

/// Owns the stage graph, drives execution order, applies the cache-skip
/// policy, and captures every failure as manifest data.
pub struct Orchestrator {
    store: ArtifactStore,
    executors: HashMap<StageKind, Box<dyn StageExecutor>>,
    cancel: CancelFlag,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(
        store: ArtifactStore,
        executors: HashMap<StageKind, Box<dyn StageExecutor>>,
    ) -> Self {
        Self {
            store,
            executors,
            cancel: Arc::new(AtomicBool::new(false)),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Handle for requesting cancellation from outside the run. A stage
    /// already in flight completes or fails on its own; the flag is only
    /// consulted between attempts.
    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Drive the whole pipeline for one source. Never fails: every stage
    /// failure is captured in the returned manifest so callers can inspect
    /// partial success.
    pub async fn run(&self, ctx: &RunContext) -> RunManifest {
        if let Err(err) = validate_source_url(&ctx.source_url) {
            tracing::error!("Rejecting run: {}", err);
            return RunManifest::new(
                ctx,
                RunStatus::Rejected {
                    message: err.to_string(),
                },
            );
        }

        tracing::info!(
            "Starting pipeline for {} (source id: {})",
            ctx.source_url,
            ctx.source_id
        );

        let mut manifest = RunManifest::new(ctx, RunStatus::Completed);

        for stage in [StageKind::Download, StageKind::Transcribe, StageKind::Summarize] {
            let outcome = self.resolve_stage(stage, ctx, &manifest).await;
            manifest.stages.insert(stage, outcome);
        }

        // BlogGen and PodcastGen share only the Summarize predecessor, so
        // they run concurrently and their outcomes stay independent.
        let (blog, podcast) = tokio::join!(
            self.resolve_stage(StageKind::BlogGen, ctx, &manifest),
            self.resolve_stage(StageKind::PodcastGen, ctx, &manifest),
        );
        manifest.stages.insert(StageKind::BlogGen, blog);
        manifest.stages.insert(StageKind::PodcastGen, podcast);

        let was_cancelled = manifest.stages.values().any(|outcome| {
            matches!(
                outcome,
                StageOutcome::NotAttempted(NotAttemptedReason::Cancelled)
            )
        });
        if was_cancelled {
            manifest.status = RunStatus::Cancelled;
        }

        manifest
    }

    /// Resolve one stage to its outcome: gate on predecessors, try the
    /// cache, then execute with a bounded timeout and persist.
    async fn resolve_stage(
        &self,
        stage: StageKind,
        ctx: &RunContext,
        manifest: &RunManifest,
    ) -> StageOutcome {
        if self.cancelled() {
            tracing::info!("Skipping {}: run cancelled", stage);
            return StageOutcome::NotAttempted(NotAttemptedReason::Cancelled);
        }

        for pred in stage.predecessors() {
            let resolved = manifest
                .outcome(*pred)
                .map(StageOutcome::is_resolved)
                .unwrap_or(false);
            if !resolved {
                tracing::warn!("Not attempting {}: {} did not resolve", stage, pred);
                return StageOutcome::NotAttempted(NotAttemptedReason::UpstreamFailed {
                    stage: *pred,
                });
            }
        }

        if let Some(artifact) = self.store.lookup(stage, &ctx.source_id) {
            tracing::info!("Cache hit for {}: {}", stage, artifact.path.display());
            return StageOutcome::Skipped(artifact);
        }

        let Some(executor) = self.executors.get(&stage) else {
            return StageOutcome::Failed {
                kind: FailureKind::BackendUnavailable,
                message: format!("no executor bound for stage {}", stage),
            };
        };

        let inputs = self.collect_inputs(stage, manifest);

        tracing::info!("Running {} via {}", stage, executor.name());
        let progress = self.spinner(stage);

        let timeout = ctx.limits.stage_timeout;
        let result = tokio::time::timeout(timeout, executor.execute(ctx, &inputs)).await;

        if let Some(progress) = progress {
            progress.finish_and_clear();
        }

        match result {
            Err(_) => StageOutcome::Failed {
                kind: FailureKind::Timeout,
                message: format!("stage timed out after {}s", timeout.as_secs()),
            },
            Ok(Err(err)) => {
                tracing::warn!("{} failed: {}", stage, err);
                StageOutcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
            Ok(Ok(output)) => match self.persist_output(stage, ctx, output) {
                Ok(artifact) => {
                    tracing::info!("{} produced {}", stage, artifact.path.display());
                    StageOutcome::Success(artifact)
                }
                Err(err) => StageOutcome::Failed {
                    kind: FailureKind::DecodeError,
                    message: format!("failed to persist artifact: {}", err),
                },
            },
        }
    }

    /// Artifacts of the stage's direct predecessors, all known resolved.
    fn collect_inputs(&self, stage: StageKind, manifest: &RunManifest) -> StageInputs {
        stage
            .predecessors()
            .iter()
            .filter_map(|pred| {
                manifest
                    .outcome(*pred)
                    .and_then(StageOutcome::artifact)
                    .map(|artifact| (*pred, artifact.clone()))
            })
            .collect()
    }

    fn persist_output(
        &self,
        stage: StageKind,
        ctx: &RunContext,
        output: StageOutput,
    ) -> crate::Result<Artifact> {
        // Siblings first: the primary artifact's presence is what marks the
        // stage complete for later lookups.
        for sibling in &output.siblings {
            self.store
                .persist_sibling(stage, &sibling.file_name, &sibling.content)?;
        }

        match output.payload {
            OutputPayload::Bytes(content) => self.store.persist(stage, &ctx.source_id, &content),
            OutputPayload::StagedFile(path) => {
                self.store.persist_file(stage, &ctx.source_id, &path)
            }
        }
    }

    fn spinner(&self, stage: StageKind) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        progress.set_message(format!("Running {} stage...", stage));
        progress.enable_steady_tick(std::time::Duration::from_millis(120));
        Some(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Limits;
    use crate::stages::StageOutput;
    use crate::StageError;
    use async_trait::async_trait;
    use mockall::mock;
    use tempfile::TempDir;

    mock! {
        Exec {}

        #[async_trait]
        impl StageExecutor for Exec {
            async fn execute(
                &self,
                ctx: &RunContext,
                inputs: &StageInputs,
            ) -> Result<StageOutput, StageError>;

            fn name(&self) -> &'static str;
        }
    }

    fn wav_bytes() -> Vec<u8> {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&[0u8; 24]);
        bytes
    }

    fn ctx(root: &std::path::Path) -> RunContext {
        RunContext::new(
            "https://video.example/abc123",
            root,
            HashMap::new(),
            Limits::default(),
        )
    }

    fn idle_mock() -> MockExec {
        let mut mock = MockExec::new();
        mock.expect_execute().times(0);
        mock.expect_name().return_const("mock");
        mock
    }

    #[tokio::test]
    async fn test_upstream_failure_gates_all_dependents() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut download = MockExec::new();
        download
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(StageOutput::bytes(wav_bytes())));
        download.expect_name().return_const("mock");

        let mut transcribe = MockExec::new();
        transcribe
            .expect_execute()
            .times(1)
            .returning(|_, _| Err(StageError::DecodeError("corrupt audio".to_string())));
        transcribe.expect_name().return_const("mock");

        // Everything downstream of the failure must see zero invocations.
        let mut executors: HashMap<StageKind, Box<dyn StageExecutor>> = HashMap::new();
        executors.insert(StageKind::Download, Box::new(download));
        executors.insert(StageKind::Transcribe, Box::new(transcribe));
        executors.insert(StageKind::Summarize, Box::new(idle_mock()));
        executors.insert(StageKind::BlogGen, Box::new(idle_mock()));
        executors.insert(StageKind::PodcastGen, Box::new(idle_mock()));

        let orchestrator = Orchestrator::new(store, executors);
        let ctx = ctx(dir.path());
        let manifest = orchestrator.run(&ctx).await;

        assert_eq!(manifest.status, RunStatus::Completed);
        assert!(matches!(
            manifest.outcome(StageKind::Download),
            Some(StageOutcome::Success(_))
        ));
        assert!(matches!(
            manifest.outcome(StageKind::Transcribe),
            Some(StageOutcome::Failed { kind: FailureKind::DecodeError, .. })
        ));
        assert!(matches!(
            manifest.outcome(StageKind::Summarize),
            Some(StageOutcome::NotAttempted(NotAttemptedReason::UpstreamFailed {
                stage: StageKind::Transcribe
            }))
        ));
        for stage in [StageKind::BlogGen, StageKind::PodcastGen] {
            assert!(matches!(
                manifest.outcome(stage),
                Some(StageOutcome::NotAttempted(NotAttemptedReason::UpstreamFailed {
                    stage: StageKind::Summarize
                }))
            ));
        }
    }

    #[tokio::test]
    async fn test_cancellation_before_start_attempts_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut executors: HashMap<StageKind, Box<dyn StageExecutor>> = HashMap::new();
        for stage in StageKind::ORDER {
            executors.insert(stage, Box::new(idle_mock()));
        }

        let orchestrator = Orchestrator::new(store, executors);
        orchestrator.cancel_flag().store(true, Ordering::SeqCst);

        let ctx = ctx(dir.path());
        let manifest = orchestrator.run(&ctx).await;

        assert_eq!(manifest.status, RunStatus::Cancelled);
        assert_eq!(manifest.stages.len(), 5);
        for outcome in manifest.stages.values() {
            assert!(matches!(
                outcome,
                StageOutcome::NotAttempted(NotAttemptedReason::Cancelled)
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_source_rejected_with_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut executors: HashMap<StageKind, Box<dyn StageExecutor>> = HashMap::new();
        for stage in StageKind::ORDER {
            executors.insert(stage, Box::new(idle_mock()));
        }

        let orchestrator = Orchestrator::new(store, executors);
        let ctx = RunContext::new("not-a-url", dir.path(), HashMap::new(), Limits::default());
        let manifest = orchestrator.run(&ctx).await;

        assert!(matches!(manifest.status, RunStatus::Rejected { .. }));
        assert!(manifest.stages.is_empty());
        assert!(!manifest.required_satisfied(&[StageKind::Download]));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_failed() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        struct SlowExec;

        #[async_trait]
        impl StageExecutor for SlowExec {
            async fn execute(
                &self,
                _ctx: &RunContext,
                _inputs: &StageInputs,
            ) -> Result<StageOutput, StageError> {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(StageOutput::bytes(wav_bytes()))
            }

            fn name(&self) -> &'static str {
                "slow"
            }
        }

        let mut executors: HashMap<StageKind, Box<dyn StageExecutor>> = HashMap::new();
        executors.insert(StageKind::Download, Box::new(SlowExec));
        executors.insert(StageKind::Transcribe, Box::new(idle_mock()));
        executors.insert(StageKind::Summarize, Box::new(idle_mock()));
        executors.insert(StageKind::BlogGen, Box::new(idle_mock()));
        executors.insert(StageKind::PodcastGen, Box::new(idle_mock()));

        let orchestrator = Orchestrator::new(store, executors);
        let mut ctx = ctx(dir.path());
        ctx.limits.stage_timeout = std::time::Duration::from_millis(50);

        let manifest = orchestrator.run(&ctx).await;
        assert!(matches!(
            manifest.outcome(StageKind::Download),
            Some(StageOutcome::Failed { kind: FailureKind::Timeout, .. })
        ));
    }

    #[test]
    fn test_manifest_serializes_to_json() {
        let ctx = RunContext::new(
            "https://video.example/abc123",
            "/tmp/out",
            HashMap::new(),
            Limits::default(),
        );
        let mut manifest = RunManifest::new(&ctx, RunStatus::Completed);
        manifest.stages.insert(
            StageKind::Download,
            StageOutcome::Failed {
                kind: FailureKind::NetworkError,
                message: "boom".to_string(),
            },
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["stages"]["download"]["outcome"], "failed");
        assert_eq!(json["stages"]["download"]["detail"]["kind"], "network_error");
    }
}
