use anyhow::Result;
use console::style;
use std::path::Path;

use crate::cli::ManifestFormat;
use crate::pipeline::{NotAttemptedReason, RunManifest, RunStatus, StageOutcome};

/// Render a manifest as human-readable text.
pub fn render_text(manifest: &RunManifest) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Run for {} (source id: {})\n",
        manifest.source_url, manifest.source_id
    ));

    match &manifest.status {
        RunStatus::Completed => {}
        RunStatus::Cancelled => {
            out.push_str(&format!("{}\n", style("Run cancelled").yellow()));
        }
        RunStatus::Rejected { message } => {
            out.push_str(&format!("{} {}\n", style("Rejected:").red().bold(), message));
            return out;
        }
    }

    for (stage, outcome) in &manifest.stages {
        let line = match outcome {
            StageOutcome::Success(artifact) => format!(
                "  {} {:<11} {}",
                style("✓").green(),
                stage.to_string(),
                artifact.path.display()
            ),
            StageOutcome::Skipped(artifact) => format!(
                "  {} {:<11} {} (cached)",
                style("↷").cyan(),
                stage.to_string(),
                artifact.path.display()
            ),
            StageOutcome::Failed { kind, message } => format!(
                "  {} {:<11} {:?}: {}",
                style("✗").red(),
                stage.to_string(),
                kind,
                message
            ),
            StageOutcome::NotAttempted(NotAttemptedReason::UpstreamFailed { stage: pred }) => {
                format!(
                    "  {} {:<11} not attempted ({} did not resolve)",
                    style("-").dim(),
                    stage.to_string(),
                    pred
                )
            }
            StageOutcome::NotAttempted(NotAttemptedReason::Cancelled) => format!(
                "  {} {:<11} not attempted (cancelled)",
                style("-").dim(),
                stage.to_string()
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }

    out
}

/// Render a manifest as pretty-printed JSON.
pub fn render_json(manifest: &RunManifest) -> Result<String> {
    Ok(serde_json::to_string_pretty(manifest)?)
}

/// Print a manifest to the console in the requested format.
pub fn print_manifest(manifest: &RunManifest, format: &ManifestFormat) -> Result<()> {
    let content = match format {
        ManifestFormat::Text => render_text(manifest),
        ManifestFormat::Json => render_json(manifest)?,
    };
    println!("{}", content);
    Ok(())
}

/// Write the JSON form of a manifest to a file.
pub fn save_manifest(manifest: &RunManifest, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }
    fs_err::write(path, render_json(manifest)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Limits, RunContext, StageKind};
    use crate::pipeline::Orchestrator;
    use crate::store::ArtifactStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn rejected_manifest() -> RunManifest {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(ArtifactStore::new(dir.path()), HashMap::new());
        let ctx = RunContext::new("not-a-url", dir.path(), HashMap::new(), Limits::default());
        orchestrator.run(&ctx).await
    }

    #[tokio::test]
    async fn test_render_text_rejected() {
        let manifest = rejected_manifest().await;
        let text = render_text(&manifest);
        assert!(text.contains("Rejected:"));
        assert!(!text.contains(StageKind::Download.as_str()));
    }

    #[tokio::test]
    async fn test_render_json_parses_back() {
        let manifest = rejected_manifest().await;
        let json = render_json(&manifest).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"]["status"], "rejected");
        assert_eq!(value["source_url"], "not-a-url");
    }
}
