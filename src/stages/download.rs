use async_trait::async_trait;
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use url::Url;

use super::{StageExecutor, StageInputs, StageOutput};
use crate::config::Config;
use crate::context::RunContext;
use crate::{StageError, utils};

/// Download stage: resolves the source reference to a local media file.
///
/// YouTube-family URLs go through yt-dlp (audio-only extraction); any other
/// http(s) URL is fetched directly. The scheme is checked before any network
/// operation so unsupported references fail fast.
pub struct MediaDownloader {
    yt_dlp_path: String,
    client: reqwest::Client,
    staging: TempDir,
}

impl MediaDownloader {
    pub fn new(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            yt_dlp_path: config.tools.yt_dlp_path.clone(),
            client: reqwest::Client::new(),
            staging: TempDir::new()?,
        })
    }

    /// Check if yt-dlp is available.
    async fn yt_dlp_available(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Extract audio with yt-dlp straight into the staging path.
    async fn download_with_yt_dlp(&self, url: &str, dest: &Path) -> Result<(), StageError> {
        if !self.yt_dlp_available().await {
            return Err(StageError::BackendUnavailable(format!(
                "{} is not available; install it from https://github.com/yt-dlp/yt-dlp",
                self.yt_dlp_path
            )));
        }

        tracing::debug!("Downloading audio with yt-dlp: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--output", &dest.to_string_lossy(),
                "--extract-audio",
                "--audio-format", "mp3",
                "--audio-quality", "9",
                "--format", "worstaudio[ext=m4a]/worstaudio[ext=mp3]/worstaudio",
                "--no-playlist",
                "--newline",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::NetworkError(format!("failed to spawn yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lowered = stderr.to_lowercase();
            if lowered.contains("404") || lowered.contains("not available") || lowered.contains("does not exist") {
                return Err(StageError::NotFound(format!("video not found: {}", url)));
            }
            return Err(StageError::NetworkError(format!(
                "yt-dlp failed: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }

    /// Stream a direct media URL to the staging path.
    async fn download_direct(&self, url: &str, dest: &Path) -> Result<(), StageError> {
        tracing::debug!("Downloading media directly: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::NetworkError(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(StageError::NotFound(format!("media not found: {}", url)));
        }
        if !status.is_success() {
            return Err(StageError::NetworkError(format!(
                "download failed: HTTP {}",
                status
            )));
        }

        let mut file = fs_err::File::create(dest)
            .map_err(|e| StageError::NetworkError(format!("cannot create file: {}", e)))?;

        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| StageError::NetworkError(format!("download aborted: {}", e)))?;
            file.write_all(&chunk)
                .map_err(|e| StageError::NetworkError(format!("write failed: {}", e)))?;
            downloaded += chunk.len() as u64;
        }

        tracing::debug!("Downloaded {}", utils::format_file_size(downloaded));
        Ok(())
    }
}

/// Reject anything that is not a plain http(s) URL before touching the
/// network.
pub(crate) fn ensure_supported_scheme(source_url: &str) -> Result<Url, StageError> {
    let parsed = Url::parse(source_url)
        .map_err(|_| StageError::InvalidInput(format!("not a URL: {}", source_url)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StageError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    Ok(parsed)
}

fn is_video_platform(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.trim_start_matches("www.").to_lowercase();
    matches!(host.as_str(), "youtube.com" | "m.youtube.com" | "youtu.be")
}

#[async_trait]
impl StageExecutor for MediaDownloader {
    async fn execute(
        &self,
        ctx: &RunContext,
        _inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let url = ensure_supported_scheme(&ctx.source_url)?;

        let dest: PathBuf = self
            .staging
            .path()
            .join(format!("{}.mp3", ctx.source_id));

        if is_video_platform(&url) {
            self.download_with_yt_dlp(url.as_str(), &dest).await?;
        } else {
            self.download_direct(url.as_str(), &dest).await?;
        }

        // yt-dlp sometimes appends its own extension; accept either spelling.
        let staged = if dest.exists() {
            dest
        } else {
            let alt = dest.with_extension("mp3.mp3");
            if alt.exists() {
                alt
            } else {
                return Err(StageError::NetworkError(
                    "download produced no output file".to_string(),
                ));
            }
        };

        Ok(StageOutput::staged_file(staged))
    }

    fn name(&self) -> &'static str {
        "local media downloader"
    }
}
