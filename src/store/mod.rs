use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::context::StageKind;
use crate::Result;

/// The persisted output of one successful stage execution. Immutable once
/// written; `produced_at` is set only for artifacts written in the current
/// run, never for cache hits.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub stage: StageKind,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_at: Option<DateTime<Utc>>,
    pub content_hash: String,
}

impl Artifact {
    /// Build an artifact record for an existing file, hashing its content.
    pub fn for_file(stage: StageKind, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content_hash = hash_file(&path)?;
        Ok(Self {
            stage,
            path,
            produced_at: None,
            content_hash,
        })
    }
}

/// Maps each stage's logical output to a deterministic path under a
/// run-scoped output root, and owns the cache-hit and atomic-write policies.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic artifact path: `<root>/<stage_name>/<source_id>.<ext>`.
    pub fn artifact_path(&self, stage: StageKind, source_id: &str) -> PathBuf {
        self.root
            .join(stage.as_str())
            .join(format!("{}.{}", source_id, stage.extension()))
    }

    /// Path of a sibling file persisted next to a stage's primary artifact.
    pub fn sibling_path(&self, stage: StageKind, file_name: &str) -> PathBuf {
        self.root.join(stage.as_str()).join(file_name)
    }

    /// Return the cached artifact for `(stage, source_id)` if a file exists
    /// at the deterministic path and passes the stage's minimal
    /// well-formedness check. Corrupt or empty files are treated as absent so
    /// they are re-produced rather than silently reused.
    pub fn lookup(&self, stage: StageKind, source_id: &str) -> Option<Artifact> {
        let path = self.artifact_path(stage, source_id);
        if !is_wellformed(stage, &path) {
            return None;
        }

        let content_hash = hash_file(&path).ok()?;
        Some(Artifact {
            stage,
            path,
            produced_at: None,
            content_hash,
        })
    }

    /// Persist in-memory content as the artifact for `(stage, source_id)`.
    ///
    /// The write is atomic: content goes to a uniquely named temporary file
    /// in the destination directory, then is renamed into place. A crash
    /// mid-write leaves only the temp file, which `lookup` never sees;
    /// concurrent persists for the same key race on the rename, not on the
    /// content.
    pub fn persist(&self, stage: StageKind, source_id: &str, content: &[u8]) -> Result<Artifact> {
        let dest = self.artifact_path(stage, source_id);
        self.write_atomic(&dest, content)?;

        Ok(Artifact {
            stage,
            path: dest,
            produced_at: Some(Utc::now()),
            content_hash: hash_bytes(content),
        })
    }

    /// Persist an already-staged file (large downloads) by copying it into a
    /// temporary path in the destination directory and renaming. The staged
    /// original is removed on success.
    pub fn persist_file(
        &self,
        stage: StageKind,
        source_id: &str,
        staged: &Path,
    ) -> Result<Artifact> {
        let dest = self.artifact_path(stage, source_id);
        let tmp = self.temp_path_for(&dest)?;

        // Copy rather than rename from the staging location: it may live on
        // a different filesystem (e.g. /tmp).
        fs_err::copy(staged, &tmp)?;
        fs_err::rename(&tmp, &dest)?;
        let _ = fs_err::remove_file(staged);

        let content_hash = hash_file(&dest)?;
        Ok(Artifact {
            stage,
            path: dest,
            produced_at: Some(Utc::now()),
            content_hash,
        })
    }

    /// Persist a sibling file (e.g. the transcript's segment listing) next to
    /// a stage's primary artifact, with the same atomic-write discipline.
    pub fn persist_sibling(
        &self,
        stage: StageKind,
        file_name: &str,
        content: &[u8],
    ) -> Result<PathBuf> {
        let dest = self.sibling_path(stage, file_name);
        self.write_atomic(&dest, content)?;
        Ok(dest)
    }

    fn write_atomic(&self, dest: &Path, content: &[u8]) -> Result<()> {
        let tmp = self.temp_path_for(dest)?;
        {
            let mut file = fs_err::File::create(&tmp)?;
            file.write_all(content)?;
            file.flush()?;
        }
        fs_err::rename(&tmp, dest)?;
        Ok(())
    }

    /// Unique temp path in the same directory as `dest`, so the final rename
    /// stays on one filesystem. Uniqueness keeps concurrent writers for the
    /// same key from clobbering each other's partial writes.
    fn temp_path_for(&self, dest: &Path) -> Result<PathBuf> {
        let dir = dest
            .parent()
            .ok_or_else(|| anyhow::anyhow!("artifact path has no parent: {}", dest.display()))?;
        fs_err::create_dir_all(dir)?;

        let name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let suffix = &uuid::Uuid::new_v4().to_string()[..8];
        Ok(dir.join(format!(".{}.{}.tmp", name, suffix)))
    }
}

/// Minimal stage-specific well-formedness check for an on-disk artifact.
fn is_wellformed(stage: StageKind, path: &Path) -> bool {
    let Ok(metadata) = fs_err::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() == 0 {
        return false;
    }

    if stage.is_text() {
        return fs_err::read_to_string(path)
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false);
    }

    // Media artifacts must at least look like a known audio container;
    // truncated downloads rarely keep a valid header at byte zero.
    fs_err::read(path)
        .map(|bytes| looks_like_audio(&bytes))
        .unwrap_or(false)
}

/// Recognize common audio container magics.
fn looks_like_audio(bytes: &[u8]) -> bool {
    if bytes.len() < 8 {
        return false;
    }
    bytes.starts_with(b"RIFF")
        || bytes.starts_with(b"ID3")
        || bytes.starts_with(b"OggS")
        || bytes.starts_with(b"fLaC")
        || bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) // EBML (webm/mka)
        || &bytes[4..8] == b"ftyp"
        || (bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0) // raw MPEG audio frame
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs_err::read(path)?;
    Ok(hash_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    /// Smallest valid-looking WAV payload for media validation tests.
    fn wav_bytes() -> Vec<u8> {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&[0u8; 24]);
        bytes
    }

    #[test]
    fn test_persist_then_lookup_roundtrip() {
        let (_dir, store) = store();
        let artifact = store
            .persist(StageKind::Summarize, "abc123", b"a short summary")
            .unwrap();
        assert!(artifact.produced_at.is_some());

        let cached = store.lookup(StageKind::Summarize, "abc123").unwrap();
        assert_eq!(cached.path, artifact.path);
        assert_eq!(cached.content_hash, artifact.content_hash);
        // Cache hits do not claim a production time.
        assert!(cached.produced_at.is_none());
    }

    #[test]
    fn test_lookup_misses_when_absent() {
        let (_dir, store) = store();
        assert!(store.lookup(StageKind::Transcribe, "missing").is_none());
    }

    #[test]
    fn test_empty_artifact_treated_as_absent() {
        let (_dir, store) = store();
        let path = store.artifact_path(StageKind::Transcribe, "abc123");
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        fs_err::write(&path, b"").unwrap();
        assert!(store.lookup(StageKind::Transcribe, "abc123").is_none());

        fs_err::write(&path, b"   \n").unwrap();
        assert!(store.lookup(StageKind::Transcribe, "abc123").is_none());
    }

    #[test]
    fn test_truncated_media_treated_as_absent() {
        let (_dir, store) = store();
        let path = store.artifact_path(StageKind::Download, "abc123");
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        // A download interrupted mid-header.
        fs_err::write(&path, b"RI").unwrap();
        assert!(store.lookup(StageKind::Download, "abc123").is_none());

        fs_err::write(&path, b"this is not audio at all").unwrap();
        assert!(store.lookup(StageKind::Download, "abc123").is_none());
    }

    #[test]
    fn test_valid_media_is_accepted() {
        let (_dir, store) = store();
        let artifact = store
            .persist(StageKind::PodcastGen, "abc123", &wav_bytes())
            .unwrap();
        let cached = store.lookup(StageKind::PodcastGen, "abc123").unwrap();
        assert_eq!(cached.content_hash, artifact.content_hash);
    }

    #[test]
    fn test_interrupted_write_is_invisible_to_lookup() {
        let (_dir, store) = store();
        // Simulate a crash mid-persist: only the temp file exists.
        let dest = store.artifact_path(StageKind::Summarize, "abc123");
        let tmp = store.temp_path_for(&dest).unwrap();
        fs_err::write(&tmp, b"half-written summar").unwrap();

        assert!(store.lookup(StageKind::Summarize, "abc123").is_none());
    }

    #[test]
    fn test_concurrent_same_key_persists_never_tear() {
        let (_dir, store) = store();
        let payloads: Vec<Vec<u8>> = (0..16)
            .map(|i| format!("summary variant {} {}", i, "x".repeat(256)).into_bytes())
            .collect();

        let handles: Vec<_> = payloads
            .iter()
            .cloned()
            .map(|content| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.persist(StageKind::Summarize, "abc123", &content).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Whichever rename won, the artifact is one complete payload.
        let cached = store.lookup(StageKind::Summarize, "abc123").unwrap();
        let on_disk = fs_err::read(&cached.path).unwrap();
        assert!(payloads.iter().any(|p| *p == on_disk));
        assert_eq!(cached.content_hash, hash_bytes(&on_disk));
        // No temp files left behind once every writer has finished.
        let leftovers: Vec<_> = fs_err::read_dir(cached.path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_persist_file_moves_staged_download() {
        let (_dir, store) = store();
        let staging = TempDir::new().unwrap();
        let staged = staging.path().join("media.mp3");
        fs_err::write(&staged, wav_bytes()).unwrap();

        let artifact = store
            .persist_file(StageKind::Download, "abc123", &staged)
            .unwrap();
        assert!(artifact.path.exists());
        assert!(!staged.exists());
        assert!(store.lookup(StageKind::Download, "abc123").is_some());
    }

    #[test]
    fn test_sibling_persist() {
        let (_dir, store) = store();
        let path = store
            .persist_sibling(StageKind::Transcribe, "abc123_segments.txt", b"[0.00 - 1.00]: hi\n")
            .unwrap();
        assert!(path.exists());
        assert_eq!(path.parent(), store.artifact_path(StageKind::Transcribe, "abc123").parent());
    }

    #[test]
    fn test_looks_like_audio() {
        assert!(looks_like_audio(b"ID3\x04\x00\x00\x00\x00"));
        assert!(looks_like_audio(b"OggS\x00\x02\x00\x00"));
        assert!(looks_like_audio(&[0xFF, 0xFB, 0x90, 0x00, 0, 0, 0, 0]));
        assert!(looks_like_audio(b"\x00\x00\x00\x20ftypisom"));
        assert!(!looks_like_audio(b"plain text content"));
        assert!(!looks_like_audio(b"RIFF")); // too short
    }
}
