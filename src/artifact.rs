//! Artifact sink collaborator.
//!
//! Runner adapters hand captured artifacts (logs, screenshots, traces) to
//! an [`ArtifactSink`] and attach the returned refs to the attempt. The
//! orchestration core never owns artifact storage; attempts only carry the
//! opaque refs.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

use crate::catalog::TestUnit;

/// One artifact captured during an attempt.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// File name the artifact should be stored under.
    pub name: String,

    /// Raw contents.
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Stores attempt artifacts and returns opaque references to them.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Stores the artifacts for one attempt, returning one ref per stored
    /// artifact.
    async fn store(
        &self,
        unit: &TestUnit,
        attempt: u32,
        artifacts: &[Artifact],
    ) -> anyhow::Result<Vec<String>>;
}

/// Discards all artifacts (for tests or when storage is not configured).
pub struct NullArtifactSink;

#[async_trait]
impl ArtifactSink for NullArtifactSink {
    async fn store(
        &self,
        _unit: &TestUnit,
        _attempt: u32,
        _artifacts: &[Artifact],
    ) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Stores artifacts on the local filesystem under
/// `{root}/{qualified_id}/attempt-{n}/{name}`, returning the paths as refs.
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn store(
        &self,
        unit: &TestUnit,
        attempt: u32,
        artifacts: &[Artifact],
    ) -> anyhow::Result<Vec<String>> {
        // Qualified ids can contain path-hostile characters ("::", "[").
        let safe_id: String = unit
            .qualified_id()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();

        let dir = self.root.join(safe_id).join(format!("attempt-{attempt}"));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create artifact dir {}", dir.display()))?;

        let mut refs = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let path = dir.join(&artifact.name);
            tokio::fs::write(&path, &artifact.bytes)
                .await
                .with_context(|| format!("failed to write artifact {}", path.display()))?;
            refs.push(path.to_string_lossy().to_string());
        }

        Ok(refs)
    }
}
