//! Discovery collaborator interface.
//!
//! Discovery runs exactly once at build start and produces the flat list
//! of test unit ids. A discovery failure is fatal: the build aborts before
//! any test runs.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::DiscoveryConfig;

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur during test discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The discovery collaborator failed to produce a test list.
    #[error("failed to discover tests: {0}")]
    Failed(String),

    /// I/O error reading an id list.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other discovery-related errors.
    #[error("discovery error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Produces the set of test unit ids for a build.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> DiscoveryResult<Vec<String>>;
}

/// Discovery from a fixed id list, optionally merged with a newline
/// separated id file. This is what the CLI uses; richer discoverers
/// (framework collectors) plug in through the [`Discovery`] trait.
pub struct StaticDiscovery {
    ids: Vec<String>,
    file: Option<PathBuf>,
}

impl StaticDiscovery {
    /// Discovery over a fixed list.
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids, file: None }
    }

    /// Builds discovery from the `[discovery]` config section.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            ids: config.ids.clone(),
            file: config.file.clone(),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> DiscoveryResult<Vec<String>> {
        let mut ids = self.ids.clone();

        if let Some(path) = &self.file {
            let contents = tokio::fs::read_to_string(path).await?;
            ids.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(String::from),
            );
        }

        if ids.is_empty() {
            return Err(DiscoveryError::Failed(
                "no test ids configured; set [discovery] ids or file".to_string(),
            ));
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_static_ids() {
        let discovery = StaticDiscovery::new(vec!["a".into(), "b".into()]);
        assert_eq!(discovery.discover().await.unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_discovery_fails() {
        let discovery = StaticDiscovery::new(Vec::new());
        assert!(matches!(
            discovery.discover().await,
            Err(DiscoveryError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_id_file_merged_and_filtered() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "c\n\n# comment\n  d  ").unwrap();

        let discovery = StaticDiscovery {
            ids: vec!["a".into()],
            file: Some(file.path().to_path_buf()),
        };
        assert_eq!(discovery.discover().await.unwrap(), ["a", "c", "d"]);
    }
}
