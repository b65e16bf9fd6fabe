//! Cross-build history persistence.
//!
//! Smart ordering needs outcome history from previous builds, which lives
//! behind the [`HistoryStore`] key-value interface so the orchestrator is
//! decoupled from the storage technology. The crate ships an in-memory
//! store for tests and a JSON file store for real runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::catalog::UnitHistory;

/// Key-value store for per-unit outcome history.
///
/// `put` may buffer; `flush` makes everything written so far durable.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// History for one unit id, if any.
    async fn get(&self, id: &str) -> Result<Option<UnitHistory>>;

    /// Stores history for one unit id.
    async fn put(&self, id: &str, history: UnitHistory) -> Result<()>;

    /// Persists buffered writes. Default is a no-op.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for std::sync::Arc<T> {
    async fn get(&self, id: &str) -> Result<Option<UnitHistory>> {
        (**self).get(id).await
    }

    async fn put(&self, id: &str, history: UnitHistory) -> Result<()> {
        (**self).put(id, history).await
    }

    async fn flush(&self) -> Result<()> {
        (**self).flush().await
    }
}

/// Volatile in-memory store.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<String, UnitHistory>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with entries, for tests.
    pub fn with_entries(entries: HashMap<String, UnitHistory>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn get(&self, id: &str) -> Result<Option<UnitHistory>> {
        Ok(self.entries.lock().unwrap().get(id).cloned())
    }

    async fn put(&self, id: &str, history: UnitHistory) -> Result<()> {
        self.entries.lock().unwrap().insert(id.to_string(), history);
        Ok(())
    }
}

/// JSON file store: the whole history map in one file, loaded at open and
/// rewritten on flush.
pub struct JsonHistoryStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, UnitHistory>>,
}

impl JsonHistoryStore {
    /// Opens the store at `path`, loading existing entries if present.
    ///
    /// A missing file yields an empty store. A corrupt file is logged and
    /// treated as empty rather than failing the build: losing ordering
    /// hints is cheaper than refusing to run tests.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("ignoring corrupt history file {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Where the store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn get(&self, id: &str) -> Result<Option<UnitHistory>> {
        Ok(self.entries.lock().unwrap().get(id).cloned())
    }

    async fn put(&self, id: &str, history: UnitHistory) -> Result<()> {
        self.entries.lock().unwrap().insert(id.to_string(), history);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let json = {
            let entries = self.entries.lock().unwrap();
            serde_json::to_string_pretty(&*entries).context("failed to serialize history")?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("failed to write history file {}", self.path.display()))?;

        Ok(())
    }
}
