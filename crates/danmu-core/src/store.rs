//! Where stream configurations come from.
//!
//! The registry only needs a snapshot of every configured stream at startup.
//! Two implementations are provided: a YAML file (the `streams:` list of the
//! application config) and an in-memory list for embedding and tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::StreamConfig;
use crate::error::StoreError;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Every configured stream, enabled or not.
    async fn all_configs(&self) -> Result<Vec<StreamConfig>, StoreError>;
}

/// Reads the `streams:` list from a YAML document on disk.
///
/// Other top-level keys are ignored, so the same file can carry the rest of
/// the application configuration.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

#[derive(Deserialize)]
struct StreamsDocument {
    #[serde(default)]
    streams: Vec<StreamConfig>,
}

impl FileConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a YAML document's `streams:` list.
    pub fn parse(text: &str, origin: &str) -> Result<Vec<StreamConfig>, StoreError> {
        let doc: StreamsDocument = serde_yaml::from_str(text).map_err(|e| StoreError::Parse {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
        Ok(doc.streams)
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn all_configs(&self) -> Result<Vec<StreamConfig>, StoreError> {
        let origin = self.path.display().to_string();
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: origin.clone(),
                source,
            })?;
        let streams = Self::parse(&text, &origin)?;
        tracing::debug!(path = %origin, count = streams.len(), "loaded stream configs");
        Ok(streams)
    }
}

/// In-memory config list.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    configs: Arc<RwLock<Vec<StreamConfig>>>,
}

impl MemoryConfigStore {
    pub fn new(configs: Vec<StreamConfig>) -> Self {
        Self {
            configs: Arc::new(RwLock::new(configs)),
        }
    }

    /// Insert or replace the config with the same id.
    pub fn upsert(&self, config: StreamConfig) {
        let mut configs = self.configs.write();
        match configs.iter_mut().find(|c| c.id == config.id) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn all_configs(&self) -> Result<Vec<StreamConfig>, StoreError> {
        Ok(self.configs.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
log:
  level: debug
streams:
  - id: 1
    url: https://live.douyin.com/111
    name: first
  - id: 2
    url: https://live.douyin.com/222
    enabled: false
    schedule: "@every 5m"
"#;

    #[tokio::test]
    async fn file_store_reads_streams() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();

        let store = FileConfigStore::new(file.path());
        let configs = store.all_configs().await.unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "first");
        assert!(configs[0].enabled);
        assert!(!configs[1].enabled);
        assert_eq!(configs[1].schedule.as_deref(), Some("@every 5m"));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let store = FileConfigStore::new("/definitely/not/here.yaml");
        assert!(matches!(
            store.all_configs().await,
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn document_without_streams_is_empty() {
        assert!(FileConfigStore::parse("log: {}\n", "inline").unwrap().is_empty());
        assert!(matches!(
            FileConfigStore::parse("streams: [oops", "inline"),
            Err(StoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn memory_store_upserts() {
        let store = MemoryConfigStore::default();
        store.upsert(StreamConfig::new(1, "https://live.douyin.com/1"));
        store.upsert(StreamConfig::new(1, "https://live.douyin.com/2"));
        let configs = store.all_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].url, "https://live.douyin.com/2");
    }
}
