pub mod repository_store;

use async_trait::async_trait;
use model::{RepositoryDataSnapshot, RepositoryMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use repository_store::JsonFileStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error on {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 快照与分析历史的存储接口, 历史按时间倒序返回
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn save_repository_data(
        &self,
        data: &RepositoryDataSnapshot,
    ) -> Result<(), PersistenceError>;

    async fn load_repository_data(
        &self,
        repo_name: &str,
    ) -> Result<Option<Vec<RepositoryDataSnapshot>>, PersistenceError>;

    /// Appends to the history; earlier entries are never overwritten.
    async fn store_analysis(&self, metrics: &RepositoryMetrics) -> Result<(), PersistenceError>;

    async fn load_analysis(
        &self,
        repo_name: &str,
        limit: Option<usize>,
    ) -> Result<Option<Vec<RepositoryMetrics>>, PersistenceError>;
}

#[derive(Clone)]
pub struct Context {
    repository_stg: Arc<JsonFileStore>,
}

impl Context {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let store = JsonFileStore::new(data_dir).await?;
        Ok(Context {
            repository_stg: Arc::new(store),
        })
    }

    pub fn repository_store_stg(&self) -> Arc<JsonFileStore> {
        self.repository_stg.clone()
    }
}
