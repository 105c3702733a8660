use crate::storage::{PersistenceError, RepositoryStore};
use async_trait::async_trait;
use model::{RepositoryDataSnapshot, RepositoryMetrics};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};

/// 以 json 文件保存仓库快照和分析历史, 每个仓库两个文件
pub struct JsonFileStore {
    storage_dir: PathBuf,
    // read-modify-write of a history file must not interleave
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let storage_dir = data_dir.into();
        tokio::fs::create_dir_all(&storage_dir)
            .await
            .map_err(|source| PersistenceError::Io {
                path: storage_dir.clone(),
                source,
            })?;
        Ok(JsonFileStore {
            storage_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn safe_name(repo_name: &str) -> String {
        repo_name.replace(['/', '\\'], "_")
    }

    fn repo_data_file_path(&self, repo_name: &str) -> PathBuf {
        self.storage_dir
            .join(format!("{}.json", Self::safe_name(repo_name)))
    }

    fn repo_analysis_file_path(&self, repo_name: &str) -> PathBuf {
        self.storage_dir
            .join(format!("{}_analysis.json", Self::safe_name(repo_name)))
    }

    async fn read_history<T: DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<Vec<T>>, PersistenceError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let value: Value = serde_json::from_slice(&raw).map_err(|source| PersistenceError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        // 兼容旧格式: 单个对象而不是数组
        let value = match value {
            Value::Array(_) => value,
            other => Value::Array(vec![other]),
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| PersistenceError::Serde {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_history<T: Serialize>(path: &Path, items: &[T]) -> Result<(), PersistenceError> {
        let raw = serde_json::to_vec_pretty(items).map_err(|source| PersistenceError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl RepositoryStore for JsonFileStore {
    async fn save_repository_data(
        &self,
        data: &RepositoryDataSnapshot,
    ) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let path = self.repo_data_file_path(&data.repository_name);

        let mut existing: Vec<RepositoryDataSnapshot> = match Self::read_history(&path).await {
            Ok(history) => history.unwrap_or_default(),
            Err(PersistenceError::Serde { source, .. }) => {
                error!(
                    "Corrupted repository data file {} for {}, starting fresh: {}",
                    path.display(),
                    data.repository_name,
                    source
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        existing.push(data.clone());
        Self::write_history(&path, &existing).await?;

        info!(
            "Repository data saved for {} ({} snapshots) at {}",
            data.repository_name,
            existing.len(),
            path.display()
        );
        Ok(())
    }

    async fn load_repository_data(
        &self,
        repo_name: &str,
    ) -> Result<Option<Vec<RepositoryDataSnapshot>>, PersistenceError> {
        let path = self.repo_data_file_path(repo_name);
        let history: Option<Vec<RepositoryDataSnapshot>> = Self::read_history(&path).await?;
        Ok(history.map(|mut snapshots| {
            snapshots.sort_by(|a, b| b.collection_date.cmp(&a.collection_date));
            snapshots
        }))
    }

    async fn store_analysis(&self, metrics: &RepositoryMetrics) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let path = self.repo_analysis_file_path(&metrics.repository_name);

        let mut existing: Vec<RepositoryMetrics> =
            Self::read_history(&path).await?.unwrap_or_default();
        existing.push(metrics.clone());
        Self::write_history(&path, &existing).await?;

        info!(
            "Stored repository analysis for {} at {} ({} entries)",
            metrics.repository_name,
            path.display(),
            existing.len()
        );
        Ok(())
    }

    async fn load_analysis(
        &self,
        repo_name: &str,
        limit: Option<usize>,
    ) -> Result<Option<Vec<RepositoryMetrics>>, PersistenceError> {
        let path = self.repo_analysis_file_path(repo_name);
        let history: Option<Vec<RepositoryMetrics>> = Self::read_history(&path).await?;
        Ok(history.map(|mut analyses| {
            analyses.sort_by(|a, b| b.analysis_date.cmp(&a.analysis_date));
            if let Some(limit) = limit {
                analyses.truncate(limit);
            }
            analyses
        }))
    }
}
