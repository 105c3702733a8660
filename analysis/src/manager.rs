use crate::analyzer::RepositoryAnalyzer;
use crate::report::ReportRenderer;
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use database::storage::RepositoryStore;
use futures::stream::{self, StreamExt};
use github_handler::{repo_name_from_url, RepositoryMiner};
use model::{RepositoryDataSnapshot, RepositoryMetrics};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

fn is_today(date: DateTime<Utc>) -> bool {
    date.date_naive() == Utc::now().date_naive()
}

pub struct AnalysisManager {
    store: Arc<dyn RepositoryStore>,
    miner: Arc<dyn RepositoryMiner>,
    analyzer: RepositoryAnalyzer,
    renderer: Arc<dyn ReportRenderer>,
    concurrency: usize,
}

impl AnalysisManager {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        miner: Arc<dyn RepositoryMiner>,
        analyzer: RepositoryAnalyzer,
        renderer: Arc<dyn ReportRenderer>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            miner,
            analyzer,
            renderer,
            concurrency: concurrency.max(1),
        }
    }

    /// 分析所有仓库, 单个仓库失败只记录日志, 不影响其他仓库
    pub async fn run(
        &self,
        repository_urls: &[String],
    ) -> anyhow::Result<BTreeMap<String, RepositoryMetrics>> {
        let outcomes: Vec<(&String, anyhow::Result<RepositoryMetrics>)> = stream::iter(repository_urls)
            .map(|url| async move { (url, self.process_repository(url).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut results = BTreeMap::new();
        for (url, outcome) in outcomes {
            match outcome {
                Ok(metrics) => {
                    results.insert(metrics.repository_name.clone(), metrics);
                }
                Err(e) => error!("Failed to analyze repository {}: {:#}", url, e),
            }
        }
        info!(
            "Analyzed {} of {} repositories",
            results.len(),
            repository_urls.len()
        );

        if !results.is_empty() {
            self.renderer
                .render_summary(&results)
                .await
                .context("Failed to generate summary report")?;
        }
        Ok(results)
    }

    pub async fn process_repository(&self, repo_url: &str) -> anyhow::Result<RepositoryMetrics> {
        let repo_name = repo_name_from_url(repo_url)?;
        info!("Analyzing repository {}", repo_name);

        let metrics = match self.today_analysis(&repo_name).await? {
            Some(existing) => {
                info!("Reusing today's analysis for {}", repo_name);
                existing
            }
            None => {
                let snapshot = self.repository_data(&repo_name).await?;
                let metrics = self
                    .analyzer
                    .analyze_repository(&snapshot)
                    .await
                    .with_context(|| format!("Failed to classify pull requests of {}", repo_name))?;
                self.store
                    .store_analysis(&metrics)
                    .await
                    .with_context(|| format!("Failed to store analysis of {}", repo_name))?;
                metrics
            }
        };

        let history = self
            .store
            .load_analysis(&repo_name, None)
            .await?
            .unwrap_or_else(|| vec![metrics.clone()]);
        self.renderer
            .render_repository(&metrics, &history)
            .await
            .with_context(|| format!("Failed to render report for {}", repo_name))?;
        Ok(metrics)
    }

    async fn today_analysis(&self, repo_name: &str) -> anyhow::Result<Option<RepositoryMetrics>> {
        let latest = self
            .store
            .load_analysis(repo_name, Some(1))
            .await?
            .and_then(|history| history.into_iter().next());
        Ok(latest.filter(|metrics| is_today(metrics.analysis_date)))
    }

    /// Today's snapshot from the store, otherwise a freshly mined and saved one.
    async fn repository_data(&self, repo_name: &str) -> anyhow::Result<RepositoryDataSnapshot> {
        let stored = self
            .store
            .load_repository_data(repo_name)
            .await?
            .and_then(|snapshots| snapshots.into_iter().next())
            .filter(|snapshot| is_today(snapshot.collection_date));
        if let Some(snapshot) = stored {
            info!("Using today's stored data for {}", repo_name);
            return Ok(snapshot);
        }

        let snapshot = self
            .miner
            .mine_repository(repo_name)
            .await
            .with_context(|| format!("Failed to mine {}", repo_name))?;
        self.store.save_repository_data(&snapshot).await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::pr;
    use crate::classifier::HeuristicClassifier;
    use crate::config::AnalysisConfig;
    use async_trait::async_trait;
    use database::storage::JsonFileStore;
    use github_handler::MiningError;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockMiner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RepositoryMiner for MockMiner {
        async fn mine_repository(&self, repo_name: &str) -> Result<RepositoryDataSnapshot, MiningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if repo_name.ends_with("broken") {
                return Err(MiningError::Http {
                    status: 404,
                    body: "Not Found".into(),
                });
            }
            let mut fix = pr(2, "fix: crash", &["bug"]);
            fix.reviewers = vec!["reviewer".into()];
            Ok(RepositoryDataSnapshot::new(
                repo_name,
                vec![pr(1, "feat: search", &[]), fix],
                vec![],
            ))
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        repositories: Mutex<Vec<(String, usize)>>,
        summaries: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ReportRenderer for RecordingRenderer {
        async fn render_repository(
            &self,
            metrics: &RepositoryMetrics,
            history: &[RepositoryMetrics],
        ) -> anyhow::Result<PathBuf> {
            self.repositories
                .lock()
                .unwrap()
                .push((metrics.repository_name.clone(), history.len()));
            Ok(PathBuf::from("repo.md"))
        }

        async fn render_summary(
            &self,
            results: &BTreeMap<String, RepositoryMetrics>,
        ) -> anyhow::Result<PathBuf> {
            self.summaries.lock().unwrap().push(results.len());
            Ok(PathBuf::from("summary.md"))
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<JsonFileStore>,
        miner: Arc<MockMiner>,
        renderer: Arc<RecordingRenderer>,
        manager: AnalysisManager,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()).await.unwrap());
        let miner = Arc::new(MockMiner::default());
        let renderer = Arc::new(RecordingRenderer::default());
        let analyzer = RepositoryAnalyzer::new(Arc::new(HeuristicClassifier), &AnalysisConfig::default());
        let manager = AnalysisManager::new(store.clone(), miner.clone(), analyzer, renderer.clone(), 2);
        Fixture {
            _dir: dir,
            store,
            miner,
            renderer,
            manager,
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_repository() {
        let f = fixture().await;
        let results = f
            .manager
            .run(&urls(&[
                "https://github.com/owner/alpha",
                "https://github.com/owner/broken",
                "not a url",
                "https://github.com/owner/beta.git",
            ]))
            .await
            .unwrap();

        assert_eq!(
            results.keys().cloned().collect::<Vec<_>>(),
            vec!["owner/alpha".to_owned(), "owner/beta".to_owned()]
        );
        assert_eq!(results["owner/alpha"].total_prs_count, 2);
        assert_eq!(results["owner/alpha"].top_contributors, vec!["reviewer".to_owned()]);
        assert_eq!(*f.renderer.summaries.lock().unwrap(), vec![2]);
        assert_eq!(f.renderer.repositories.lock().unwrap().len(), 2);
        assert!(f.store.load_analysis("owner/broken", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_day_analysis_is_reused() {
        let f = fixture().await;
        let repos = urls(&["https://github.com/owner/alpha"]);
        let first = f.manager.run(&repos).await.unwrap();
        let second = f.manager.run(&repos).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.miner.calls.load(Ordering::SeqCst), 1);
        let history = f.store.load_analysis("owner/alpha", None).await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(f.renderer.repositories.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stored_snapshot_skips_mining() {
        let f = fixture().await;
        let snapshot = RepositoryDataSnapshot::new("owner/gamma", vec![pr(7, "refactor: io", &[])], vec![]);
        f.store.save_repository_data(&snapshot).await.unwrap();

        let metrics = f
            .manager
            .process_repository("https://github.com/owner/gamma")
            .await
            .unwrap();
        assert_eq!(metrics.total_prs_count, 1);
        assert_eq!(f.miner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *f.renderer.repositories.lock().unwrap(),
            vec![("owner/gamma".to_owned(), 1)]
        );
    }

    #[tokio::test]
    async fn test_no_summary_without_results() {
        let f = fixture().await;
        let results = f
            .manager
            .run(&urls(&["https://github.com/owner/broken"]))
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(f.renderer.summaries.lock().unwrap().is_empty());
    }
}
