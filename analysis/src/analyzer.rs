use crate::classifier::PrClassifier;
use crate::config::{AnalysisConfig, InvocationMode};
use crate::error::ClassificationError;
use chrono::{DateTime, Duration, Utc};
use model::{IntervalMetrics, PullRequestRecord, RepositoryDataSnapshot, RepositoryMetrics, WorkType};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

// 取活跃度前 20% 的贡献者
const TOP_CONTRIBUTOR_SHARE: f64 = 0.2;

/// 将分类结果与快照合并, 按时间区间聚合
pub struct RepositoryAnalyzer {
    classifier: Arc<dyn PrClassifier>,
    intervals: Vec<u32>,
    allowed_types: Vec<WorkType>,
    mode: InvocationMode,
}

impl RepositoryAnalyzer {
    pub fn new(classifier: Arc<dyn PrClassifier>, config: &AnalysisConfig) -> Self {
        let mut intervals = config.intervals.clone();
        intervals.sort_unstable();
        intervals.dedup();
        Self {
            classifier,
            intervals,
            allowed_types: config.allowed_types.clone(),
            mode: config.mode,
        }
    }

    pub async fn analyze_repository(
        &self,
        snapshot: &RepositoryDataSnapshot,
    ) -> Result<RepositoryMetrics, ClassificationError> {
        self.analyze_at(snapshot, Utc::now()).await
    }

    /// Same as `analyze_repository` with the interval windows ending at `now`.
    pub async fn analyze_at(
        &self,
        snapshot: &RepositoryDataSnapshot,
        now: DateTime<Utc>,
    ) -> Result<RepositoryMetrics, ClassificationError> {
        let prs = &snapshot.pull_requests;
        let open_prs_count = prs.iter().filter(|pr| pr.state.is_open()).count();
        let mut metrics = RepositoryMetrics {
            repository_name: snapshot.repository_name.clone(),
            analysis_date: now,
            total_prs_count: prs.len(),
            open_prs_count,
            closed_prs_count: prs.len() - open_prs_count,
            total_issues_count: snapshot.issues.len(),
            open_issues_count: snapshot.issues.iter().filter(|i| i.state.is_open()).count(),
            pr_interval_metrics: BTreeMap::new(),
            top_contributors: Vec::new(),
            contributors_count: 0,
        };

        if prs.is_empty() {
            info!("No pull requests for {}, skipping classification", snapshot.repository_name);
            return Ok(metrics);
        }

        let types = self.classify(prs).await?;
        for &days in &self.intervals {
            let since = now - Duration::days(i64::from(days));
            let interval = interval_metrics(prs, &types, since);
            debug!(
                "{}: last {} days, {} open / {} closed, {} contributors",
                snapshot.repository_name,
                days,
                interval.open.values().sum::<usize>(),
                interval.closed.values().sum::<usize>(),
                interval.contributors_count
            );
            metrics.pr_interval_metrics.insert(days.to_string(), interval);
        }

        let (top_contributors, contributors_count) = top_contributors(prs);
        metrics.top_contributors = top_contributors;
        metrics.contributors_count = contributors_count;

        info!(
            "Analysis of {} done: {} PRs, {} issues, {} contributors",
            metrics.repository_name,
            metrics.total_prs_count,
            metrics.total_issues_count,
            metrics.contributors_count
        );
        Ok(metrics)
    }

    async fn classify(&self, prs: &[PullRequestRecord]) -> Result<Vec<WorkType>, ClassificationError> {
        let types = match self.mode {
            InvocationMode::BatchJob => self.classifier.classify_as_job(prs, &self.allowed_types).await?,
            InvocationMode::Pooled | InvocationMode::RateLimited => {
                self.classifier.classify_many(prs, &self.allowed_types).await?
            }
        };
        if types.len() != prs.len() {
            return Err(ClassificationError::MissingResult {
                index: types.len().min(prs.len()),
            });
        }
        Ok(types)
    }
}

/// Counts the PRs updated at or after `since`. `types[i]` is the work type of `prs[i]`.
pub fn interval_metrics(prs: &[PullRequestRecord], types: &[WorkType], since: DateTime<Utc>) -> IntervalMetrics {
    let mut metrics = IntervalMetrics::default();
    let mut contributors = BTreeSet::new();

    for (pr, work_type) in prs.iter().zip(types) {
        if pr.updated_at < since {
            continue;
        }
        let counts = if pr.state.is_open() {
            &mut metrics.open
        } else {
            &mut metrics.closed
        };
        *counts.entry(*work_type).or_insert(0) += 1;
        contributors.extend(pr.participants());
    }

    metrics.contributors_count = contributors.len();
    metrics
}

/// Tallies assignee and reviewer appearances over all PRs. Returns the most
/// active 20% (at least one when anyone contributed), ties broken by name, and
/// the number of distinct contributors.
pub fn top_contributors(prs: &[PullRequestRecord]) -> (Vec<String>, usize) {
    let mut activity: HashMap<&str, usize> = HashMap::new();
    for name in prs.iter().flat_map(|pr| pr.participants()) {
        *activity.entry(name).or_insert(0) += 1;
    }
    if activity.is_empty() {
        return (Vec::new(), 0);
    }

    let mut ranked: Vec<(&str, usize)> = activity.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let total = ranked.len();
    let take = ((total as f64 * TOP_CONTRIBUTOR_SHARE).floor() as usize).max(1);
    let top = ranked
        .into_iter()
        .take(take)
        .map(|(name, _)| name.to_owned())
        .collect();
    (top, total)
}
