pub mod heuristic;
pub mod llm;
pub mod prompt;
pub mod rate_limit;

use crate::completion::OpenAiClient;
use crate::config::{AnalysisContext, ClassifierKind};
use crate::error::ClassificationError;
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::{Future, StreamExt};
use model::{PullRequestRecord, WorkType};
use std::sync::Arc;
use tracing::info;

pub use heuristic::HeuristicClassifier;
pub use llm::LlmClassifier;

/// PR 分类能力, 由聚合器调用
///
/// `classify_many` and `classify_as_job` return one result per input, aligned
/// index for index with `prs`, whatever order the underlying work finished in.
#[async_trait]
pub trait PrClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify_one(
        &self,
        pr: &PullRequestRecord,
        allowed: &[WorkType],
    ) -> Result<WorkType, ClassificationError>;

    /// Aborts on the first PR that cannot be classified.
    async fn classify_many(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError>;

    /// Submits everything as one asynchronous job. Trades latency for cost.
    async fn classify_as_job(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError>;
}

/// Drives index-tagged futures concurrently and places each result at its
/// index. Returns on the first error, dropping the unfinished work.
pub(crate) async fn collect_in_order<F>(
    len: usize,
    tasks: impl IntoIterator<Item = F>,
) -> Result<Vec<WorkType>, ClassificationError>
where
    F: Future<Output = (usize, Result<WorkType, ClassificationError>)>,
{
    let mut slots: Vec<Option<WorkType>> = vec![None; len];
    let mut pending: FuturesUnordered<F> = tasks.into_iter().collect();
    while let Some((index, result)) = pending.next().await {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result?);
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.ok_or(ClassificationError::MissingResult { index }))
        .collect()
}

/// 根据配置选择分类器实现
pub fn build_classifier(ctx: &AnalysisContext) -> anyhow::Result<Arc<dyn PrClassifier>> {
    let classifier: Arc<dyn PrClassifier> = match ctx.analysis.classifier {
        ClassifierKind::Heuristic => Arc::new(HeuristicClassifier),
        ClassifierKind::Llm => {
            let client = OpenAiClient::new(&ctx.llm.api_url, ctx.llm.api_key.clone())?;
            Arc::new(LlmClassifier::from_context(Arc::new(client), ctx))
        }
    };
    info!(
        "Using {} classifier in {:?} mode",
        classifier.name(),
        ctx.analysis.mode
    );
    Ok(classifier)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use model::ItemState;
    use std::time::Duration;

    pub fn pr(number: i64, title: &str, labels: &[&str]) -> PullRequestRecord {
        let now = Utc::now();
        PullRequestRecord {
            number,
            title: title.to_owned(),
            body: Some(format!("{} description", title)),
            state: ItemState::Open,
            created_at: now,
            updated_at: now,
            merged_at: None,
            closed_at: None,
            head_ref: format!("branch-{}", number),
            author: "author".to_owned(),
            assignees: vec![],
            reviewers: vec![],
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_in_order_ignores_completion_order() {
        let tasks = (0..5usize).map(|index| async move {
            // later inputs finish first
            tokio::time::sleep(Duration::from_millis(100 * (5 - index) as u64)).await;
            (index, Ok(WorkType::ALL[index]))
        });
        let types = collect_in_order(5, tasks).await.unwrap();
        assert_eq!(types, WorkType::ALL[..5].to_vec());
    }

    #[tokio::test]
    async fn test_collect_in_order_reports_missing_slot() {
        let tasks = [async { (0usize, Ok(WorkType::Other)) }];
        let err = collect_in_order(2, tasks).await.unwrap_err();
        assert!(matches!(err, ClassificationError::MissingResult { index: 1 }));
    }

    #[test]
    fn test_build_heuristic_by_default() {
        let ctx = AnalysisContext::default();
        let classifier = build_classifier(&ctx).unwrap();
        assert_eq!(classifier.name(), "heuristic");
    }
}
