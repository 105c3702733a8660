use crate::classifier::PrClassifier;
use crate::error::ClassificationError;
use async_trait::async_trait;
use model::{PullRequestRecord, WorkType};

const LABEL_RULES: [(WorkType, &[&str]); 5] = [
    (WorkType::Feature, &["feature", "enhancement"]),
    (WorkType::Bugfix, &["bug", "bugfix"]),
    (WorkType::Hotfix, &["hotfix", "critical", "urgent"]),
    (WorkType::Test, &["test", "testing"]),
    (WorkType::Issue, &["issue"]),
];

// checked in this order, the first level that matches wins
const TEXT_RULES: [(WorkType, &[&str]); 5] = [
    (WorkType::Feature, &["feature", "feat", "enhancement"]),
    (WorkType::Bugfix, &["fix", "bug", "issue #"]),
    (WorkType::Hotfix, &["hotfix", "critical", "urgent"]),
    (WorkType::Test, &["test", "testing"]),
    (WorkType::Refactor, &["refactor", "refactoring", "refact"]),
];

fn first_match<'a>(
    text: &str,
    rules: &'a [(WorkType, &'a [&'a str])],
) -> Option<WorkType> {
    rules
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(work_type, _)| *work_type)
}

/// 基于标签和标题/正文关键字的分类
///
/// Labels are scanned first and every matching label overwrites the tentative
/// result, so the last matching label wins. The title and body are scanned
/// afterwards in a fixed priority order and any text match overrides the
/// label result.
pub fn heuristic_classify(title: &str, body: Option<&str>, labels: &[String]) -> WorkType {
    let title_lower = title.to_lowercase();
    let combined_text = format!(
        "{} {}",
        title_lower,
        body.map(str::to_lowercase).unwrap_or_default()
    );

    let mut result = None;
    for label in labels.iter().map(|l| l.to_lowercase()) {
        if let Some(work_type) = first_match(&label, &LABEL_RULES) {
            result = Some(work_type);
        }
    }

    let text_result = first_match(&combined_text, &TEXT_RULES).or_else(|| {
        (combined_text.contains("issue") || title_lower.contains('#')).then_some(WorkType::Issue)
    });
    if text_result.is_some() {
        result = text_result;
    }

    result.unwrap_or(WorkType::Other)
}

/// Rule-based classifier. Never fails; results outside the allowed set
/// collapse to `other`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn classify(&self, pr: &PullRequestRecord, allowed: &[WorkType]) -> WorkType {
        let work_type = heuristic_classify(&pr.title, pr.body.as_deref(), &pr.labels);
        if allowed.is_empty() || allowed.contains(&work_type) {
            work_type
        } else {
            WorkType::Other
        }
    }
}

#[async_trait]
impl PrClassifier for HeuristicClassifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn classify_one(
        &self,
        pr: &PullRequestRecord,
        allowed: &[WorkType],
    ) -> Result<WorkType, ClassificationError> {
        Ok(self.classify(pr, allowed))
    }

    async fn classify_many(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        Ok(prs.iter().map(|pr| self.classify(pr, allowed)).collect())
    }

    /// No external system is involved, the job is the same pass as `classify_many`.
    async fn classify_as_job(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        self.classify_many(prs, allowed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::pr;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_matching_label_wins() {
        assert_eq!(
            heuristic_classify("update deps", None, &labels(&["test", "feature"])),
            WorkType::Feature
        );
        assert_eq!(
            heuristic_classify("update deps", None, &labels(&["feature", "test"])),
            WorkType::Test
        );
        assert_eq!(
            heuristic_classify("update deps", None, &labels(&["Feature", "docs"])),
            WorkType::Feature
        );
    }

    #[test]
    fn test_text_overrides_labels() {
        assert_eq!(
            heuristic_classify("Refactor parser", None, &labels(&["bug"])),
            WorkType::Refactor
        );
        assert_eq!(
            heuristic_classify("bump version", Some("urgent release"), &labels(&["feature"])),
            WorkType::Hotfix
        );
    }

    #[test]
    fn test_text_priority_order() {
        assert_eq!(heuristic_classify("feat: x", Some("fix"), &[]), WorkType::Feature);
        // "hotfix" contains "fix", bugfix is checked first
        assert_eq!(heuristic_classify("hotfix login", None, &[]), WorkType::Bugfix);
        assert_eq!(heuristic_classify("critical: login", None, &[]), WorkType::Hotfix);
        assert_eq!(heuristic_classify("add testing for refactor", None, &[]), WorkType::Test);
        assert_eq!(heuristic_classify("see issue #12", None, &[]), WorkType::Bugfix);
        assert_eq!(heuristic_classify("closes issue", None, &[]), WorkType::Issue);
        assert_eq!(heuristic_classify("Closes #12", None, &[]), WorkType::Issue);
    }

    #[test]
    fn test_hash_in_body_only_does_not_mean_issue() {
        assert_eq!(heuristic_classify("docs", Some("see #12"), &[]), WorkType::Other);
    }

    #[test]
    fn test_label_only_issue_and_fallback() {
        assert_eq!(heuristic_classify("docs", None, &labels(&["Issue"])), WorkType::Issue);
        assert_eq!(heuristic_classify("docs", None, &labels(&["chore"])), WorkType::Other);
        assert_eq!(heuristic_classify("", None, &[]), WorkType::Other);
    }

    #[test]
    fn test_is_deterministic() {
        let l = labels(&["testing", "enhancement", "critical"]);
        let first = heuristic_classify("Update CI", Some("body"), &l);
        for _ in 0..10 {
            assert_eq!(heuristic_classify("Update CI", Some("body"), &l), first);
        }
        assert_eq!(first, WorkType::Hotfix);
    }

    #[tokio::test]
    async fn test_disallowed_result_collapses_to_other() {
        let record = pr(1, "feat: new feature", &["feature"]);
        let classifier = HeuristicClassifier;
        assert_eq!(
            classifier.classify_one(&record, &[WorkType::Bugfix, WorkType::Other]).await.unwrap(),
            WorkType::Other
        );
        assert_eq!(classifier.classify_one(&record, &[]).await.unwrap(), WorkType::Feature);
    }

    #[tokio::test]
    async fn test_classify_many_preserves_order() {
        let prs = vec![
            pr(1, "feat: new feature", &["feature"]),
            pr(2, "fix: bug fix", &["bugfix"]),
            pr(3, "test: new tests", &["test"]),
        ];
        let types = HeuristicClassifier
            .classify_as_job(&prs, &WorkType::ALL)
            .await
            .unwrap();
        assert_eq!(types, vec![WorkType::Feature, WorkType::Bugfix, WorkType::Test]);
    }
}
