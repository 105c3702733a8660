use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// PR 工作类型, 每个 PR 分类后恰好属于一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkType {
    Feature,
    Bugfix,
    Hotfix,
    Refactor,
    Test,
    Issue,
    Other,
}

impl WorkType {
    pub const ALL: [WorkType; 7] = [
        WorkType::Feature,
        WorkType::Bugfix,
        WorkType::Hotfix,
        WorkType::Refactor,
        WorkType::Test,
        WorkType::Issue,
        WorkType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkType::Feature => "feature",
            WorkType::Bugfix => "bugfix",
            WorkType::Hotfix => "hotfix",
            WorkType::Refactor => "refactor",
            WorkType::Test => "test",
            WorkType::Issue => "issue",
            WorkType::Other => "other",
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown work type `{0}`")]
pub struct UnknownWorkType(pub String);

impl FromStr for WorkType {
    type Err = UnknownWorkType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_matches('"').to_lowercase();
        WorkType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownWorkType(s.to_owned()))
    }
}

/// 单个时间窗口内的 PR 统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalMetrics {
    pub open: BTreeMap<WorkType, usize>,
    pub closed: BTreeMap<WorkType, usize>,
    pub contributors_count: usize,
}

impl IntervalMetrics {
    pub fn open_count(&self, work_type: WorkType) -> usize {
        self.open.get(&work_type).copied().unwrap_or(0)
    }

    pub fn closed_count(&self, work_type: WorkType) -> usize {
        self.closed.get(&work_type).copied().unwrap_or(0)
    }
}

/// 一次分析的结果, 以追加方式写入仓库历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetrics {
    pub repository_name: String,
    pub analysis_date: DateTime<Utc>,
    pub total_prs_count: usize,
    pub open_prs_count: usize,
    pub closed_prs_count: usize,
    pub total_issues_count: usize,
    pub open_issues_count: usize,
    /// keyed by interval length in days, e.g. "7"
    pub pr_interval_metrics: BTreeMap<String, IntervalMetrics>,
    pub top_contributors: Vec<String>,
    pub contributors_count: usize,
}

impl RepositoryMetrics {
    /// Interval labels ordered by window length rather than lexically.
    pub fn interval_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.pr_interval_metrics.keys().map(String::as_str).collect();
        labels.sort_by_key(|label| label.parse::<u64>().unwrap_or(u64::MAX));
        labels
    }
}
