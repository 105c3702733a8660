use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// PR / issue 的状态, merged 的 PR 也算 closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl ItemState {
    pub fn is_open(&self) -> bool {
        matches!(self, ItemState::Open)
    }
}

// 挖掘得到的 Pull Request 原始数据
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PullRequestRecord {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// head branch name
    pub head_ref: String,
    pub author: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl PullRequestRecord {
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    /// assignees followed by reviewers, duplicates kept
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.assignees
            .iter()
            .chain(self.reviewers.iter())
            .map(String::as_str)
    }
}

// 挖掘得到的 Issue 原始数据
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IssueRecord {
    pub number: i64,
    pub title: String,
    pub state: ItemState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub author: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// 一次挖掘的快照, 保存后不再修改
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RepositoryDataSnapshot {
    pub repository_name: String,
    pub collection_date: DateTime<Utc>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestRecord>,
    #[serde(default)]
    pub issues: Vec<IssueRecord>,
}

impl RepositoryDataSnapshot {
    pub fn new(
        repository_name: impl Into<String>,
        pull_requests: Vec<PullRequestRecord>,
        issues: Vec<IssueRecord>,
    ) -> Self {
        Self {
            repository_name: repository_name.into(),
            collection_date: Utc::now(),
            pull_requests,
            issues,
        }
    }
}
