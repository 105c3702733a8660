pub mod github;
pub mod metrics;

pub use github::{IssueRecord, ItemState, PullRequestRecord, RepositoryDataSnapshot};
pub use metrics::{IntervalMetrics, RepositoryMetrics, WorkType};
