use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use model::{RepositoryMetrics, WorkType};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::path::PathBuf;
use tracing::info;

/// 报告输出接口, 仓库报告附带历史趋势
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// `history` is newest first and may include `metrics` itself.
    async fn render_repository(
        &self,
        metrics: &RepositoryMetrics,
        history: &[RepositoryMetrics],
    ) -> anyhow::Result<PathBuf>;

    async fn render_summary(
        &self,
        results: &BTreeMap<String, RepositoryMetrics>,
    ) -> anyhow::Result<PathBuf>;
}

/// Writes one Markdown document per call under `output_dir`.
pub struct MarkdownReport {
    output_dir: PathBuf,
}

impl MarkdownReport {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    async fn write_document(&self, stem: &str, content: String) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create report dir {}", self.output_dir.display()))?;
        let file_name = format!("{}_{}.md", stem, Utc::now().format("%Y%m%d_%H%M%S"));
        let path = self.output_dir.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Report written to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl ReportRenderer for MarkdownReport {
    async fn render_repository(
        &self,
        metrics: &RepositoryMetrics,
        history: &[RepositoryMetrics],
    ) -> anyhow::Result<PathBuf> {
        let mut content = String::new();
        write_repository(&mut content, metrics, history)?;
        let stem = metrics.repository_name.replace('/', "_");
        self.write_document(&stem, content).await
    }

    async fn render_summary(
        &self,
        results: &BTreeMap<String, RepositoryMetrics>,
    ) -> anyhow::Result<PathBuf> {
        let mut content = String::new();
        write_summary(&mut content, results)?;
        self.write_document("summary_report", content).await
    }
}

fn write_repository(
    out: &mut String,
    metrics: &RepositoryMetrics,
    history: &[RepositoryMetrics],
) -> fmt::Result {
    writeln!(out, "# Repository Analysis Report: {}", metrics.repository_name)?;
    writeln!(out)?;
    writeln!(out, "Analysis date: {}", metrics.analysis_date.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out)?;
    writeln!(out, "## Overview")?;
    writeln!(out)?;
    writeln!(out, "| Metric | Value |")?;
    writeln!(out, "|---|---|")?;
    writeln!(out, "| Total PRs | {} |", metrics.total_prs_count)?;
    writeln!(out, "| Open PRs | {} |", metrics.open_prs_count)?;
    writeln!(out, "| Closed PRs | {} |", metrics.closed_prs_count)?;
    writeln!(out, "| Total issues | {} |", metrics.total_issues_count)?;
    writeln!(out, "| Open issues | {} |", metrics.open_issues_count)?;
    writeln!(out, "| Contributors | {} |", metrics.contributors_count)?;
    writeln!(out)?;

    for label in metrics.interval_labels() {
        let interval = &metrics.pr_interval_metrics[label];
        writeln!(out, "## Last {} days", label)?;
        writeln!(out)?;
        writeln!(out, "Active contributors: {}", interval.contributors_count)?;
        writeln!(out)?;
        writeln!(out, "| Type | Open | Closed |")?;
        writeln!(out, "|---|---|---|")?;
        for work_type in WorkType::ALL {
            let (open, closed) = (interval.open_count(work_type), interval.closed_count(work_type));
            if open + closed > 0 {
                writeln!(out, "| {} | {} | {} |", work_type, open, closed)?;
            }
        }
        writeln!(out)?;
    }

    if !metrics.top_contributors.is_empty() {
        writeln!(out, "## Top contributors")?;
        writeln!(out)?;
        for name in &metrics.top_contributors {
            writeln!(out, "- {}", name)?;
        }
        writeln!(out)?;
    }

    if history.len() > 1 {
        write_trends(out, history)?;
    }
    Ok(())
}

/// One table per interval: PRs per work type, oldest analysis first.
fn write_trends(out: &mut String, history: &[RepositoryMetrics]) -> fmt::Result {
    let chronological: Vec<&RepositoryMetrics> = history.iter().rev().collect();
    let mut labels: Vec<&str> = chronological
        .iter()
        .flat_map(|m| m.pr_interval_metrics.keys().map(String::as_str))
        .collect();
    labels.sort_by_key(|label| label.parse::<u64>().unwrap_or(u64::MAX));
    labels.dedup();

    writeln!(out, "## Historical trends")?;
    writeln!(out)?;
    for label in labels {
        writeln!(out, "### Last {} days", label)?;
        writeln!(out)?;
        write!(out, "| Date |")?;
        for work_type in WorkType::ALL {
            write!(out, " {} |", work_type)?;
        }
        writeln!(out)?;
        writeln!(out, "|---|{}", "---|".repeat(WorkType::ALL.len()))?;
        for entry in &chronological {
            write!(out, "| {} |", entry.analysis_date.format("%Y-%m-%d"))?;
            let interval = entry.pr_interval_metrics.get(label);
            for work_type in WorkType::ALL {
                let count = interval
                    .map(|i| i.open_count(work_type) + i.closed_count(work_type))
                    .unwrap_or(0);
                write!(out, " {} |", count)?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_summary(out: &mut String, results: &BTreeMap<String, RepositoryMetrics>) -> fmt::Result {
    writeln!(out, "# Repository Analysis Summary")?;
    writeln!(out)?;
    writeln!(out, "Generated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out)?;
    writeln!(out, "| Repository | PRs | Open PRs | Issues | Open issues | Contributors |")?;
    writeln!(out, "|---|---|---|---|---|---|")?;
    for (name, metrics) in results {
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            name,
            metrics.total_prs_count,
            metrics.open_prs_count,
            metrics.total_issues_count,
            metrics.open_issues_count,
            metrics.contributors_count
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use model::IntervalMetrics;

    fn metrics(day: u32, features: usize) -> RepositoryMetrics {
        let mut week = IntervalMetrics::default();
        week.open.insert(WorkType::Feature, features);
        week.closed.insert(WorkType::Bugfix, 1);
        week.contributors_count = 2;
        RepositoryMetrics {
            repository_name: "owner/repo".into(),
            analysis_date: Utc.with_ymd_and_hms(2024, 5, day, 8, 0, 0).unwrap(),
            total_prs_count: features + 1,
            open_prs_count: features,
            closed_prs_count: 1,
            total_issues_count: 4,
            open_issues_count: 2,
            pr_interval_metrics: BTreeMap::from([("7".to_owned(), week.clone()), ("30".to_owned(), week)]),
            top_contributors: vec!["user1".into()],
            contributors_count: 2,
        }
    }

    #[test]
    fn test_repository_document_sections() {
        let current = metrics(3, 2);
        let mut out = String::new();
        write_repository(&mut out, &current, &[current.clone()]).unwrap();

        assert!(out.starts_with("# Repository Analysis Report: owner/repo"));
        assert!(out.contains("| Total PRs | 3 |"));
        assert!(out.find("## Last 7 days").unwrap() < out.find("## Last 30 days").unwrap());
        assert!(out.contains("| feature | 2 | 0 |"));
        assert!(out.contains("| bugfix | 0 | 1 |"));
        assert!(!out.contains("| hotfix |"));
        assert!(out.contains("- user1"));
        // a single entry has no trend
        assert!(!out.contains("Historical trends"));
    }

    #[test]
    fn test_trend_rows_are_chronological() {
        let history = vec![metrics(3, 5), metrics(2, 3), metrics(1, 1)];
        let mut out = String::new();
        write_repository(&mut out, &history[0], &history).unwrap();

        let trends = &out[out.find("## Historical trends").unwrap()..];
        let first = trends.find("| 2024-05-01 | 1 | 1 |").unwrap();
        let second = trends.find("| 2024-05-02 | 3 | 1 |").unwrap();
        let third = trends.find("| 2024-05-03 | 5 | 1 |").unwrap();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_markdown_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("reports");
        let report = MarkdownReport::new(&output_dir);
        let current = metrics(3, 2);

        let path = report.render_repository(&current, &[current.clone()]).await.unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("owner_repo_"));
        assert!(file_name.ends_with(".md"));
        assert!(path.starts_with(&output_dir));

        let mut results = BTreeMap::new();
        results.insert(current.repository_name.clone(), current);
        let summary = report.render_summary(&results).await.unwrap();
        let content = tokio::fs::read_to_string(&summary).await.unwrap();
        assert!(content.contains("| owner/repo | 3 | 2 | 4 | 2 | 2 |"));
    }
}
