//! Mines pull request and issue metadata from the GitHub REST API.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use model::{IssueRecord, ItemState, PullRequestRecord, RepositoryDataSnapshot};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

const PER_PAGE: u32 = 100;

#[derive(Debug, Error)]
pub enum MiningError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("github api rate limit exhausted, resets at {reset}")]
    RateLimited { reset: String },
    #[error("invalid repository `{0}`")]
    InvalidRepository(String),
}

/// 仓库数据来源, 可以是 GitHub / GitLab 等
#[async_trait]
pub trait RepositoryMiner: Send + Sync {
    async fn mine_repository(&self, repo_name: &str) -> Result<RepositoryDataSnapshot, MiningError>;
}

/// `https://github.com/owner/repo(.git)` -> `owner/repo`
pub fn repo_name_from_url(repo_url: &str) -> Result<String, MiningError> {
    let invalid = || MiningError::InvalidRepository(repo_url.to_owned());
    let url = Url::parse(repo_url.trim()).map_err(|_| invalid())?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(invalid());
    }
    let owner = segments[segments.len() - 2];
    let repo = segments[segments.len() - 1];
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return Err(invalid());
    }
    Ok(format!("{}/{}", owner, repo))
}

#[derive(Debug, Deserialize)]
struct GitHubLogin {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubPull {
    number: i64,
    title: String,
    body: Option<String>,
    state: ItemState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    head: GitHubRef,
    user: Option<GitHubLogin>,
    #[serde(default)]
    assignees: Vec<GitHubLogin>,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
}

#[derive(Debug, Deserialize)]
struct GitHubReview {
    user: Option<GitHubLogin>,
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: i64,
    title: String,
    state: ItemState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    user: Option<GitHubLogin>,
    #[serde(default)]
    assignees: Vec<GitHubLogin>,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    pull_request: Option<serde_json::Value>,
}

fn unique_logins<'a>(logins: impl Iterator<Item = &'a GitHubLogin>) -> Vec<String> {
    logins
        .map(|l| l.login.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl GitHubPull {
    fn into_record(self, reviewers: Vec<String>) -> PullRequestRecord {
        let assignees = unique_logins(self.assignees.iter());
        PullRequestRecord {
            number: self.number,
            title: self.title,
            body: self.body,
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            merged_at: self.merged_at,
            closed_at: self.closed_at,
            head_ref: self.head.ref_name,
            author: self.user.map(|u| u.login).unwrap_or_default(),
            assignees,
            reviewers,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

impl From<GitHubIssue> for IssueRecord {
    fn from(issue: GitHubIssue) -> Self {
        let assignees = unique_logins(issue.assignees.iter());
        IssueRecord {
            number: issue.number,
            title: issue.title,
            state: issue.state,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            closed_at: issue.closed_at,
            author: issue.user.map(|u| u.login).unwrap_or_default(),
            assignees,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

pub struct GitHubMiner {
    client: Client,
    api_url: String,
    token: Option<String>,
    cutoff_days: i64,
}

impl GitHubMiner {
    pub fn new(api_url: impl Into<String>, token: Option<String>, cutoff_days: i64) -> Self {
        GitHubMiner {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            token,
            cutoff_days,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MiningError> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .client
            .get(&url)
            .header(USER_AGENT, "pr-insight")
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        check_rate_limit(response.headers(), path)?;

        match response.status() {
            s if s.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(MiningError::InvalidRepository(path.to_owned())),
            s => {
                let status = s.as_u16();
                let body = response.text().await.unwrap_or_default();
                Err(MiningError::Http { status, body })
            }
        }
    }

    async fn reviewers(&self, repo_name: &str, number: i64) -> Result<Vec<String>, MiningError> {
        let mut reviews = Vec::new();
        let mut page = 1;
        loop {
            let batch: Vec<GitHubReview> = self
                .get_json(&format!(
                    "/repos/{}/pulls/{}/reviews?per_page={}&page={}",
                    repo_name, number, PER_PAGE, page
                ))
                .await?;
            let exhausted = batch.len() < PER_PAGE as usize;
            reviews.extend(batch);
            if exhausted {
                break;
            }
            page += 1;
        }
        Ok(unique_logins(reviews.iter().filter_map(|r| r.user.as_ref())))
    }

    async fn mine_pull_requests(
        &self,
        repo_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PullRequestRecord>, MiningError> {
        let mut records = Vec::new();
        let mut page = 1;
        'pages: loop {
            let pulls: Vec<GitHubPull> = self
                .get_json(&format!(
                    "/repos/{}/pulls?state=all&sort=updated&direction=desc&per_page={}&page={}",
                    repo_name, PER_PAGE, page
                ))
                .await?;
            let exhausted = pulls.len() < PER_PAGE as usize;
            for pull in pulls {
                // sorted by updated desc, nothing older follows
                if pull.updated_at < cutoff {
                    break 'pages;
                }
                let reviewers = self.reviewers(repo_name, pull.number).await?;
                records.push(pull.into_record(reviewers));
            }
            if exhausted {
                break;
            }
            page += 1;
        }
        debug!("Mined {} pull requests from {}", records.len(), repo_name);
        Ok(records)
    }

    async fn mine_issues(
        &self,
        repo_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IssueRecord>, MiningError> {
        let mut records = Vec::new();
        let mut page = 1;
        'pages: loop {
            let issues: Vec<GitHubIssue> = self
                .get_json(&format!(
                    "/repos/{}/issues?state=all&sort=updated&direction=desc&per_page={}&page={}",
                    repo_name, PER_PAGE, page
                ))
                .await?;
            let exhausted = issues.len() < PER_PAGE as usize;
            for issue in issues {
                if issue.updated_at < cutoff {
                    break 'pages;
                }
                // the issues endpoint also lists pull requests
                if issue.pull_request.is_some() {
                    continue;
                }
                records.push(issue.into());
            }
            if exhausted {
                break;
            }
            page += 1;
        }
        debug!("Mined {} issues from {}", records.len(), repo_name);
        Ok(records)
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn check_rate_limit(headers: &HeaderMap, check_name: &str) -> Result<(), MiningError> {
    let (Some(remaining), Some(limit)) = (
        header_u64(headers, "x-ratelimit-remaining"),
        header_u64(headers, "x-ratelimit-limit"),
    ) else {
        return Ok(());
    };
    let reset = header_u64(headers, "x-ratelimit-reset")
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0))
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_owned());

    if remaining == 0 {
        error!("GitHub API rate limit exhausted at {}, resets at {}", check_name, reset);
        return Err(MiningError::RateLimited { reset });
    }
    if (remaining as f64) < limit as f64 * 0.1 {
        warn!(
            "GitHub API rate limit running low: {}/{} remaining, resets at {}",
            remaining, limit, reset
        );
    }
    Ok(())
}

#[async_trait]
impl RepositoryMiner for GitHubMiner {
    async fn mine_repository(&self, repo_name: &str) -> Result<RepositoryDataSnapshot, MiningError> {
        info!("Starting repository mining for {}", repo_name);
        let cutoff = Utc::now() - Duration::days(self.cutoff_days);

        let pull_requests = self.mine_pull_requests(repo_name, cutoff).await?;
        let issues = self.mine_issues(repo_name, cutoff).await?;

        info!(
            "Repository {} mined: {} pull requests, {} issues since {}",
            repo_name,
            pull_requests.len(),
            issues.len(),
            cutoff.to_rfc3339()
        );
        Ok(RepositoryDataSnapshot::new(repo_name, pull_requests, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(
            repo_name_from_url("https://github.com/rust-lang/cargo").unwrap(),
            "rust-lang/cargo"
        );
        assert_eq!(
            repo_name_from_url("https://github.com/rust-lang/cargo.git/").unwrap(),
            "rust-lang/cargo"
        );
        assert!(repo_name_from_url("https://github.com/only-owner").is_err());
        assert!(repo_name_from_url("not a url").is_err());
    }

    #[test]
    fn test_pull_converts_with_deduplicated_people() {
        let json = r#"
        {
            "number": 42,
            "title": "feat: add thing",
            "body": null,
            "state": "closed",
            "created_at": "2024-12-01T10:00:00Z",
            "updated_at": "2024-12-03T10:00:00Z",
            "merged_at": "2024-12-03T10:00:00Z",
            "closed_at": "2024-12-03T10:00:00Z",
            "head": {"ref": "feature/thing"},
            "user": {"login": "alice"},
            "assignees": [{"login": "bob"}, {"login": "bob"}],
            "labels": [{"name": "enhancement"}]
        }
        "#;
        let pull: GitHubPull = serde_json::from_str(json).unwrap();
        let record = pull.into_record(vec!["carol".into()]);
        assert_eq!(record.head_ref, "feature/thing");
        assert_eq!(record.assignees, vec!["bob".to_owned()]);
        assert_eq!(record.labels, vec!["enhancement".to_owned()]);
        assert!(record.is_merged());
    }

    #[test]
    fn test_exhausted_rate_limit_is_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5000"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1735689600"));
        assert!(matches!(
            check_rate_limit(&headers, "pulls"),
            Err(MiningError::RateLimited { .. })
        ));

        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("100"));
        assert!(check_rate_limit(&headers, "pulls").is_ok());
    }

    /// Serves `/reviews` pages from canned JSON, one connection per request.
    async fn serve_reviews(pages: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let paths = Arc::new(Mutex::new(Vec::new()));
        let seen = paths.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                let path = text.split_whitespace().nth(1).unwrap_or_default().to_owned();
                let page: usize = path
                    .rsplit("page=")
                    .next()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(1);
                let body = pages.get(page - 1).cloned().unwrap_or_else(|| "[]".to_owned());
                seen.lock().unwrap().push(path);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (base, paths)
    }

    fn review_page(users: impl Iterator<Item = String>) -> String {
        let reviews: Vec<serde_json::Value> = users
            .map(|login| serde_json::json!({ "user": { "login": login } }))
            .collect();
        serde_json::Value::Array(reviews).to_string()
    }

    #[tokio::test]
    async fn test_reviewers_follow_every_page() {
        // 一页满 100 条, 第二页的评审者也要收集
        let first = review_page((0..PER_PAGE).map(|i| format!("user{}", i % 3)));
        let second = review_page(["late-reviewer".to_owned()].into_iter());
        let (base, paths) = serve_reviews(vec![first, second]).await;
        let miner = GitHubMiner {
            // a local server must not go through an environment proxy
            client: Client::builder().no_proxy().build().unwrap(),
            api_url: base,
            token: None,
            cutoff_days: 30,
        };

        let reviewers = miner.reviewers("owner/repo", 7).await.unwrap();
        assert_eq!(reviewers, vec!["late-reviewer", "user0", "user1", "user2"]);
        assert_eq!(
            *paths.lock().unwrap(),
            vec![
                "/repos/owner/repo/pulls/7/reviews?per_page=100&page=1".to_owned(),
                "/repos/owner/repo/pulls/7/reviews?per_page=100&page=2".to_owned(),
            ]
        );
    }
}
