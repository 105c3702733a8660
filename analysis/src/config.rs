use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use model::WorkType;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GithubConfig {
    pub token: Option<String>,
    pub repository_urls: Vec<String>,
    /// 只挖掘最近 N 天内更新过的 PR / issue
    pub cutoff_days: i64,
    pub api_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            repository_urls: Vec::new(),
            cutoff_days: 60,
            api_url: "https://api.github.com".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: "reports".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Heuristic,
    Llm,
}

/// How the LLM classifier processes a whole repository.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// one request per PR, bounded worker pool, retries
    Pooled,
    /// one request per PR, all admitted through the token/request limiter
    RateLimited,
    /// one asynchronous batch job for every PR
    BatchJob,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 统计窗口, 单位为天
    pub intervals: Vec<u32>,
    pub allowed_types: Vec<WorkType>,
    pub classifier: ClassifierKind,
    pub mode: InvocationMode,
    /// repositories processed at the same time in a multi-repository run
    pub repository_concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            intervals: vec![7, 30, 60],
            allowed_types: WorkType::ALL.to_vec(),
            classifier: ClassifierKind::Heuristic,
            mode: InvocationMode::Pooled,
            repository_concurrency: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    /// the single-item answer is "number,category", keep it short
    pub max_response_tokens: u32,
    pub request_timeout_secs: u64,
    /// added to each prompt estimate in rate-limited mode
    pub token_overhead: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key: None,
            model: "gpt-4o-mini".to_owned(),
            temperature: 0.1,
            max_response_tokens: 10,
            request_timeout_secs: 120,
            token_overhead: 300,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub max_tokens: u64,
    pub period_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 500,
            max_tokens: 200_000,
            period_seconds: 60.0,
        }
    }
}

impl RateLimitConfig {
    /// 窗口上限一天
    pub const MAX_PERIOD_SECONDS: f64 = 86_400.0;

    /// Never panics: NaN and negative values give zero, larger values are capped.
    pub fn period(&self) -> Duration {
        let secs = if self.period_seconds > 0.0 {
            self.period_seconds.min(Self::MAX_PERIOD_SECONDS)
        } else {
            0.0
        };
        Duration::from_secs_f64(secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        Duration::try_from_secs_f64(self.period_seconds).with_context(|| {
            format!("Invalid rate_limit.period_seconds `{}`", self.period_seconds)
        })?;
        anyhow::ensure!(
            self.period_seconds <= Self::MAX_PERIOD_SECONDS,
            "rate_limit.period_seconds `{}` exceeds {}",
            self.period_seconds,
            Self::MAX_PERIOD_SECONDS
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { concurrency: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// total attempts, the first call included
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub poll_interval_secs: u64,
    /// 超过轮询次数上限视为失败, 默认约 24 小时
    pub max_polls: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_polls: 1_440,
        }
    }
}

/// 分析上下文, 构造各组件时显式传入
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AnalysisContext {
    pub github: GithubConfig,
    pub storage: StorageConfig,
    pub report: ReportConfig,
    pub analysis: AnalysisConfig,
    pub llm: LlmConfig,
    pub rate_limit: RateLimitConfig,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
}

impl AnalysisContext {
    pub fn load_config(config_path: &str) -> anyhow::Result<Self> {
        let ctx: Self = Config::builder()
            .add_source(
                File::with_name(config_path)
                    .format(FileFormat::Toml)
                    .required(true),
            )
            .add_source(
                Environment::with_prefix("PRINSIGHT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("github.repository_urls")
                    .with_list_parse_key("analysis.intervals"),
            )
            .build()
            .with_context(|| anyhow::anyhow!("Failed to load config"))?
            .try_deserialize()
            .with_context(|| anyhow::anyhow!("Failed to deserialize config"))?;
        ctx.rate_limit.validate()?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[github]
repository_urls = ["https://github.com/a/b"]

[analysis]
intervals = [7, 14]
classifier = "llm"
mode = "batch_job"

[rate_limit]
max_requests = 10
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_owned();
        let ctx = AnalysisContext::load_config(&path).unwrap();
        assert_eq!(ctx.github.repository_urls, vec!["https://github.com/a/b"]);
        assert_eq!(ctx.github.cutoff_days, 60);
        assert_eq!(ctx.analysis.intervals, vec![7, 14]);
        assert_eq!(ctx.analysis.classifier, ClassifierKind::Llm);
        assert_eq!(ctx.analysis.mode, InvocationMode::BatchJob);
        assert_eq!(ctx.analysis.allowed_types.len(), WorkType::ALL.len());
        assert_eq!(ctx.rate_limit.max_requests, 10);
        assert_eq!(ctx.rate_limit.max_tokens, 200_000);
        assert_eq!(ctx.pool.concurrency, 10);
        assert_eq!(ctx.retry.max_attempts, 3);
        assert_eq!(ctx.llm.request_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_infinite_period_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[rate_limit]\nperiod_seconds = inf").unwrap();
        let path = file.path().to_str().unwrap().to_owned();

        let err = AnalysisContext::load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("period_seconds"));
    }

    #[test]
    fn test_out_of_range_period_does_not_panic() {
        let period = |period_seconds: f64| {
            RateLimitConfig {
                period_seconds,
                ..RateLimitConfig::default()
            }
            .period()
        };
        assert_eq!(period(f64::INFINITY), Duration::from_secs(86_400));
        assert_eq!(period(1e300), Duration::from_secs(86_400));
        assert_eq!(period(f64::NAN), Duration::ZERO);
        assert_eq!(period(-5.0), Duration::ZERO);
        assert_eq!(period(1.5), Duration::from_millis(1500));

        let invalid = RateLimitConfig {
            period_seconds: -1.0,
            ..RateLimitConfig::default()
        };
        assert!(invalid.validate().is_err());
        assert!(RateLimitConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AnalysisContext::load_config("/nonexistent/prinsight").is_err());
    }
}
