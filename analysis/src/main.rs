mod analyzer;
mod classifier;
mod completion;
mod config;
mod error;
mod manager;
mod report;

use analyzer::RepositoryAnalyzer;
use anyhow::Result;
use clap::Parser;
use crate::config::AnalysisContext;
use database::storage::Context;
use github_handler::GitHubMiner;
use manager::AnalysisManager;
use report::MarkdownReport;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Classify and aggregate pull request activity of GitHub repositories")]
struct Args {
    /// Config file path, extension optional
    #[arg(long, default_value = "analysis/config")]
    config: String,

    /// Repository URL to analyze; repeat to analyze several, overrides the config list
    #[arg(long = "repo")]
    repos: Vec<String>,
}

fn init_logger() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志记录器
    init_logger();

    let args = Args::parse();

    // 加载配置
    let ctx = AnalysisContext::load_config(&args.config)?;
    let repository_urls = if args.repos.is_empty() {
        ctx.github.repository_urls.clone()
    } else {
        args.repos
    };
    if repository_urls.is_empty() {
        warn!("No repositories configured, nothing to do");
        return Ok(());
    }

    // 初始化存储
    let db_ctx = Context::new(&ctx.storage.data_dir).await?;

    let miner = GitHubMiner::new(&ctx.github.api_url, ctx.github.token.clone(), ctx.github.cutoff_days);
    let classifier = classifier::build_classifier(&ctx)?;
    let analyzer = RepositoryAnalyzer::new(classifier, &ctx.analysis);
    let renderer = MarkdownReport::new(&ctx.report.output_dir);

    let manager = AnalysisManager::new(
        db_ctx.repository_store_stg(),
        Arc::new(miner),
        analyzer,
        Arc::new(renderer),
        ctx.analysis.repository_concurrency,
    );

    let results = manager.run(&repository_urls).await?;
    info!(
        "Analysis finished, {} repositories written to {}",
        results.len(),
        ctx.report.output_dir
    );

    Ok(())
}
