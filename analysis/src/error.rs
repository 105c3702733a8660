use crate::completion::CompletionError;
use thiserror::Error;

/// 单个 PR 分类失败 (重试耗尽或响应无法解析)
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("completion request for PR #{number} failed: {source}")]
    Completion {
        number: i64,
        #[source]
        source: CompletionError,
    },
    #[error("completion request for PR #{number} timed out")]
    Timeout { number: i64 },
    #[error("unparseable response for PR #{number}: `{content}`")]
    Parse { number: i64, content: String },
    #[error("PR #{number} classified as `{category}`, which is not an allowed category")]
    UnknownCategory { number: i64, category: String },
    #[error("response answered PR #{got}, expected #{expected}")]
    NumberMismatch { expected: i64, got: i64 },
    #[error("no classification produced for input position {index}")]
    MissingResult { index: usize },
    #[error("worker pool closed")]
    PoolClosed,
    #[error(transparent)]
    Batch(#[from] BatchJobError),
}

/// 批处理任务失败, 不会自动重试
#[derive(Debug, Error)]
pub enum BatchJobError {
    #[error("uploading batch task file failed: {0}")]
    Upload(#[source] CompletionError),
    #[error("creating batch job failed: {0}")]
    Create(#[source] CompletionError),
    #[error("polling batch job {batch_id} failed: {source}")]
    Poll {
        batch_id: String,
        #[source]
        source: CompletionError,
    },
    #[error("batch job {batch_id} ended with status `{status}`")]
    Failed { batch_id: String, status: String },
    #[error("batch job {batch_id} still unfinished after {polls} polls")]
    PollCeiling { batch_id: String, polls: u32 },
    #[error("batch job {0} completed without an output file")]
    MissingOutput(String),
    #[error("downloading batch results failed: {0}")]
    Download(#[source] CompletionError),
    #[error("malformed batch result line: {0}")]
    MalformedResult(String),
    #[error("batch results have no entry for row {row}")]
    MissingResult { row: usize },
}
