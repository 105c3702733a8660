use crate::classifier::prompt::{self, ByteEstimate, TokenCounter};
use crate::classifier::rate_limit::RateLimiter;
use crate::classifier::{collect_in_order, PrClassifier};
use crate::completion::{BatchPhase, ChatMessage, ChatRequest, CompletionService, ResponseFormat};
use crate::config::{AnalysisContext, InvocationMode, RetryConfig};
use crate::error::{BatchJobError, ClassificationError};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use model::{PullRequestRecord, WorkType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const BATCH_FILE_NAME: &str = "batch_tasks_classify_prs.jsonl";
const BATCH_ENDPOINT: &str = "/v1/chat/completions";

#[derive(Serialize)]
struct BatchTask<'a> {
    custom_id: String,
    method: &'a str,
    url: &'a str,
    body: ChatRequest,
}

#[derive(Deserialize)]
struct BatchResultLine {
    custom_id: String,
    response: Option<BatchResultResponse>,
}

#[derive(Deserialize)]
struct BatchResultResponse {
    status_code: u16,
    body: BatchResultBody,
}

#[derive(Deserialize)]
struct BatchResultBody {
    choices: Vec<BatchResultChoice>,
}

#[derive(Deserialize)]
struct BatchResultChoice {
    message: BatchResultMessage,
}

#[derive(Deserialize)]
struct BatchResultMessage {
    content: Option<String>,
}

fn task_id(row: usize) -> String {
    format!("task-{}", row)
}

fn row_from_task_id(custom_id: &str) -> Option<usize> {
    custom_id.strip_prefix("task-")?.parse().ok()
}

/// 基于大模型补全接口的 PR 分类器
pub struct LlmClassifier {
    client: Arc<dyn CompletionService>,
    token_counter: Arc<dyn TokenCounter>,
    rate_limiter: Arc<RateLimiter>,
    pool: Arc<Semaphore>,
    many_mode: InvocationMode,
    model: String,
    temperature: f32,
    max_response_tokens: u32,
    request_timeout: Duration,
    token_overhead: u64,
    retry: RetryConfig,
    poll_interval: Duration,
    max_polls: u32,
}

impl LlmClassifier {
    pub fn from_context(client: Arc<dyn CompletionService>, ctx: &AnalysisContext) -> Self {
        Self {
            client,
            token_counter: Arc::new(ByteEstimate),
            rate_limiter: Arc::new(RateLimiter::from_config(&ctx.rate_limit)),
            pool: Arc::new(Semaphore::new(ctx.pool.concurrency.max(1))),
            many_mode: ctx.analysis.mode,
            model: ctx.llm.model.clone(),
            temperature: ctx.llm.temperature,
            max_response_tokens: ctx.llm.max_response_tokens,
            request_timeout: ctx.llm.request_timeout(),
            token_overhead: ctx.llm.token_overhead,
            retry: ctx.retry.clone(),
            poll_interval: Duration::from_secs(ctx.batch.poll_interval_secs),
            max_polls: ctx.batch.max_polls,
        }
    }

    #[cfg(test)]
    pub fn with_token_counter(mut self, token_counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = token_counter;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.retry.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_max_times(self.retry.max_attempts.saturating_sub(1))
    }

    /// One completion call, no retry.
    async fn request_classification(
        &self,
        pr: &PullRequestRecord,
        allowed: &[WorkType],
    ) -> Result<WorkType, ClassificationError> {
        let user_prompt = prompt::user_prompt(pr, allowed);
        debug!(
            "Prompt token count for PR #{}: {}",
            pr.number,
            self.token_counter.count(&user_prompt)
        );
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(prompt::system_prompt(allowed)),
                ChatMessage::user(user_prompt),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_response_tokens),
            response_format: None,
        };

        let content = tokio::time::timeout(self.request_timeout, self.client.chat_completion(&request))
            .await
            .map_err(|_| ClassificationError::Timeout { number: pr.number })?
            .map_err(|source| ClassificationError::Completion {
                number: pr.number,
                source,
            })?;
        prompt::parse_single_response(&content, pr.number, allowed)
    }

    /// Per-item requests, at most `pool.concurrency` in flight.
    pub async fn classify_pooled(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        let tasks = prs.iter().enumerate().map(|(index, pr)| async move {
            let result = match self.pool.acquire().await {
                Ok(_permit) => self.classify_one(pr, allowed).await,
                Err(_) => Err(ClassificationError::PoolClosed),
            };
            (index, result)
        });
        collect_in_order(prs.len(), tasks).await
    }

    /// Every PR submitted at once; each request waits for the limiter first.
    pub async fn classify_rate_limited(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        debug!(
            "Rate limit: {} requests / {} tokens per {:.0}s",
            self.rate_limiter.max_requests(),
            self.rate_limiter.max_tokens(),
            self.rate_limiter.period().as_secs_f64()
        );
        let tasks = prs.iter().enumerate().map(|(index, pr)| async move {
            let user_prompt = prompt::user_prompt(pr, allowed);
            let cost = self.token_counter.count(&user_prompt) + self.token_overhead;
            self.rate_limiter.admit(cost).await;
            (index, self.classify_one(pr, allowed).await)
        });
        collect_in_order(prs.len(), tasks).await
    }

    fn batch_file(&self, prs: &[PullRequestRecord], allowed: &[WorkType]) -> Result<Vec<u8>, BatchJobError> {
        let system_prompt = prompt::batch_system_prompt(allowed);
        let mut content = Vec::new();
        for (row, pr) in prs.iter().enumerate() {
            let task = BatchTask {
                custom_id: task_id(row),
                method: "POST",
                url: BATCH_ENDPOINT,
                body: ChatRequest {
                    model: self.model.clone(),
                    messages: vec![
                        ChatMessage::system(system_prompt.clone()),
                        ChatMessage::user(prompt::batch_user_prompt(pr)),
                    ],
                    temperature: self.temperature,
                    max_tokens: None,
                    response_format: Some(ResponseFormat {
                        kind: "json_object".to_owned(),
                    }),
                },
            };
            serde_json::to_writer(&mut content, &task)
                .map_err(|e| BatchJobError::MalformedResult(e.to_string()))?;
            content.push(b'\n');
        }
        Ok(content)
    }

    /// Polls until the job completes, fails, or the poll ceiling is reached.
    /// Returns the output file id.
    async fn wait_for_batch(&self, batch_id: &str) -> Result<String, BatchJobError> {
        let start = Instant::now();
        let mut polls = 0;
        let mut job = self
            .client
            .retrieve_batch(batch_id)
            .await
            .map_err(|source| BatchJobError::Poll {
                batch_id: batch_id.to_owned(),
                source,
            })?;

        loop {
            match job.status.phase() {
                BatchPhase::Completed => break,
                BatchPhase::Failed => {
                    return Err(BatchJobError::Failed {
                        batch_id: job.id,
                        status: job.status.to_string(),
                    })
                }
                BatchPhase::Submitted | BatchPhase::Running => {}
            }
            if polls >= self.max_polls {
                return Err(BatchJobError::PollCeiling {
                    batch_id: job.id,
                    polls,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            job = self
                .client
                .retrieve_batch(batch_id)
                .await
                .map_err(|source| BatchJobError::Poll {
                    batch_id: batch_id.to_owned(),
                    source,
                })?;
            info!("Batch job {} status: {} (poll {})", job.id, job.status, polls);
        }

        info!(
            "Batch job {} completed in {:.2} minutes",
            job.id,
            start.elapsed().as_secs_f64() / 60.0
        );
        job.output_file_id
            .ok_or_else(|| BatchJobError::MissingOutput(job.id.clone()))
    }

    fn parse_batch_results(
        content: &[u8],
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        let text = String::from_utf8_lossy(content);
        let mut slots: Vec<Option<WorkType>> = vec![None; prs.len()];

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let malformed = || BatchJobError::MalformedResult(line.to_owned());
            let parsed: BatchResultLine = serde_json::from_str(line).map_err(|_| malformed())?;
            let row = row_from_task_id(&parsed.custom_id)
                .filter(|row| *row < prs.len())
                .ok_or_else(malformed)?;
            let response = parsed
                .response
                .filter(|r| r.status_code == 200)
                .ok_or_else(malformed)?;
            let answer = response
                .body
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(malformed)?;
            slots[row] = Some(prompt::parse_batch_answer(&answer, prs[row].number, allowed)?);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(row, slot)| {
                slot.ok_or_else(|| ClassificationError::from(BatchJobError::MissingResult { row }))
            })
            .collect()
    }

    async fn delete_artifact(&self, file_id: &str) {
        if let Err(e) = self.client.delete_file(file_id).await {
            warn!("Failed to delete batch file {}: {}", file_id, e);
        }
    }
}

#[async_trait]
impl PrClassifier for LlmClassifier {
    fn name(&self) -> &'static str {
        "llm"
    }

    /// Retries any failure with exponential backoff up to `retry.max_attempts`.
    async fn classify_one(
        &self,
        pr: &PullRequestRecord,
        allowed: &[WorkType],
    ) -> Result<WorkType, ClassificationError> {
        let attempt = || self.request_classification(pr, allowed);
        attempt
            .retry(self.backoff())
            .notify(|e: &ClassificationError, dur: Duration| {
                warn!(
                    "Classifying PR #{} failed, retrying after {:.2}s: {}",
                    pr.number,
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn classify_many(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        match self.many_mode {
            InvocationMode::RateLimited => self.classify_rate_limited(prs, allowed).await,
            InvocationMode::Pooled | InvocationMode::BatchJob => {
                self.classify_pooled(prs, allowed).await
            }
        }
    }

    async fn classify_as_job(
        &self,
        prs: &[PullRequestRecord],
        allowed: &[WorkType],
    ) -> Result<Vec<WorkType>, ClassificationError> {
        if prs.is_empty() {
            return Ok(Vec::new());
        }
        info!("Processing {} PRs in a single batch job", prs.len());

        let content = self.batch_file(prs, allowed)?;
        let input_file_id = self
            .client
            .upload_batch_file(BATCH_FILE_NAME, content)
            .await
            .map_err(BatchJobError::Upload)?;
        let job = match self.client.create_batch(&input_file_id).await {
            Ok(job) => job,
            Err(e) => {
                self.delete_artifact(&input_file_id).await;
                return Err(BatchJobError::Create(e).into());
            }
        };
        info!("Created batch job {} for file {}", job.id, input_file_id);

        // 轮询超限时作业可能仍在运行, 输入文件保留
        let output_file_id = match self.wait_for_batch(&job.id).await {
            Ok(id) => id,
            Err(e @ BatchJobError::Failed { .. }) => {
                self.delete_artifact(&input_file_id).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        let output = self
            .client
            .file_content(&output_file_id)
            .await
            .map_err(BatchJobError::Download)?;

        self.delete_artifact(&output_file_id).await;
        self.delete_artifact(&input_file_id).await;

        let types = Self::parse_batch_results(&output, prs, allowed)?;
        info!("Batch classification done for {} PRs", types.len());
        Ok(types)
    }
}
