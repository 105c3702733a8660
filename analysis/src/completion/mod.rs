pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use openai::OpenAiClient;

#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("completion returned no content")]
    EmptyResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_owned(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// Provider-side batch lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// 轮询状态机: submitted -> running -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn phase(&self) -> BatchPhase {
        match self {
            BatchStatus::Validating | BatchStatus::Unknown => BatchPhase::Submitted,
            BatchStatus::InProgress | BatchStatus::Finalizing => BatchPhase::Running,
            BatchStatus::Completed => BatchPhase::Completed,
            BatchStatus::Failed
            | BatchStatus::Expired
            | BatchStatus::Cancelling
            | BatchStatus::Cancelled => BatchPhase::Failed,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    pub output_file_id: Option<String>,
}

/// 外部补全服务: 同步对话补全 + 文件上传 + 异步批处理
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Returns the content of the first choice.
    async fn chat_completion(&self, request: &ChatRequest) -> Result<String, CompletionError>;

    /// Uploads a newline-delimited task file for batch processing, returns the file id.
    async fn upload_batch_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<String, CompletionError>;

    async fn create_batch(&self, input_file_id: &str) -> Result<BatchJob, CompletionError>;

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, CompletionError>;

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>, CompletionError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_phases() {
        let job: BatchJob =
            serde_json::from_str(r#"{"id":"batch_1","status":"in_progress","output_file_id":null}"#)
                .unwrap();
        assert_eq!(job.status.phase(), BatchPhase::Running);

        let job: BatchJob =
            serde_json::from_str(r#"{"id":"batch_1","status":"paused_by_operator"}"#).unwrap();
        assert_eq!(job.status, BatchStatus::Unknown);
        assert_eq!(job.status.phase(), BatchPhase::Submitted);
        assert_eq!(BatchStatus::Expired.phase(), BatchPhase::Failed);
    }

    #[test]
    fn test_chat_request_omits_unset_options() {
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.1,
            max_tokens: None,
            response_format: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("response_format").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
