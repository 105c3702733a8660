use crate::completion::{BatchJob, ChatRequest, CompletionError, CompletionService};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// OpenAI 兼容接口的 HTTP 客户端
#[derive(Clone)]
pub struct OpenAiClient {
    base: String,
    http: Client,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base", &self.base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<present>"))
            .finish()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

fn map_reqwest_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else if e.is_decode() {
        CompletionError::Serde(e.to_string())
    } else {
        CompletionError::Transport(e.to_string())
    }
}

impl OpenAiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("pr-insight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_owned(),
            http,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, CompletionError> {
        let res = req.send().await.map_err(map_reqwest_error)?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(CompletionError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, CompletionError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| CompletionError::Serde(e.to_string()))
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<String, CompletionError> {
        let response: ChatResponse = self
            .send_json(self.request(Method::POST, "/chat/completions").json(request))
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_owned())
            .filter(|content| !content.is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }

    async fn upload_batch_file(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<String, CompletionError> {
        let part = Part::bytes(content)
            .file_name(file_name.to_owned())
            .mime_str("application/jsonl")
            .map_err(map_reqwest_error)?;
        let form = Form::new().text("purpose", "batch").part("file", part);
        let file: FileObject = self
            .send_json(self.request(Method::POST, "/files").multipart(form))
            .await?;
        Ok(file.id)
    }

    async fn create_batch(&self, input_file_id: &str) -> Result<BatchJob, CompletionError> {
        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h",
        });
        self.send_json(self.request(Method::POST, "/batches").json(&body))
            .await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, CompletionError> {
        self.send_json(self.request(Method::GET, &format!("/batches/{}", batch_id)))
            .await
    }

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>, CompletionError> {
        let res = self
            .send(self.request(Method::GET, &format!("/files/{}/content", file_id)))
            .await?;
        let bytes = res.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), CompletionError> {
        self.send(self.request(Method::DELETE, &format!("/files/{}", file_id)))
            .await?;
        Ok(())
    }
}
