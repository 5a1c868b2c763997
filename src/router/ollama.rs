//! Backend adapter for Ollama's native `/api/*` endpoints. Grounded on
//! `original_source/backend/inference/ollama.py`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::RouterError;

use super::{ChatMessage, ChatRequest, ChatResponse, ChatStream, DiscoveredModel, DownloadProgress, DownloadStream, InferenceBackend};

/// Ollama streams newline-delimited JSON objects rather than SSE; each
/// line is a complete chat-response fragment in the same shape as the
/// non-streamed `/api/chat` body, with `done: true` marking the last one.
fn ndjson_lines(resp: reqwest::Response) -> impl futures_util::Stream<Item = Result<String, RouterError>> {
    resp.bytes_stream()
        .map(|chunk| chunk.map_err(RouterError::from))
        .flat_map(|chunk| {
            let lines: Vec<Result<String, RouterError>> = match chunk {
                Ok(bytes) => String::from_utf8_lossy(&bytes)
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| Ok(l.to_string()))
                    .collect(),
                Err(err) => vec![Err(err)],
            };
            futures_util::stream::iter(lines)
        })
}

pub struct OllamaBackend {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

/// Ollama's `/api/chat` wants `images: [base64]` as a sibling field on each
/// message rather than OpenAI's multi-part `content` array with
/// `data:` URLs; this flattens the latter into the former.
fn to_ollama_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect()
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover_models(&self) -> Result<Vec<DiscoveredModel>, RouterError> {
        #[derive(Deserialize)]
        struct TagsResponse {
            models: Vec<TagEntry>,
        }
        #[derive(Deserialize)]
        struct TagEntry {
            name: String,
        }

        let url = format!("{}/api/tags", self.endpoint);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: TagsResponse = resp.json().await?;
        Ok(parsed
            .models
            .into_iter()
            .map(|m| DiscoveredModel {
                id: m.name.trim_end_matches(":latest").to_string(),
            })
            .collect())
    }

    async fn call_llm(&self, req: &ChatRequest) -> Result<ChatResponse, RouterError> {
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            messages: Vec<serde_json::Value>,
            stream: bool,
        }
        #[derive(Deserialize)]
        struct ChatResponseMessage {
            content: String,
        }
        #[derive(Deserialize)]
        struct OllamaChatResponse {
            message: ChatResponseMessage,
            #[serde(default)]
            prompt_eval_count: Option<u32>,
            #[serde(default)]
            eval_count: Option<u32>,
        }

        let body = Body {
            model: &req.model_id,
            messages: to_ollama_messages(&req.messages),
            stream: false,
        };

        let url = format!("{}/api/chat", self.endpoint);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: OllamaChatResponse = resp.json().await?;
        Ok(ChatResponse {
            content: parsed.message.content,
            prompt_tokens: parsed.prompt_eval_count,
            completion_tokens: parsed.eval_count,
        })
    }

    async fn call_llm_stream(&self, req: &ChatRequest) -> Result<ChatStream, RouterError> {
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            messages: Vec<serde_json::Value>,
            stream: bool,
        }
        #[derive(Deserialize)]
        struct ChatResponseMessage {
            #[serde(default)]
            content: String,
        }
        #[derive(Deserialize)]
        struct StreamFrame {
            #[serde(default)]
            message: Option<ChatResponseMessage>,
            #[serde(default)]
            done: bool,
        }

        let body = Body {
            model: &req.model_id,
            messages: to_ollama_messages(&req.messages),
            stream: true,
        };

        let url = format!("{}/api/chat", self.endpoint);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let stream = ndjson_lines(resp).filter_map(|line| async move {
            let line = match line {
                Ok(l) => l,
                Err(err) => return Some(Err(err)),
            };
            match serde_json::from_str::<StreamFrame>(&line) {
                Ok(frame) if frame.done => None,
                Ok(frame) => frame.message.map(|m| Ok(m.content)),
                Err(err) => Some(Err(RouterError::MalformedResponse(err.to_string()))),
            }
        });
        Ok(Box::pin(stream))
    }

    /// Fetches a model via `/api/pull`, relaying Ollama's own NDJSON
    /// progress frames (`status`, and once a layer starts downloading,
    /// `completed`/`total` byte counts) as `DownloadProgress`.
    async fn download_model(&self, model_id: &str) -> Result<DownloadStream, RouterError> {
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            stream: bool,
        }

        let url = format!("{}/api/pull", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&Body { model: model_id, stream: true })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let stream = ndjson_lines(resp).map(|line| {
            let line = line?;
            serde_json::from_str::<DownloadProgress>(&line).map_err(|e| RouterError::MalformedResponse(e.to_string()))
        });
        Ok(Box::pin(stream))
    }

    async fn embed(&self, model_id: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, RouterError> {
        #[derive(Deserialize)]
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }
        let url = format!("{}/api/embed", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": model_id, "input": inputs }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: EmbedResponse = resp.json().await?;
        Ok(parsed.embeddings)
    }

    /// Ollama manages model residency itself on a request-driven basis;
    /// there is no explicit load call, but `keep_alive: 0` requests unload.
    async fn load_model(&self, model_id: &str) -> Result<(), RouterError> {
        let url = format!("{}/api/chat", self.endpoint);
        let _ = self
            .client
            .post(&url)
            .json(&json!({ "model": model_id, "messages": [], "keep_alive": "5m" }))
            .send()
            .await;
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), RouterError> {
        let url = format!("{}/api/chat", self.endpoint);
        let _ = self
            .client
            .post(&url)
            .json(&json!({ "model": model_id, "messages": [], "keep_alive": 0 }))
            .send()
            .await;
        Ok(())
    }
}
