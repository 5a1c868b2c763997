//! Backend adapter for OpenAI-compatible inference servers (LM Studio,
//! vLLM, text-generation-webui). Grounded on
//! `original_source/backend/inference/openai_compat.py`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::RouterError;

use super::{ChatRequest, ChatResponse, ChatStream, DiscoveredModel, InferenceBackend};

/// Parses an OpenAI-style `text/event-stream` body into content deltas.
/// Each `data: {...}` line carries one `choices[0].delta.content`
/// fragment; the stream ends at a literal `data: [DONE]` line.
fn sse_content_stream(resp: reqwest::Response) -> ChatStream {
    #[derive(Deserialize)]
    struct Delta {
        #[serde(default)]
        content: Option<String>,
    }
    #[derive(Deserialize)]
    struct StreamChoice {
        delta: Delta,
    }
    #[derive(Deserialize)]
    struct StreamChunk {
        choices: Vec<StreamChoice>,
    }

    let byte_stream = resp.bytes_stream();
    let parsed = byte_stream
        .map(|chunk| chunk.map_err(RouterError::from))
        .flat_map(|chunk| {
            let lines: Vec<Result<String, RouterError>> = match chunk {
                Ok(bytes) => String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(|l| Ok(l.to_string()))
                    .collect(),
                Err(err) => vec![Err(err)],
            };
            futures_util::stream::iter(lines)
        })
        .filter_map(|line| async move {
            let line = match line {
                Ok(l) => l,
                Err(err) => return Some(Err(err)),
            };
            let data = line.strip_prefix("data:")?.trim();
            if data == "[DONE]" {
                return None;
            }
            match serde_json::from_str::<StreamChunk>(data) {
                Ok(parsed) => parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .map(Ok),
                Err(err) => Some(Err(RouterError::MalformedResponse(err.to_string()))),
            }
        });

    Box::pin(parsed)
}

pub struct OpenAiCompatBackend {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_models_from(&self, path: &str) -> Result<Vec<DiscoveredModel>, RouterError> {
        #[derive(Deserialize)]
        struct ModelsResponse {
            data: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        struct ModelEntry {
            id: String,
        }

        let url = format!("{}{}", self.endpoint, path);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: ModelsResponse = resp.json().await?;
        Ok(parsed.data.into_iter().map(|m| DiscoveredModel { id: m.id }).collect())
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// LM Studio exposes `/api/v1/models` in addition to the standard
    /// `/v1/models`; prefer it, falling back on the standard path.
    async fn discover_models(&self) -> Result<Vec<DiscoveredModel>, RouterError> {
        match self.get_models_from("/api/v1/models").await {
            Ok(models) => Ok(models),
            Err(_) => self.get_models_from("/v1/models").await,
        }
    }

    async fn call_llm(&self, req: &ChatRequest) -> Result<ChatResponse, RouterError> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }
        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: Option<u32>,
            completion_tokens: Option<u32>,
        }
        #[derive(Deserialize)]
        struct CompletionResponse {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }

        let body = Body {
            model: &req.model_id,
            messages: req
                .messages
                .iter()
                .map(|m| Message {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: CompletionResponse = resp.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::MalformedResponse("no choices in completion response".into()))?;

        Ok(ChatResponse {
            content: choice.message.content,
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }

    async fn call_llm_stream(&self, req: &ChatRequest) -> Result<ChatStream, RouterError> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            stream: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
            #[serde(skip_serializing_if = "Option::is_none")]
            temperature: Option<f32>,
        }

        let body = Body {
            model: &req.model_id,
            messages: req
                .messages
                .iter()
                .map(|m| Message {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            stream: true,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(RouterError::UpstreamError {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(sse_content_stream(resp))
    }

    async fn embed(&self, model_id: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, RouterError> {
        #[derive(Deserialize)]
        struct EmbeddingEntry {
            index: usize,
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingEntry>,
        }

        let url = format!("{}/v1/embeddings", self.endpoint);
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
        let mut parsed: EmbeddingResponse = resp.json().await?;
        parsed.data.sort_by_key(|e| e.index);
        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }

    /// Advisory only — not every OpenAI-compatible server supports explicit
    /// load/unload. LM Studio does, via these non-standard endpoints.
    async fn load_model(&self, model_id: &str) -> Result<(), RouterError> {
        let url = format!("{}/api/v1/models/load", self.endpoint);
        let _ = self.client.post(&url).json(&json!({ "model": model_id })).send().await;
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), RouterError> {
        let url = format!("{}/api/v1/models/unload", self.endpoint);
        let _ = self.client.post(&url).json(&json!({ "model": model_id })).send().await;
        Ok(())
    }
}
