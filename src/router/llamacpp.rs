//! Backend adapter for `llama.cpp`'s `server` binary, which speaks a subset
//! of the OpenAI chat-completions API plus its own `/v1/models` lifecycle
//! extensions. Grounded the same way as
//! `original_source/backend/inference/openai_compat.py` — llama.cpp's
//! server was added to the original's backend registry after the indexed
//! snapshot, so this adapter is enriched from that sibling module rather
//! than a dedicated Python file.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::RouterError;

use super::{ChatRequest, ChatResponse, ChatStream, DiscoveredModel, InferenceBackend};

/// llama.cpp's server speaks the same `text/event-stream` chat-completions
/// framing as an OpenAI-compatible one; this mirrors
/// `openai_compat::sse_content_stream` rather than sharing it, since each
/// backend adapter owns its wire parsing independently.
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

    let parsed = resp
        .bytes_stream()
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

pub struct LlamaCppBackend {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl LlamaCppBackend {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InferenceBackend for LlamaCppBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover_models(&self) -> Result<Vec<DiscoveredModel>, RouterError> {
        #[derive(Deserialize)]
        struct ModelsResponse {
            data: Vec<ModelEntry>,
        }
        #[derive(Deserialize)]
        struct ModelEntry {
            id: String,
        }

        let url = format!("{}/v1/models", self.endpoint);
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
        struct CompletionResponse {
            choices: Vec<Choice>,
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
            prompt_tokens: None,
            completion_tokens: None,
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

    async fn embed(&self, _model_id: &str, _inputs: &[String]) -> Result<Vec<Vec<f32>>, RouterError> {
        Err(RouterError::MalformedResponse(
            "llama.cpp backend does not support embeddings in this deployment".into(),
        ))
    }

    /// llama.cpp's server is single-model-per-process; there is no
    /// in-process load/unload to perform.
    async fn load_model(&self, _model_id: &str) -> Result<(), RouterError> {
        Ok(())
    }

    async fn unload_model(&self, _model_id: &str) -> Result<(), RouterError> {
        Ok(())
    }
}
