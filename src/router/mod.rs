//! Inference routing: resolves a model key to a backend and dispatches
//! chat/embedding calls. Grounded on
//! `original_source/backend/inference/router.py`'s `InferenceRouter`.

pub mod llamacpp;
pub mod ollama;
pub mod openai_compat;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, Config};
use crate::error::RouterError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub id: String,
}

/// One incremental chunk of a streamed chat completion, or a terminal
/// transport error — the latter ends the stream.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, RouterError>> + Send>>;

/// One frame of a model pull's progress, as reported by backends that
/// support fetching a model they don't yet have on disk (Ollama's
/// `/api/pull`). `completed`/`total` are byte counts when known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub status: String,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

pub type DownloadStream = Pin<Box<dyn Stream<Item = Result<DownloadProgress, RouterError>> + Send>>;

/// Implemented once per inference server flavor (LM Studio / OpenAI-compatible,
/// Ollama, llama.cpp server). Every call is best-effort advisory for
/// `load_model`/`unload_model` — backends that don't support explicit
/// lifecycle control simply no-op.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn discover_models(&self) -> Result<Vec<DiscoveredModel>, RouterError>;
    async fn call_llm(&self, req: &ChatRequest) -> Result<ChatResponse, RouterError>;
    async fn embed(&self, model_id: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, RouterError>;
    async fn load_model(&self, model_id: &str) -> Result<(), RouterError>;
    async fn unload_model(&self, model_id: &str) -> Result<(), RouterError>;

    /// Stream a chat completion incrementally. The default falls back to
    /// a single non-streamed call and yields its whole content as one
    /// chunk, so backends that haven't implemented native streaming still
    /// work behind the same interface.
    async fn call_llm_stream(&self, req: &ChatRequest) -> Result<ChatStream, RouterError> {
        let resp = self.call_llm(req).await?;
        Ok(Box::pin(stream::once(async move { Ok(resp.content) })))
    }

    /// Fetch a model the backend doesn't have locally yet, reporting
    /// progress as it downloads. Most backends have no such concept —
    /// the default rejects with [`RouterError::Unsupported`].
    async fn download_model(&self, model_id: &str) -> Result<DownloadStream, RouterError> {
        let _ = model_id;
        Err(RouterError::Unsupported("download_model".to_string()))
    }
}

struct ResolvedModel {
    backend: String,
    model_id: String,
}

/// Resolves model keys declared in configuration to a `(backend, model_id)`
/// pair and dispatches to the matching `InferenceBackend`. Also accepts a
/// raw backend model id directly, falling back to the configured default
/// backend, mirroring the Python router's `_resolve()` behavior.
pub struct InferenceRouter {
    backends: HashMap<String, Arc<dyn InferenceBackend>>,
    model_map: HashMap<String, ResolvedModel>,
    default_backend: String,
}

impl InferenceRouter {
    pub fn new(config: &Config, backends: Vec<Arc<dyn InferenceBackend>>) -> Result<Self, RouterError> {
        let backend_map: HashMap<String, Arc<dyn InferenceBackend>> =
            backends.into_iter().map(|b| (b.name().to_string(), b)).collect();

        let mut model_map = HashMap::new();
        for (key, model) in &config.inference.models {
            model_map.insert(
                key.clone(),
                ResolvedModel {
                    backend: model.backend.clone(),
                    model_id: model.model_id.clone(),
                },
            );
        }

        let default_backend = config
            .inference
            .models
            .get(&config.inference.default_model)
            .map(|m| m.backend.clone())
            .unwrap_or_else(|| {
                config
                    .inference
                    .backends
                    .first()
                    .map(|b| b.name.clone())
                    .unwrap_or_default()
            });

        Ok(Self {
            backends: backend_map,
            model_map,
            default_backend,
        })
    }

    /// Resolve a model key (as declared in config) or a raw model id to the
    /// backend that should handle it, and the id that backend expects.
    fn resolve(&self, requested: &str) -> Result<(&Arc<dyn InferenceBackend>, String), RouterError> {
        if let Some(resolved) = self.model_map.get(requested) {
            let backend = self
                .backends
                .get(&resolved.backend)
                .ok_or_else(|| RouterError::UnknownBackend(resolved.backend.clone()))?;
            return Ok((backend, resolved.model_id.clone()));
        }

        let backend = self
            .backends
            .get(&self.default_backend)
            .ok_or_else(|| RouterError::UnknownBackend(self.default_backend.clone()))?;
        Ok((backend, requested.to_string()))
    }

    pub async fn call_llm(&self, model_key: &str, mut req: ChatRequest) -> Result<ChatResponse, RouterError> {
        let (backend, model_id) = self.resolve(model_key)?;
        req.model_id = model_id;
        backend.call_llm(&req).await
    }

    pub async fn embed(&self, model_key: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, RouterError> {
        let (backend, model_id) = self.resolve(model_key)?;
        backend.embed(&model_id, inputs).await
    }

    pub async fn load_model(&self, model_key: &str) -> Result<(), RouterError> {
        let (backend, model_id) = self.resolve(model_key)?;
        backend.load_model(&model_id).await
    }

    pub async fn unload_model(&self, model_key: &str) -> Result<(), RouterError> {
        let (backend, model_id) = self.resolve(model_key)?;
        backend.unload_model(&model_id).await
    }

    pub async fn discover_models(&self, backend_name: &str) -> Result<Vec<DiscoveredModel>, RouterError> {
        let backend = self
            .backends
            .get(backend_name)
            .ok_or_else(|| RouterError::UnknownBackend(backend_name.to_string()))?;
        backend.discover_models().await
    }

    pub async fn call_llm_stream(&self, model_key: &str, mut req: ChatRequest) -> Result<ChatStream, RouterError> {
        let (backend, model_id) = self.resolve(model_key)?;
        req.model_id = model_id;
        backend.call_llm_stream(&req).await
    }

    /// Downloads are addressed by backend name directly rather than a
    /// configured model key, since the model being fetched is by
    /// definition not yet in `model_map`.
    pub async fn download_model(&self, backend_name: &str, model_id: &str) -> Result<DownloadStream, RouterError> {
        let backend = self
            .backends
            .get(backend_name)
            .ok_or_else(|| RouterError::UnknownBackend(backend_name.to_string()))?;
        backend.download_model(model_id).await
    }
}

pub fn backend_kind_label(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::OpenAiCompat => "open_ai_compat",
        BackendKind::Ollama => "ollama",
        BackendKind::LlamaCpp => "llama_cpp",
    }
}
