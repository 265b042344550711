use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, stream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::ChatMessage;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send + 'static>>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request to Ollama failed: {0}. Make sure Ollama is running with: ollama serve")]
    Transport(String),
    #[error("Ollama returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response stream: {0}")]
    MalformedStream(String),
    #[error("unexpected response from Ollama: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// The two calls the playground needs from a model server
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, ChatError>;

    /// Streamed completion over the full message history
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, ChatError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct OllamaModel {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }

        let models_response: OllamaModelsResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .filter_map(|m| m.model.or(m.name))
            .collect();

        Ok(model_names)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, ChatError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model,
            messages,
            stream: true,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }

        let tokens = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, chunk| {
                let items = match chunk {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(e) => vec![Err(ChatError::Transport(e.to_string()))],
                };
                future::ready(Some(stream::iter(items)))
            })
            .flatten();

        Ok(Box::pin(tokens))
    }
}

/// Incremental decoder for `data:` lines of an OpenAI-style event stream.
/// Chunks can end mid-line or mid-character, so raw bytes are buffered and
/// only complete lines are decoded.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, ChatError>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim_end_matches(['\r', '\n']),
                Err(e) => {
                    out.push(Err(ChatError::MalformedStream(e.to_string())));
                    continue;
                }
            };

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();

            if data == "[DONE]" {
                self.done = true;
                self.buffer.clear();
                break;
            }

            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    if let Some(error) = chunk.error {
                        out.push(Err(ChatError::Api {
                            status: 200,
                            body: error.message,
                        }));
                        continue;
                    }
                    if let Some(content) = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                    {
                        if !content.is_empty() {
                            out.push(Ok(content));
                        }
                    }
                }
                Err(e) => out.push(Err(ChatError::MalformedStream(e.to_string()))),
            }
        }

        out
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}
