use crate::{template_engine::TemplateEngine, Generator};
use ctxstream_common::{Error, Result};
use ctxstream_config::GenerationConfig;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use tokio::runtime::Handle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: usize,
    temperature: f32,
    top_p: f32,
    stop: &'a [String],
    stream: bool,
}

#[derive(Deserialize, Debug, PartialEq)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

/// Generator backed by a running llama.cpp server.
///
/// The blocking `generate` call drives the server's streamed `/completion` response
/// on the shared async runtime from the worker thread, so it must only be invoked
/// from a blocking thread of that runtime.
pub struct LlamaServerGenerator {
    client: Client,
    server_url: String,
    temperature: f32,
    top_p: f32,
    stop_sequences: Vec<String>,
    runtime: Handle,
}

impl LlamaServerGenerator {
    pub fn new(config: &GenerationConfig, stop_sequences: Vec<String>, runtime: Handle) -> Result<Self> {
        let client = Client::builder()
            .read_timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            server_url: config.backend_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            top_p: config.top_p,
            stop_sequences,
            runtime,
        })
    }

    /// Whether the llama.cpp server answers its health probe
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.server_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn stream_completion(
        &self,
        prompt: &str,
        max_length: usize,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()> {
        let request = CompletionRequest {
            prompt,
            n_predict: max_length,
            temperature: self.temperature,
            top_p: self.top_p,
            stop: &self.stop_sequences,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/completion", self.server_url))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Generation(format!("Server error: {}", response.status())));
        }

        let mut bytes_stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut token_count = 0usize;

        while let Some(chunk_result) = bytes_stream.next().await {
            let bytes = chunk_result.map_err(|e| Error::Generation(format!("Stream error: {}", e)))?;
            buffer.extend_from_slice(&bytes);

            // Process complete SSE events as soon as they arrive
            while let Some(newline_pos) = buffer.windows(2).position(|w| w == b"\n\n") {
                let event_bytes = buffer.drain(..newline_pos + 2).collect::<Vec<_>>();
                let event = String::from_utf8_lossy(&event_bytes);

                for line in event.lines() {
                    let Some(chunk) = parse_data_line(line).transpose()? else {
                        continue;
                    };

                    let content = TemplateEngine::strip_markers(&chunk.content);
                    if !content.is_empty() {
                        token_count += 1;
                        if on_chunk(&content).is_break() {
                            debug!("Output abandoned after {} chunks, closing backend stream", token_count);
                            return Ok(());
                        }
                    }

                    if chunk.stop {
                        debug!("Generation complete, {} chunks", token_count);
                        return Ok(());
                    }
                }
            }
        }

        warn!("Backend stream ended before its stop chunk");
        Err(Error::Generation("backend stream ended unexpectedly".into()))
    }
}

impl Generator for LlamaServerGenerator {
    fn generate(
        &self,
        prompt: &str,
        max_length: usize,
        on_chunk: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<()> {
        info!("Starting blocking generation against {}", self.server_url);
        self.runtime
            .block_on(self.stream_completion(prompt, max_length, on_chunk))
    }

    fn name(&self) -> &str {
        "llama-server"
    }
}

/// Parse one SSE line. Non-data lines yield `None`.
fn parse_data_line(line: &str) -> Option<Result<CompletionChunk>> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    Some(
        serde_json::from_str::<CompletionChunk>(data)
            .map_err(|e| Error::Generation(format!("malformed stream chunk: {}", e))),
    )
}
