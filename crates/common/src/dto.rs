use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use crate::error::{Error, Result};

// Constants for validation
const MAX_PROMPT_CHARS: usize = 100_000;
const MIN_LENGTH: usize = 1;

/// Terminal marker sent to a client once its stream is complete
pub const DONE_MARKER: &str = "[DONE]";

/// Prefix of an in-band error frame
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Opaque identifier naming one logical destination connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Arc<str>);

impl ClientId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl Serialize for ClientId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(ClientId::from)
    }
}

/// One unit of generated output or control signal flowing through a fragment channel.
///
/// Within one channel, any number of `Text` and `Error` values precede exactly one
/// `Stop`, and nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Error(String),
    Stop,
}

impl Fragment {
    pub fn is_stop(&self) -> bool {
        matches!(self, Fragment::Stop)
    }

    /// Plain-text frame delivered to the client for this fragment
    pub fn wire_text(&self) -> String {
        match self {
            Fragment::Text(content) => content.clone(),
            Fragment::Error(message) => format!("{ERROR_PREFIX}{message}"),
            Fragment::Stop => DONE_MARKER.to_string(),
        }
    }
}

/// A single generation job. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub client_id: ClientId,
    pub prompt: String,
    pub max_length: usize,
}

/// Validate a requested output length against the configured limit
pub fn validate_max_length(max_length: usize, limit: usize) -> Result<usize> {
    if max_length < MIN_LENGTH || max_length > limit {
        return Err(Error::BadRequest(format!(
            "max_length must be between {} and {}",
            MIN_LENGTH, limit
        )));
    }
    Ok(max_length)
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(Error::ValidationFailed("prompt is required".into()));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(Error::ValidationFailed(format!(
            "prompt too long (max {} chars)",
            MAX_PROMPT_CHARS
        )));
    }
    Ok(())
}

/// Inbound submission from the HTTP front door
#[derive(Debug, Clone, Deserialize)]
pub struct DataItem {
    pub client_id: String,
    #[serde(alias = "prompt")]
    pub summary: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl DataItem {
    /// Text handed to the model for this item
    pub fn prompt_text(&self) -> String {
        match self.url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => format!("summary: {} URL: {}", self.summary, url),
            None => format!("summary: {}", self.summary),
        }
    }

    /// Validate and turn the item into a generation request
    pub fn into_request(self, default_max_length: usize, limit: usize) -> Result<GenerationRequest> {
        if self.client_id.trim().is_empty() {
            return Err(Error::BadRequest("client_id cannot be empty".into()));
        }
        validate_prompt(&self.summary)?;
        let max_length = validate_max_length(self.max_length.unwrap_or(default_max_length), limit)?;

        Ok(GenerationRequest {
            prompt: self.prompt_text(),
            client_id: ClientId::from(self.client_id),
            max_length,
        })
    }
}

/// Batch of inbound submissions
#[derive(Debug, Clone, Deserialize)]
pub struct DataPayload {
    pub items: Vec<DataItem>,
}

/// Raw control message received over a client's persistent connection
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    pub action: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

/// Parsed control action
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Generate {
        prompt: String,
        max_length: Option<usize>,
    },
}

impl ControlMessage {
    /// Parse and validate a text frame from the client
    pub fn parse(text: &str) -> Result<ControlAction> {
        let message: ControlMessage = serde_json::from_str(text)
            .map_err(|e| Error::BadRequest(format!("invalid control message: {}", e)))?;

        match message.action.as_str() {
            "generate" => {
                let prompt = message.prompt.unwrap_or_default();
                validate_prompt(&prompt)?;
                Ok(ControlAction::Generate {
                    prompt,
                    max_length: message.max_length,
                })
            }
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

/// Outcome reported to the submitter of a generation request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Accepted,
    Skipped,
}

/// Immediate acknowledgement for a submission
#[derive(Debug, Clone, Serialize)]
pub struct DispatchAck {
    pub status: DispatchStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

impl DispatchAck {
    pub fn accepted(stream_id: String) -> Self {
        Self {
            status: DispatchStatus::Accepted,
            message: "Data received and processing started.".to_string(),
            stream_id: Some(stream_id),
        }
    }

    pub fn skipped(client_id: &ClientId) -> Self {
        Self {
            status: DispatchStatus::Skipped,
            message: format!("Client {} is not connected; processing skipped.", client_id),
            stream_id: None,
        }
    }
}

/// Acknowledgement for a batch submission
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchAck {
    pub accepted: usize,
    pub skipped: usize,
    pub stream_ids: Vec<String>,
}

/// Message pushed to every connected client
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastAck {
    pub delivered: usize,
    pub dropped: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub connected_clients: usize,
    pub active_streams: usize,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health status enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but the generation backend did not answer its health check
    Degraded,
}
