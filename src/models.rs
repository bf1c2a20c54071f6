use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::GatewayConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A validated generation request. Built once per inbound call and never mutated.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: String,
    pub prompt: String,
    pub model: String,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub passthrough: Map<String, Value>,
}

impl GenerateBody {
    pub fn into_request(self, config: &GatewayConfig) -> Result<GenerationRequest, String> {
        let prompt = match self.prompt {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => return Err("prompt is required and must be a non-empty string".to_owned()),
        };
        GenerationRequest::build(prompt, self.model, self.options, config)
    }
}

impl ChatBody {
    pub fn into_request(self, config: &GatewayConfig) -> Result<GenerationRequest, String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_owned());
        }

        let prompt = self
            .messages
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect::<Vec<_>>()
            .join("\n");
        GenerationRequest::build(prompt, self.model, self.options, config)
    }
}

impl GenerationRequest {
    fn build(
        prompt: String,
        model: Option<String>,
        options: RequestOptions,
        config: &GatewayConfig,
    ) -> Result<Self, String> {
        if let Some(temperature) = options.temperature {
            if !temperature.is_finite() || temperature < 0.0 {
                return Err("options.temperature must be a non-negative number".to_owned());
            }
        }
        if options.max_tokens == Some(0) {
            return Err("options.maxTokens must be a positive integer".to_owned());
        }

        let model = model
            .map(|model| model.trim().to_owned())
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| config.default_model.clone());

        Ok(Self {
            request_id: format!("req_{}", Uuid::new_v4()),
            prompt,
            model,
            options: GenerationOptions {
                temperature: options.temperature.unwrap_or(config.default_temperature),
                max_tokens: options.max_tokens.unwrap_or(config.default_max_tokens),
                passthrough: options.extra,
            },
        })
    }

    /// JSON body for the backend's generate endpoint.
    pub fn backend_payload(&self, stream: bool) -> Value {
        let mut options = Map::new();
        options.insert("temperature".to_owned(), Value::from(self.options.temperature));
        options.insert("max_tokens".to_owned(), Value::from(self.options.max_tokens));
        for (key, value) in &self.options.passthrough {
            if key == "stream" {
                continue;
            }
            options.insert(key.clone(), value.clone());
        }

        serde_json::json!({
            "model": self.model,
            "prompt": self.prompt,
            "stream": stream,
            "options": options,
        })
    }
}

/// One decoded increment of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub done: bool,
}

/// The single terminal result of a relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { full_text: String },
    ClientDisconnected,
    BackendError { message: String },
    MalformedUpstream { message: String },
}

impl StreamOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed { .. } => "completed",
            StreamOutcome::ClientDisconnected => "client_disconnected",
            StreamOutcome::BackendError { .. } => "backend_error",
            StreamOutcome::MalformedUpstream { .. } => "malformed_upstream",
        }
    }
}

/// Result of a non-streaming generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: Option<String>,
    pub done: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            count: None,
        }
    }

    pub fn counted(data: T, count: usize) -> Self {
        Self {
            success: true,
            data,
            count: Some(count),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateData {
    pub text: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub role: &'static str,
    pub content: String,
    pub model: String,
}
