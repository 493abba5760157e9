//! Ollama client backing the language-model proposer.
//!
//! The model is only asked for the next action. Search, description and query
//! execution always go through the graph store.

use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the LLM subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("Ollama is not available at {url}")]
    #[diagnostic(
        code(brick::llm::unavailable),
        help("Start Ollama with `ollama serve`, or drop `--llm` to use the keyword proposer.")
    )]
    Unavailable { url: String },

    #[error("Ollama request failed: {message}")]
    #[diagnostic(
        code(brick::llm::request_failed),
        help("Check that Ollama is running and the model is pulled.")
    )]
    RequestFailed { message: String },

    #[error("Failed to parse Ollama response: {message}")]
    #[diagnostic(
        code(brick::llm::parse_error),
        help("The model returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("Ollama request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(brick::llm::timeout),
        help("Increase `llm.timeout_secs` or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },
}

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 120,
            temperature: 0.1,
        }
    }
}

/// Time allowed for the `/api/tags` availability check.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Client for the Ollama REST API.
pub struct OllamaClient {
    config: OllamaConfig,
    agent: ureq::Agent,
    available: bool,
    /// Models pulled locally, as listed by the last successful probe.
    models: Vec<String>,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            config,
            agent,
            available: false,
            models: Vec::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Check that the server answers and record which models it has.
    pub fn probe(&mut self) -> bool {
        let listed = self
            .agent
            .get(&self.endpoint("tags"))
            .timeout(PROBE_TIMEOUT)
            .call()
            .map_err(|e| e.to_string())
            .and_then(|resp| resp.into_json::<TagsResponse>().map_err(|e| e.to_string()));

        match listed {
            Ok(tags) => {
                self.available = true;
                self.models = tags.models.into_iter().map(|m| m.name).collect();
                tracing::debug!(url = %self.config.base_url, models = self.models.len(), "ollama reachable");
            }
            Err(error) => {
                tracing::debug!(url = %self.config.base_url, %error, "ollama probe failed");
                self.available = false;
                self.models.clear();
            }
        }
        self.available
    }

    /// Whether the configured model is pulled, with or without a `:tag`.
    pub fn has_model(&self) -> bool {
        let wanted = self.config.model.as_str();
        self.models
            .iter()
            .any(|m| m == wanted || m.split_once(':').is_some_and(|(base, _)| base == wanted))
    }

    /// Whether the server answered the last probe.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// One non-streaming completion of `prompt`.
    pub fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        if !self.available {
            return Err(LlmError::Unavailable {
                url: self.config.base_url.clone(),
            });
        }

        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            system,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };
        let resp = self
            .agent
            .post(&self.endpoint("generate"))
            .send_json(&request)
            .map_err(|e| self.request_error(e))?;

        let reply: GenerateResponse = resp.into_json().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;
        Ok(reply.response)
    }

    fn request_error(&self, error: ureq::Error) -> LlmError {
        match error {
            ureq::Error::Transport(t) if t.kind() == ureq::ErrorKind::Io => LlmError::Timeout {
                timeout_secs: self.config.timeout_secs,
            },
            other => LlmError::RequestFailed {
                message: other.to_string(),
            },
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("available", &self.available)
            .finish()
    }
}
