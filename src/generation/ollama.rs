//! Ollama HTTP client for local model inference.
//!
//! All calls go through `/api/generate` with `stream: false`. The interesting
//! part is failure classification: Ollama reports a blown context window as a
//! 500 whose body mentions the context length, which must be distinguished
//! from ordinary capacity failures so the fallback executor can split work
//! units instead of uselessly retrying.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::types::{GenerationClient, GenerationRequest};
use super::GenerationError;
use crate::config::GenerationOptions;

/// Substrings in a 500 body that identify a context-window overflow.
const OVERFLOW_MARKERS: &[&str] = &["context length", "context window", "token limit", "tokens exceed"];

/// Blocking HTTP client for an Ollama-style generation endpoint.
pub struct OllamaClient {
    base_url: String,
    model: String,
    options: GenerationOptions,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, options: GenerationOptions, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            options,
            client,
            timeout_secs,
        }
    }

    /// Default local Ollama instance with a 5-minute timeout.
    pub fn default_local(model: &str) -> Self {
        Self::new(
            "http://localhost:11434",
            model,
            GenerationOptions::default(),
            300,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn classify_send_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            GenerationError::Connection(self.base_url.clone())
        } else {
            GenerationError::Fatal(e.to_string())
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
    num_ctx: u32,
}

impl From<&GenerationOptions> for OllamaOptions {
    fn from(o: &GenerationOptions) -> Self {
        Self {
            temperature: o.temperature,
            top_p: o.top_p,
            top_k: o.top_k,
            num_predict: o.max_output_tokens,
            num_ctx: o.context_window,
        }
    }
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

fn is_overflow_body(body: &str) -> bool {
    let lower = body.to_lowercase();
    OVERFLOW_MARKERS.iter().any(|m| lower.contains(m))
}

impl GenerationClient for OllamaClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            images: request.images.iter().map(|b| BASE64.encode(b)).collect(),
            options: (&self.options).into(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            let parsed: OllamaGenerateResponse = response
                .json()
                .map_err(|e| GenerationError::Malformed(e.to_string()))?;
            let text = parsed.response.trim().to_string();
            if text.is_empty() {
                return Err(GenerationError::Malformed("empty response".into()));
            }
            return Ok(text);
        }

        let detail = response.text().unwrap_or_default();
        if status.as_u16() == 500 && is_overflow_body(&detail) {
            return Err(GenerationError::ContextOverflow(truncate(&detail, 200)));
        }
        if status.is_server_error() {
            return Err(GenerationError::Transient {
                status: status.as_u16(),
                detail: truncate(&detail, 200),
            });
        }
        Err(GenerationError::Fatal(format!(
            "unexpected status {status}: {}",
            truncate(&detail, 200)
        )))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Mock client for testing: returns configured responses in order, then
/// repeats the last one. Records every prompt it sees.
pub struct MockGenerationClient {
    responses: std::sync::Mutex<Vec<String>>,
    cursor: std::sync::Mutex<usize>,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl MockGenerationClient {
    pub fn new(response: &str) -> Self {
        Self::with_responses(vec![response.to_string()])
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            cursor: std::sync::Mutex::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl GenerationClient for MockGenerationClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        let responses = self
            .responses
            .lock()
            .map_err(|_| GenerationError::Fatal("mock lock poisoned".into()))?;
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| GenerationError::Fatal("mock lock poisoned".into()))?;
        let idx = (*cursor).min(responses.len().saturating_sub(1));
        *cursor += 1;
        responses
            .get(idx)
            .cloned()
            .ok_or_else(|| GenerationError::Malformed("mock has no responses".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = OllamaClient::new(
            "http://localhost:11434/",
            "gemma3:12b",
            GenerationOptions::default(),
            60,
        );
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), "gemma3:12b");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let client = OllamaClient::default_local("gemma3:12b");
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.timeout_secs, 300);
    }

    #[test]
    fn overflow_bodies_recognized() {
        assert!(is_overflow_body("error: context length exceeded"));
        assert!(is_overflow_body("requested Tokens Exceed the limit"));
        assert!(!is_overflow_body("out of memory"));
    }

    #[test]
    fn request_serializes_options_and_skips_empty_images() {
        let body = OllamaGenerateRequest {
            model: "gemma3:12b",
            prompt: "hello",
            system: None,
            stream: false,
            images: Vec::new(),
            options: (&GenerationOptions::default()).into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"num_ctx\":16000"));
        assert!(json.contains("\"num_predict\":8192"));
        assert!(!json.contains("\"images\""));
        assert!(!json.contains("\"system\""));
    }

    #[test]
    fn request_encodes_images_as_base64() {
        let body = OllamaGenerateRequest {
            model: "gemma3:12b",
            prompt: "describe",
            system: None,
            stream: false,
            images: vec![BASE64.encode([0u8, 1, 2])],
            options: (&GenerationOptions::default()).into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"images\":[\"AAEC\"]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ąęó documentation";
        let t = truncate(s, 3);
        assert!(t.len() <= 3);
        assert!(s.starts_with(&t));
    }

    #[test]
    fn mock_replays_responses_then_repeats_last() {
        let mock = MockGenerationClient::with_responses(vec!["one".into(), "two".into()]);
        let req = GenerationRequest::text("p");
        assert_eq!(mock.generate(&req).unwrap(), "one");
        assert_eq!(mock.generate(&req).unwrap(), "two");
        assert_eq!(mock.generate(&req).unwrap(), "two");
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn mock_records_prompts() {
        let mock = MockGenerationClient::new("ok");
        mock.generate(&GenerationRequest::text("first")).unwrap();
        mock.generate(&GenerationRequest::text("second")).unwrap();
        assert_eq!(mock.prompts(), vec!["first", "second"]);
    }
}
