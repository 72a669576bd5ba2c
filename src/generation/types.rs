//! Request shape and client trait for the generation service.

use super::GenerationError;

/// One generation call: a rendered prompt, an optional system prompt and
/// optional raw image payloads (encoded by the transport).
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub images: Vec<Vec<u8>>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            images: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.images.push(bytes);
        self
    }
}

/// Abstraction over the generation service, so the pipeline is testable
/// against mocks and the transport stays swappable.
pub trait GenerationClient: Send + Sync {
    /// Generate text for the request. The returned string is the raw model
    /// output; parsing is the caller's concern.
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_composes() {
        let req = GenerationRequest::text("describe this")
            .with_system("you are a QA analyst")
            .with_image(vec![1, 2, 3]);
        assert_eq!(req.prompt, "describe this");
        assert_eq!(req.system.as_deref(), Some("you are a QA analyst"));
        assert_eq!(req.images.len(), 1);
    }
}
