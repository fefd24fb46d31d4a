//! Text generation collaborator.
//!
//! The kernel never talks to a model directly. `generate-content-then-write` hands a
//! prompt to whatever [`TextGenerator`] the caller supplies and stores the
//! returned text verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request for generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_output_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens: 500,
            temperature: 0.7,
        }
    }

    /// Set max output tokens.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Generated text. Opaque to the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
}

/// Error type for generation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// No generator is configured, or the peer cannot sample.
    #[error("generator not available: {0}")]
    Unavailable(String),

    /// The generator ran and failed.
    #[error("generation failed: {0}")]
    Failed(String),
}

/// Something that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest)
    -> Result<GenerationResponse, GenerationError>;
}

/// Generator for contexts with no generation backend.
#[derive(Debug, Clone, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        Err(GenerationError::Unavailable(
            "no text generator configured".into(),
        ))
    }
}

/// Generator that always answers with the same text.
#[derive(Debug, Clone)]
pub struct FixedGenerator {
    text: String,
}

impl FixedGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        Ok(GenerationResponse {
            text: self.text.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = GenerationRequest::new("write a haiku")
            .with_max_output_tokens(64)
            .with_temperature(0.2);
        assert_eq!(request.prompt, "write a haiku");
        assert_eq!(request.max_output_tokens, 64);
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_request_wire_names() {
        let json = serde_json::to_value(GenerationRequest::new("p")).unwrap();
        assert!(json.get("maxOutputTokens").is_some());
        assert!(json.get("temperature").is_some());
    }

    #[tokio::test]
    async fn test_stock_generators() {
        let err = UnavailableGenerator
            .generate(GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));

        let ok = FixedGenerator::new("hello")
            .generate(GenerationRequest::new("x"))
            .await
            .unwrap();
        assert_eq!(ok.text, "hello");
    }
}
