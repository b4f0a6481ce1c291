//! Adapter configuration.

use std::time::Duration;

use crate::error::{GenAiError, GenAiResult};

/// Endpoint families on the external job system.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Text-to-image with no identity reference
    pub image: String,
    /// Text-to-image with LoRA weights
    pub lora_image: String,
    /// Fast general face-reference model
    pub face_reference: String,
    /// Text-to-speech
    pub audio: String,
    /// LoRA training
    pub training: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            image: "fal-ai/flux/dev".to_string(),
            lora_image: "fal-ai/flux-lora".to_string(),
            face_reference: "fal-ai/flux-pulid".to_string(),
            audio: "fal-ai/kokoro/american-english".to_string(),
            training: "fal-ai/flux-lora-fast-training".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenAiConfig {
    pub api_key: String,
    /// Base URL for async queue submissions
    pub queue_url: String,
    /// Base URL for synchronous calls
    pub sync_url: String,
    pub endpoints: Endpoints,
    pub request_timeout: Duration,
    pub sync_timeout: Duration,

    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub script_model: String,
    pub script_fallback_model: String,
}

impl GenAiConfig {
    /// Load from environment variables.
    ///
    /// `GENAI_API_KEY` is required; everything else has a default.
    pub fn from_env() -> GenAiResult<Self> {
        let api_key = std::env::var("GENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GenAiError::config("GENAI_API_KEY not set"))?;

        let defaults = Endpoints::default();
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                std::env::var(key)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        };

        Ok(Self {
            api_key,
            queue_url: var("GENAI_QUEUE_URL", "https://queue.fal.run"),
            sync_url: var("GENAI_SYNC_URL", "https://fal.run"),
            endpoints: Endpoints {
                image: var("GENAI_IMAGE_ENDPOINT", &defaults.image),
                lora_image: var("GENAI_LORA_ENDPOINT", &defaults.lora_image),
                face_reference: var("GENAI_FACE_ENDPOINT", &defaults.face_reference),
                audio: var("GENAI_AUDIO_ENDPOINT", &defaults.audio),
                training: var("GENAI_TRAINING_ENDPOINT", &defaults.training),
            },
            request_timeout: secs("GENAI_REQUEST_TIMEOUT_SECS", 30),
            sync_timeout: secs("GENAI_SYNC_TIMEOUT_SECS", 120),
            gemini_api_key: var("GEMINI_API_KEY", ""),
            gemini_base_url: var(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            script_model: var("SCRIPT_MODEL", "gemini-2.5-flash"),
            script_fallback_model: var("SCRIPT_FALLBACK_MODEL", "gemini-2.5-flash-lite"),
        })
    }

    /// Config pointing every base URL at `base` (tests, local mocks).
    pub fn for_base_url(base: &str) -> Self {
        Self {
            api_key: "test-key".to_string(),
            queue_url: base.to_string(),
            sync_url: base.to_string(),
            endpoints: Endpoints::default(),
            request_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(5),
            gemini_api_key: "test-gemini-key".to_string(),
            gemini_base_url: base.to_string(),
            script_model: "primary-model".to_string(),
            script_fallback_model: "fallback-model".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_requires_api_key() {
        std::env::remove_var("GENAI_API_KEY");
        assert!(GenAiConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::set_var("GENAI_API_KEY", "k");
        std::env::remove_var("SCRIPT_MODEL");
        std::env::remove_var("GENAI_QUEUE_URL");
        let config = GenAiConfig::from_env().unwrap();
        assert_eq!(config.queue_url, "https://queue.fal.run");
        assert_eq!(config.script_model, "gemini-2.5-flash");
        assert_eq!(config.endpoints.training, Endpoints::default().training);
        std::env::remove_var("GENAI_API_KEY");
    }
}
