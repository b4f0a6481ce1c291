//! Narration (text-to-speech) adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use story_models::AssetKind;

use crate::error::GenAiResult;
use crate::queue::{QueueClient, SubmittedJob};
use crate::retry::{retry_until, RetryPolicy};

const ADAPTER: &str = "audio";

pub const DEFAULT_VOICE: &str = "af_heart";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

fn default_speed() -> f32 {
    1.0
}

impl AudioRequest {
    pub fn new(text: impl Into<String>, voice: Option<String>) -> Self {
        Self {
            text: text.into(),
            voice,
            speed: default_speed(),
        }
    }

    fn input(&self) -> Value {
        json!({
            "prompt": self.text,
            "voice": self.voice.as_deref().filter(|v| !v.is_empty()).unwrap_or(DEFAULT_VOICE),
            "speed": self.speed,
        })
    }
}

#[async_trait]
pub trait AudioGenerator: Send + Sync {
    async fn submit(&self, request: &AudioRequest, webhook_url: &str) -> GenAiResult<SubmittedJob>;

    /// Synthesize synchronously. Returns an empty string when every attempt fails.
    async fn generate_sync(&self, request: &AudioRequest) -> String;
}

#[derive(Clone)]
pub struct NarrationAdapter {
    queue: QueueClient,
    retry: RetryPolicy,
}

impl NarrationAdapter {
    pub fn new(queue: QueueClient) -> Self {
        Self {
            queue,
            retry: RetryPolicy::standard("audio_generate_sync"),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl AudioGenerator for NarrationAdapter {
    async fn submit(&self, request: &AudioRequest, webhook_url: &str) -> GenAiResult<SubmittedJob> {
        let endpoint = &self.queue.config().endpoints.audio;
        self.queue
            .submit(ADAPTER, endpoint, &request.input(), Some(webhook_url))
            .await
    }

    async fn generate_sync(&self, request: &AudioRequest) -> String {
        if request.text.trim().is_empty() {
            return String::new();
        }

        let input = request.input();
        let input = &input;
        let queue = &self.queue;
        let endpoint = queue.config().endpoints.audio.as_str();

        retry_until(
            &self.retry,
            || async move {
                queue
                    .run_sync(ADAPTER, endpoint, input)
                    .await
                    .map(|payload| AssetKind::Audio.extract_url(&payload).unwrap_or_default())
            },
            |url: &String| !url.is_empty(),
        )
        .await
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::GenAiConfig;

    fn adapter(server: &MockServer) -> NarrationAdapter {
        let queue = QueueClient::new(GenAiConfig::for_base_url(&server.uri())).unwrap();
        NarrationAdapter::new(queue)
            .with_retry_policy(RetryPolicy::standard("audio").with_delays(vec![Duration::from_millis(1); 3]))
    }

    #[tokio::test]
    async fn test_generate_sync_uses_default_voice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/kokoro/american-english"))
            .and(body_partial_json(json!({"voice": DEFAULT_VOICE})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audio": {"url": "https://cdn.example/page1.mp3"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = adapter(&server)
            .generate_sync(&AudioRequest::new("Once upon a time.", None))
            .await;
        assert_eq!(url, "https://cdn.example/page1.mp3");
    }

    #[tokio::test]
    async fn test_blank_text_skips_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let url = adapter(&server).generate_sync(&AudioRequest::new("   ", None)).await;
        assert!(url.is_empty());
    }

    #[tokio::test]
    async fn test_generate_sync_recovers_after_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "audio_url": "https://cdn.example/page2.mp3"
            })))
            .mount(&server)
            .await;

        let url = adapter(&server)
            .generate_sync(&AudioRequest::new("The end.", Some("bf_emma".to_string())))
            .await;
        assert_eq!(url, "https://cdn.example/page2.mp3");
    }
}
