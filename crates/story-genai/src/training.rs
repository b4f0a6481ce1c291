//! LoRA training adapter.
//!
//! Training runs for minutes, so it is only ever submitted asynchronously;
//! completion arrives on the training webhook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{GenAiError, GenAiResult};
use crate::queue::{QueueClient, SubmittedJob};

const ADAPTER: &str = "training";

pub const DEFAULT_TRAINING_STEPS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Zip archive of reference photos
    pub images_data_url: String,
    pub trigger_word: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
}

fn default_steps() -> u32 {
    DEFAULT_TRAINING_STEPS
}

impl TrainingRequest {
    pub fn new(images_data_url: impl Into<String>, trigger_word: impl Into<String>) -> Self {
        Self {
            images_data_url: images_data_url.into(),
            trigger_word: trigger_word.into(),
            steps: DEFAULT_TRAINING_STEPS,
        }
    }
}

#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn submit_training(&self, request: &TrainingRequest, webhook_url: &str) -> GenAiResult<SubmittedJob>;
}

#[derive(Clone)]
pub struct LoraTrainingAdapter {
    queue: QueueClient,
}

impl LoraTrainingAdapter {
    pub fn new(queue: QueueClient) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ModelTrainer for LoraTrainingAdapter {
    async fn submit_training(&self, request: &TrainingRequest, webhook_url: &str) -> GenAiResult<SubmittedJob> {
        if request.images_data_url.trim().is_empty() {
            return Err(GenAiError::config("training images URL is empty"));
        }

        let input = json!({
            "images_data_url": request.images_data_url,
            "trigger_word": request.trigger_word,
            "steps": request.steps,
            "create_masks": true,
        });

        self.queue
            .submit(ADAPTER, &self.queue.config().endpoints.training, &input, Some(webhook_url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::GenAiConfig;

    #[tokio::test]
    async fn test_submit_training() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/flux-lora-fast-training"))
            .and(body_partial_json(json!({"trigger_word": "sks", "steps": 1000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "train-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = LoraTrainingAdapter::new(QueueClient::new(GenAiConfig::for_base_url(&server.uri())).unwrap());
        let job = adapter
            .submit_training(
                &TrainingRequest::new("https://cdn.example/photos.zip", "sks"),
                "https://api.example/webhooks/model/training",
            )
            .await
            .unwrap();
        assert_eq!(job.job_id.as_str(), "train-1");
    }

    #[tokio::test]
    async fn test_empty_images_rejected() {
        let server = MockServer::start().await;
        let adapter = LoraTrainingAdapter::new(QueueClient::new(GenAiConfig::for_base_url(&server.uri())).unwrap());
        let result = adapter
            .submit_training(&TrainingRequest::new(" ", "sks"), "https://api.example/hook")
            .await;
        assert!(result.is_err());
    }
}
