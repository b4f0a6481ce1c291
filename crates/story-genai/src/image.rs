//! Face-consistent image generation.
//!
//! Picks one of three backends from the subject's identity reference and
//! builds the matching request body:
//! - LoRA model when trained weights exist
//! - face-reference model when only a reference photo exists
//! - the default text-to-image model otherwise

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use story_models::{AssetKind, IdentityReference};

use crate::error::GenAiResult;
use crate::prompt::ImagePrompt;
use crate::queue::{QueueClient, SubmittedJob};
use crate::retry::{retry_until, RetryPolicy};

const ADAPTER: &str = "image";

/// Image generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceBackend {
    Lora,
    FaceReference,
    Default,
}

impl FaceBackend {
    /// Highest-priority backend the identity supports.
    pub fn select(identity: &IdentityReference) -> Self {
        if identity.lora.is_some() {
            FaceBackend::Lora
        } else if identity.face_image_url.as_deref().is_some_and(|u| !u.is_empty()) {
            FaceBackend::FaceReference
        } else {
            FaceBackend::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaceBackend::Lora => "lora",
            FaceBackend::FaceReference => "face_reference",
            FaceBackend::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: ImagePrompt,
    #[serde(default)]
    pub identity: IdentityReference,
    #[serde(default = "default_image_size")]
    pub image_size: String,
}

fn default_image_size() -> String {
    "landscape_4_3".to_string()
}

impl ImageRequest {
    pub fn new(prompt: ImagePrompt, identity: IdentityReference) -> Self {
        Self {
            prompt,
            identity,
            image_size: default_image_size(),
        }
    }

    pub fn backend(&self) -> FaceBackend {
        FaceBackend::select(&self.identity)
    }
}

/// Image adapter: async submit plus a retried synchronous call.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn submit(&self, request: &ImageRequest, webhook_url: &str) -> GenAiResult<SubmittedJob>;

    /// Generate synchronously. Returns an empty string when every attempt fails.
    async fn generate_sync(&self, request: &ImageRequest) -> String;
}

#[derive(Clone)]
pub struct FaceConsistentImageAdapter {
    queue: QueueClient,
    retry: RetryPolicy,
}

impl FaceConsistentImageAdapter {
    pub fn new(queue: QueueClient) -> Self {
        Self {
            queue,
            retry: RetryPolicy::standard("image_generate_sync"),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, backend: FaceBackend) -> &str {
        let endpoints = &self.queue.config().endpoints;
        match backend {
            FaceBackend::Lora => &endpoints.lora_image,
            FaceBackend::FaceReference => &endpoints.face_reference,
            FaceBackend::Default => &endpoints.image,
        }
    }

    /// Request body for the backend selected by `request.identity`.
    pub fn build_input(request: &ImageRequest) -> Value {
        let mut input = json!({
            "prompt": request.prompt.prompt,
            "image_size": request.image_size,
            "num_images": 1,
            "enable_safety_checker": true,
        });

        if let Some(negative) = &request.prompt.negative_prompt {
            input["negative_prompt"] = json!(negative);
        }

        match request.backend() {
            FaceBackend::Lora => {
                if let Some(lora) = &request.identity.lora {
                    input["loras"] = json!([{ "path": lora.tensor_url, "scale": lora.scale }]);
                }
            }
            FaceBackend::FaceReference => {
                input["reference_image_url"] = json!(request.identity.face_image_url);
                input["id_weight"] = json!(1.0);
            }
            FaceBackend::Default => {}
        }

        input
    }
}

#[async_trait]
impl ImageGenerator for FaceConsistentImageAdapter {
    async fn submit(&self, request: &ImageRequest, webhook_url: &str) -> GenAiResult<SubmittedJob> {
        let backend = request.backend();
        info!(backend = backend.as_str(), "Submitting page image job");
        self.queue
            .submit(ADAPTER, self.endpoint(backend), &Self::build_input(request), Some(webhook_url))
            .await
    }

    async fn generate_sync(&self, request: &ImageRequest) -> String {
        let input = Self::build_input(request);
        let input = &input;
        let queue = &self.queue;
        let endpoint = self.endpoint(request.backend());

        retry_until(
            &self.retry,
            || async move {
                queue
                    .run_sync(ADAPTER, endpoint, input)
                    .await
                    .map(|payload| AssetKind::Image.extract_url(&payload).unwrap_or_default())
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

    use story_models::LoraReference;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::GenAiConfig;
    use crate::prompt::{build_image_prompt, NegativePromptPolicy};

    fn prompt() -> ImagePrompt {
        build_image_prompt(
            "a child reading under a tree",
            story_models::ArtStyle::Watercolor,
            None,
            NegativePromptPolicy::ChildSafe,
            None,
        )
    }

    fn lora() -> LoraReference {
        LoraReference {
            tensor_url: "https://cdn.example/lora.safetensors".to_string(),
            trigger_word: Some("sks".to_string()),
            scale: 1.0,
        }
    }

    fn adapter(server: &MockServer) -> FaceConsistentImageAdapter {
        let queue = QueueClient::new(GenAiConfig::for_base_url(&server.uri())).unwrap();
        FaceConsistentImageAdapter::new(queue).with_retry_policy(
            RetryPolicy::standard("image").with_delays(vec![Duration::from_millis(1); 3]),
        )
    }

    #[test]
    fn test_backend_priority() {
        let mut identity = IdentityReference::none();
        assert_eq!(FaceBackend::select(&identity), FaceBackend::Default);

        identity.face_image_url = Some("https://cdn.example/face.jpg".to_string());
        assert_eq!(FaceBackend::select(&identity), FaceBackend::FaceReference);

        identity.lora = Some(lora());
        assert_eq!(FaceBackend::select(&identity), FaceBackend::Lora);
    }

    #[test]
    fn test_blank_face_url_uses_default() {
        let identity = IdentityReference {
            lora: None,
            face_image_url: Some(String::new()),
        };
        assert_eq!(FaceBackend::select(&identity), FaceBackend::Default);
    }

    #[test]
    fn test_build_input_per_backend() {
        let lora_input = FaceConsistentImageAdapter::build_input(&ImageRequest::new(
            prompt(),
            IdentityReference {
                lora: Some(lora()),
                face_image_url: None,
            },
        ));
        assert_eq!(lora_input["loras"][0]["path"], "https://cdn.example/lora.safetensors");
        assert!(lora_input.get("reference_image_url").is_none());

        let face_input = FaceConsistentImageAdapter::build_input(&ImageRequest::new(
            prompt(),
            IdentityReference {
                lora: None,
                face_image_url: Some("https://cdn.example/face.jpg".to_string()),
            },
        ));
        assert_eq!(face_input["reference_image_url"], "https://cdn.example/face.jpg");

        let plain = FaceConsistentImageAdapter::build_input(&ImageRequest::new(prompt(), IdentityReference::none()));
        assert!(plain.get("loras").is_none());
        assert!(plain["negative_prompt"].as_str().unwrap().contains("violence"));
    }

    #[tokio::test]
    async fn test_submit_routes_to_backend_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/flux-pulid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"request_id": "img-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ImageRequest::new(
            prompt(),
            IdentityReference {
                lora: None,
                face_image_url: Some("https://cdn.example/face.jpg".to_string()),
            },
        );
        let job = adapter(&server)
            .submit(&request, "https://api.example/webhooks/story/page")
            .await
            .unwrap();
        assert_eq!(job.job_id.as_str(), "img-1");
        assert_eq!(job.endpoint, "fal-ai/flux-pulid");
    }

    #[tokio::test]
    async fn test_generate_sync_retries_empty_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/flux/dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"images": []})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/flux/dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "images": [{"url": "https://cdn.example/preview.png"}]
            })))
            .mount(&server)
            .await;

        let url = adapter(&server)
            .generate_sync(&ImageRequest::new(prompt(), IdentityReference::none()))
            .await;
        assert_eq!(url, "https://cdn.example/preview.png");
    }

    #[tokio::test]
    async fn test_generate_sync_exhausted_returns_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let url = adapter(&server)
            .generate_sync(&ImageRequest::new(prompt(), IdentityReference::none()))
            .await;
        assert!(url.is_empty());
    }
}
