//! Script writer backed by Gemini.
//!
//! Tries the primary model and falls back to the secondary one; the response
//! must parse into a valid [`StoryScript`].

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use story_models::{ArtStyle, Personalization, StoryScript};

use crate::config::GenAiConfig;
use crate::error::{GenAiError, GenAiResult};
use crate::metrics::record_call;

const SERVICE: &str = "gemini";

/// Input for one script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub theme: String,
    pub page_count: u32,
    pub art_style: ArtStyle,
    #[serde(default)]
    pub personalization: Personalization,
}

impl ScriptRequest {
    fn prompt(&self) -> String {
        let hero = self.personalization.child_name.as_deref().unwrap_or("a curious child");
        let age = self
            .personalization
            .child_age
            .map(|a| format!(" The reader is {} years old; keep vocabulary suitable for that age.", a))
            .unwrap_or_default();

        format!(
            "Write a children's picture book about {hero}. Theme: {theme}.{age}\n\
             The book has exactly {pages} pages, illustrated in a {style} style.\n\
             Respond with JSON only, in this shape:\n\
             {{\"title\": string, \"pages\": [{{\"page_number\": number starting at 1, \
             \"text\": narration for the page (1-3 sentences), \
             \"image_description\": a visual scene description for the illustrator, \
             \"emotion\": the main character's emotion}}]}}",
            hero = hero,
            theme = self.theme.trim(),
            age = age,
            pages = self.page_count,
            style = self.art_style.as_str(),
        )
    }
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate_script(&self, request: &ScriptRequest) -> GenAiResult<StoryScript>;
}

// ============================================================================
// Gemini wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

// ============================================================================
// Adapter
// ============================================================================

#[derive(Clone)]
pub struct GeminiScriptAdapter {
    http: Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
}

impl GeminiScriptAdapter {
    pub fn new(config: &GenAiConfig) -> GenAiResult<Self> {
        if config.gemini_api_key.is_empty() {
            return Err(GenAiError::config("GEMINI_API_KEY not set"));
        }

        let http = Client::builder().timeout(config.sync_timeout).build()?;
        Ok(Self {
            http,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            models: vec![config.script_model.clone(), config.script_fallback_model.clone()],
        })
    }

    async fn call_model(&self, model: &str, prompt: &str) -> GenAiResult<StoryScript> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: 0.9,
            },
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenAiError::Api {
                service: SERVICE,
                status,
                body,
            });
        }

        let response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GenAiError::invalid_response(SERVICE, e.to_string()))?;

        let text = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| GenAiError::invalid_response(SERVICE, "no content in response"))?;

        Ok(StoryScript::from_llm_json(text)?)
    }
}

#[async_trait]
impl ScriptGenerator for GeminiScriptAdapter {
    async fn generate_script(&self, request: &ScriptRequest) -> GenAiResult<StoryScript> {
        let prompt = request.prompt();
        let mut last_error = None;

        for model in &self.models {
            let start = Instant::now();
            let result = self
                .call_model(model, &prompt)
                .instrument(info_span!("script_generate", model = %model))
                .await;
            record_call("script", "script", result.is_ok(), start.elapsed().as_millis() as f64);

            match result {
                Ok(script) => {
                    if script.page_count() != request.page_count {
                        warn!(
                            model = %model,
                            requested = request.page_count,
                            returned = script.page_count(),
                            "Script page count differs from request"
                        );
                    }
                    info!(model = %model, pages = script.page_count(), "Generated story script");
                    return Ok(script);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Script model failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GenAiError::AllModelsFailed("no models configured".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ScriptRequest {
        ScriptRequest {
            theme: "a trip to the moon".to_string(),
            page_count: 2,
            art_style: ArtStyle::Watercolor,
            personalization: Personalization {
                child_name: Some("Mia".to_string()),
                child_age: Some(5),
                ..Default::default()
            },
        }
    }

    fn gemini_body(text: &str) -> serde_json::Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }

    const SCRIPT: &str = r#"```json
{"title": "Mia and the Moon", "pages": [
  {"page_number": 2, "text": "They landed softly.", "image_description": "a rocket on the moon", "emotion": "amazed"},
  {"page_number": 1, "text": "Mia built a rocket.", "image_description": "a girl with a cardboard rocket"}
]}
```"#;

    #[test]
    fn test_prompt_mentions_inputs() {
        let prompt = request().prompt();
        assert!(prompt.contains("Mia"));
        assert!(prompt.contains("exactly 2 pages"));
        assert!(prompt.contains("5 years old"));
    }

    #[test]
    fn test_requires_api_key() {
        let mut config = GenAiConfig::for_base_url("http://localhost");
        config.gemini_api_key.clear();
        assert!(GeminiScriptAdapter::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_primary_model_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/primary-model:generateContent"))
            .and(query_param("key", "test-gemini-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(SCRIPT)))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = GeminiScriptAdapter::new(&GenAiConfig::for_base_url(&server.uri())).unwrap();
        let script = adapter.generate_script(&request()).await.unwrap();
        assert_eq!(script.title, "Mia and the Moon");
        assert_eq!(script.pages[0].page_number, 1);
    }

    #[tokio::test]
    async fn test_falls_back_on_primary_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/primary-model:generateContent"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/fallback-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(SCRIPT)))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = GeminiScriptAdapter::new(&GenAiConfig::for_base_url(&server.uri())).unwrap();
        let script = adapter.generate_script(&request()).await.unwrap();
        assert_eq!(script.page_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_script_from_every_model_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body("not json at all")))
            .expect(2)
            .mount(&server)
            .await;

        let adapter = GeminiScriptAdapter::new(&GenAiConfig::for_base_url(&server.uri())).unwrap();
        let err = adapter.generate_script(&request()).await.unwrap_err();
        assert!(matches!(err, GenAiError::Script(_)));
    }
}
