//! Client for the external job system.
//!
//! Async jobs are submitted to `{queue_url}/{endpoint}` with a webhook URL and
//! complete later; the same job can be polled at
//! `{queue_url}/{endpoint}/requests/{id}/status`. Synchronous calls go to
//! `{sync_url}/{endpoint}` and block until the result is ready.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use story_models::{JobId, JobPoll, JobReport};

use crate::config::GenAiConfig;
use crate::error::{GenAiError, GenAiResult};
use crate::metrics::record_call;

const SERVICE: &str = "job queue";

/// Receipt for a submitted async job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
    /// Endpoint family the job was submitted to; needed to poll it
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
    #[serde(default)]
    status_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Looks up the current state of an async job.
#[async_trait]
pub trait JobResultLookup: Send + Sync {
    /// Query a job by endpoint family and id.
    ///
    /// Transport errors are returned as errors; callers treat them as still pending.
    async fn lookup(&self, endpoint: &str, job_id: &JobId) -> GenAiResult<JobPoll>;
}

#[derive(Clone)]
pub struct QueueClient {
    http: Client,
    config: GenAiConfig,
}

impl QueueClient {
    pub fn new(config: GenAiConfig) -> GenAiResult<Self> {
        let http = Client::builder()
            .timeout(config.sync_timeout.max(config.request_timeout))
            .user_agent(concat!("story-genai/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GenAiConfig {
        &self.config
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.config.api_key)
    }

    async fn check(response: reqwest::Response) -> GenAiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GenAiError::Api {
            service: SERVICE,
            status: status.as_u16(),
            body,
        })
    }

    /// Submit an async job whose completion is reported to `webhook_url`.
    pub async fn submit(
        &self,
        adapter: &'static str,
        endpoint: &str,
        input: &Value,
        webhook_url: Option<&str>,
    ) -> GenAiResult<SubmittedJob> {
        let url = format!("{}/{}", self.config.queue_url.trim_end_matches('/'), endpoint);
        let span = info_span!("genai_submit", adapter, endpoint = %endpoint);
        let start = Instant::now();

        let result = async {
            let mut request = self
                .http
                .post(&url)
                .timeout(self.config.request_timeout)
                .header("Authorization", self.auth_header())
                .json(input);
            if let Some(webhook) = webhook_url {
                request = request.query(&[("fal_webhook", webhook)]);
            }

            let response = Self::check(request.send().await?).await?;
            let body: SubmitResponse = response
                .json()
                .await
                .map_err(|e| GenAiError::invalid_response(SERVICE, e.to_string()))?;

            if body.request_id.trim().is_empty() {
                return Err(GenAiError::invalid_response(SERVICE, "empty request_id"));
            }

            Ok(SubmittedJob {
                job_id: JobId::from(body.request_id),
                endpoint: endpoint.to_string(),
                poll_url: body.status_url,
            })
        }
        .instrument(span)
        .await;

        record_call(adapter, "submit", result.is_ok(), start.elapsed().as_millis() as f64);
        match &result {
            Ok(job) => info!(adapter, endpoint = %endpoint, job_id = %job.job_id, "Submitted generation job"),
            Err(e) => warn!(adapter, endpoint = %endpoint, error = %e, "Job submission failed"),
        }
        result
    }

    /// Run a job synchronously and return its payload.
    pub async fn run_sync(&self, adapter: &'static str, endpoint: &str, input: &Value) -> GenAiResult<Value> {
        let url = format!("{}/{}", self.config.sync_url.trim_end_matches('/'), endpoint);
        let span = info_span!("genai_sync", adapter, endpoint = %endpoint);
        let start = Instant::now();

        let result = async {
            let response = self
                .http
                .post(&url)
                .timeout(self.config.sync_timeout)
                .header("Authorization", self.auth_header())
                .json(input)
                .send()
                .await?;
            let response = Self::check(response).await?;
            response
                .json::<Value>()
                .await
                .map_err(|e| GenAiError::invalid_response(SERVICE, e.to_string()))
        }
        .instrument(span)
        .await;

        record_call(adapter, "sync", result.is_ok(), start.elapsed().as_millis() as f64);
        result
    }

    fn request_url(&self, endpoint: &str, job_id: &JobId) -> String {
        format!(
            "{}/{}/requests/{}",
            self.config.queue_url.trim_end_matches('/'),
            endpoint,
            job_id
        )
    }
}

#[async_trait]
impl JobResultLookup for QueueClient {
    async fn lookup(&self, endpoint: &str, job_id: &JobId) -> GenAiResult<JobPoll> {
        let base = self.request_url(endpoint, job_id);
        let start = Instant::now();

        let result = async {
            let response = self
                .http
                .get(format!("{}/status", base))
                .timeout(self.config.request_timeout)
                .header("Authorization", self.auth_header())
                .send()
                .await?;
            let status: StatusResponse = Self::check(response)
                .await?
                .json()
                .await
                .map_err(|e| GenAiError::invalid_response(SERVICE, e.to_string()))?;

            let reported = JobReport::new(status.status.clone(), None);
            if reported.is_error() {
                let reason = status.error.unwrap_or_else(|| "Job failed".to_string());
                return Ok(JobPoll::Finished(reported.with_error(reason)));
            }
            if status.status.to_ascii_uppercase() != "COMPLETED" {
                debug!(job_id = %job_id, status = %status.status, "Job still pending");
                return Ok(JobPoll::Pending);
            }

            let response = self
                .http
                .get(&base)
                .timeout(self.config.request_timeout)
                .header("Authorization", self.auth_header())
                .send()
                .await?;

            match Self::check(response).await {
                Ok(response) => {
                    let payload: Value = response
                        .json()
                        .await
                        .map_err(|e| GenAiError::invalid_response(SERVICE, e.to_string()))?;
                    Ok(JobPoll::Finished(JobReport::new("OK", Some(payload))))
                }
                // The job completed but its result failed validation or a safety filter.
                // Other statuses leave the job unsettled for a later lookup.
                Err(GenAiError::Api { status, body, .. }) if status == StatusCode::UNPROCESSABLE_ENTITY.as_u16() => {
                    Ok(JobPoll::Finished(JobReport::new("ERROR", None).with_error(body)))
                }
                Err(e) => Err(e),
            }
        }
        .instrument(info_span!("genai_poll", endpoint = %endpoint, job_id = %job_id))
        .await;

        record_call("queue", "poll", result.is_ok(), start.elapsed().as_millis() as f64);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use story_models::AssetKind;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> QueueClient {
        QueueClient::new(GenAiConfig::for_base_url(&server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_submit_passes_webhook_and_returns_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fal-ai/flux/dev"))
            .and(header("Authorization", "Key test-key"))
            .and(query_param("fal_webhook", "https://api.example/webhooks/story/page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "request_id": "req-1",
                "status_url": "https://queue.example/status/req-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let job = client(&server)
            .submit(
                "image",
                "fal-ai/flux/dev",
                &json!({"prompt": "a fox"}),
                Some("https://api.example/webhooks/story/page"),
            )
            .await
            .unwrap();
        assert_eq!(job.job_id, JobId::from("req-1"));
        assert_eq!(job.endpoint, "fal-ai/flux/dev");
    }

    #[tokio::test]
    async fn test_submit_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad input"))
            .mount(&server)
            .await;

        let err = client(&server)
            .submit("image", "fal-ai/flux/dev", &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GenAiError::Api { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_lookup_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "IN_PROGRESS"})))
            .mount(&server)
            .await;

        let poll = client(&server)
            .lookup("fal-ai/flux/dev", &JobId::from("req-1"))
            .await
            .unwrap();
        assert_eq!(poll, JobPoll::Pending);
    }

    #[tokio::test]
    async fn test_lookup_completed_fetches_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "images": [{"url": "https://cdn.example/1.png"}]
            })))
            .mount(&server)
            .await;

        let poll = client(&server)
            .lookup("fal-ai/flux/dev", &JobId::from("req-1"))
            .await
            .unwrap();
        let JobPoll::Finished(report) = poll else {
            panic!("expected finished poll");
        };
        assert!(report.classify(AssetKind::Image).unwrap().is_success());
    }

    #[tokio::test]
    async fn test_lookup_completed_with_failed_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-2/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-2"))
            .respond_with(ResponseTemplate::new(422).set_body_string("content policy"))
            .mount(&server)
            .await;

        let poll = client(&server)
            .lookup("fal-ai/flux/dev", &JobId::from("req-2"))
            .await
            .unwrap();
        let JobPoll::Finished(report) = poll else {
            panic!("expected finished poll");
        };
        assert!(report.is_error());
    }

    #[tokio::test]
    async fn test_lookup_result_not_found_is_not_a_job_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-4/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fal-ai/flux/dev/requests/req-4"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let result = client(&server).lookup("fal-ai/flux/dev", &JobId::from("req-4")).await;
        assert!(matches!(result, Err(GenAiError::Api { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_lookup_server_error_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(client(&server)
            .lookup("fal-ai/flux/dev", &JobId::from("req-3"))
            .await
            .is_err());
    }
}
