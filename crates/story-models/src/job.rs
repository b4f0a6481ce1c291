//! External job reports and their classification.
//!
//! The external generation system reports terminal job status either by
//! calling our webhook or when we poll its result endpoint. Both paths carry
//! the same `{status, payload, error}` shape and are classified here into a
//! [`JobOutcome`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::JobId;

/// Statuses the job system uses while a job is still queued or running.
const IN_FLIGHT_STATUSES: &[&str] = &["IN_QUEUE", "IN_PROGRESS", "QUEUED", "RUNNING", "PENDING"];

/// Terminal outcome of one external job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job produced its asset.
    Succeeded { asset_url: String },
    /// The job failed, or finished without an asset.
    Failed { reason: String },
}

impl JobOutcome {
    pub fn succeeded(asset_url: impl Into<String>) -> Self {
        Self::Succeeded {
            asset_url: asset_url.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded { .. } => "succeeded",
            JobOutcome::Failed { .. } => "failed",
        }
    }
}

/// Which asset a job is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Audio,
    LoraWeights,
}

impl AssetKind {
    /// Extract the asset URL from a job payload.
    pub fn extract_url(&self, payload: &Value) -> Option<String> {
        let url = match self {
            AssetKind::Image => payload
                .get("images")
                .and_then(|v| v.as_array())
                .and_then(|images| images.first())
                .and_then(|img| img.get("url"))
                .or_else(|| payload.get("image").and_then(|img| img.get("url"))),
            AssetKind::Audio => payload
                .get("audio")
                .and_then(|a| a.get("url"))
                .or_else(|| payload.get("audio_url")),
            AssetKind::LoraWeights => payload
                .get("diffusers_lora_file")
                .and_then(|f| f.get("url"))
                .or_else(|| payload.get("lora_url")),
        };

        url.and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Status report for one job, from a webhook or a poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    pub fn new(status: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            status: status.into(),
            payload,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn normalized_status(&self) -> String {
        self.status.trim().to_ascii_uppercase()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.normalized_status().as_str(), "ERROR" | "FAILED")
    }

    /// Still queued or running; carries no terminal information.
    pub fn is_in_flight(&self) -> bool {
        IN_FLIGHT_STATUSES.contains(&self.normalized_status().as_str())
    }

    /// Classify the report into a terminal outcome.
    ///
    /// Returns `None` while the job is still in flight. Any status other than
    /// an error or an in-flight marker counts as completion, and completion
    /// without an asset URL is a failure.
    pub fn classify(&self, asset: AssetKind) -> Option<JobOutcome> {
        if self.is_error() {
            let reason = self
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "Generation job reported an error".to_string());
            return Some(JobOutcome::failed(reason));
        }

        if self.is_in_flight() {
            return None;
        }

        match self.payload.as_ref().and_then(|p| asset.extract_url(p)) {
            Some(url) => Some(JobOutcome::succeeded(url)),
            None => Some(JobOutcome::failed(format!(
                "Job finished with status {} but produced no asset",
                if self.status.is_empty() { "<empty>" } else { &self.status }
            ))),
        }
    }
}

/// Inbound webhook body from the external job system.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(flatten)]
    pub report: JobReport,
}

impl WebhookPayload {
    /// The job id this webhook reports on, if present and non-empty.
    pub fn job_id(&self) -> Option<JobId> {
        self.request_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(JobId::from)
    }
}

/// Result of polling the job system for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    /// No terminal result yet (or the lookup could not tell).
    Pending,
    /// The job reached a terminal status.
    Finished(JobReport),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_status_is_failure() {
        let report = JobReport::new("ERROR", None).with_error("nsfw content detected");
        assert_eq!(
            report.classify(AssetKind::Image),
            Some(JobOutcome::failed("nsfw content detected"))
        );
    }

    #[test]
    fn test_completed_with_image_succeeds() {
        let report = JobReport::new(
            "COMPLETED",
            Some(json!({"images": [{"url": "https://cdn.example/p1.png"}]})),
        );
        assert_eq!(
            report.classify(AssetKind::Image),
            Some(JobOutcome::succeeded("https://cdn.example/p1.png"))
        );
    }

    #[test]
    fn test_completed_without_image_is_failure() {
        let report = JobReport::new("OK", Some(json!({"images": []})));
        assert!(matches!(
            report.classify(AssetKind::Image),
            Some(JobOutcome::Failed { .. })
        ));

        let blank = JobReport::new("OK", Some(json!({"images": [{"url": "  "}]})));
        assert!(!blank.classify(AssetKind::Image).unwrap().is_success());
    }

    #[test]
    fn test_in_flight_has_no_outcome() {
        assert_eq!(JobReport::new("IN_PROGRESS", None).classify(AssetKind::Image), None);
        assert_eq!(JobReport::new("in_queue", None).classify(AssetKind::Image), None);
    }

    #[test]
    fn test_webhook_payload_parses_flattened_report() {
        let body = json!({
            "request_id": "req-42",
            "status": "OK",
            "payload": {"images": [{"url": "https://cdn.example/x.png"}]}
        });
        let webhook: WebhookPayload = serde_json::from_value(body).unwrap();
        assert_eq!(webhook.job_id(), Some(JobId::from("req-42")));
        assert!(webhook.report.classify(AssetKind::Image).unwrap().is_success());
    }

    #[test]
    fn test_webhook_payload_blank_request_id() {
        let webhook: WebhookPayload =
            serde_json::from_value(json!({"request_id": " ", "status": "OK"})).unwrap();
        assert_eq!(webhook.job_id(), None);
    }

    #[test]
    fn test_audio_and_lora_extraction() {
        assert_eq!(
            AssetKind::Audio.extract_url(&json!({"audio": {"url": "https://cdn.example/a.mp3"}})),
            Some("https://cdn.example/a.mp3".to_string())
        );
        assert_eq!(
            AssetKind::LoraWeights
                .extract_url(&json!({"diffusers_lora_file": {"url": "https://cdn.example/w.safetensors"}})),
            Some("https://cdn.example/w.safetensors".to_string())
        );
    }
}
