//! Illustrated page records.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{JobId, PageId, StoryId};

/// Page generation status.
///
/// `Generated` and `Failed` are terminal for a given job id; a retry moves the
/// page back to `Pending` under a fresh job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    Pending,
    Generated,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::Generated => "generated",
            PageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PageStatus::Pending),
            "generated" => Some(PageStatus::Generated),
            "failed" => Some(PageStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PageStatus::Generated | PageStatus::Failed)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One illustrated page of a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryPage {
    pub id: PageId,

    pub story_id: StoryId,

    /// 1-based, unique within the story
    pub page_number: u32,

    /// Narration text
    pub text: String,

    pub image_prompt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,

    #[serde(default)]
    pub status: PageStatus,

    /// Empty until the page is generated
    #[serde(default)]
    pub image_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    /// Job id of the current generation attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// Endpoint family the current job was submitted to (used for polling)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_endpoint: Option<String>,

    /// Credits billed for the current attempt (refunded if it fails)
    #[serde(default)]
    pub credits_charged: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl StoryPage {
    /// Create a new pending page.
    pub fn new(
        story_id: StoryId,
        page_number: u32,
        text: impl Into<String>,
        image_prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PageId::new(),
            story_id,
            page_number,
            text: text.into(),
            image_prompt: image_prompt.into(),
            emotion: None,
            status: PageStatus::Pending,
            image_url: String::new(),
            audio_url: None,
            job_id: None,
            job_endpoint: None,
            credits_charged: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_emotion(mut self, emotion: Option<String>) -> Self {
        self.emotion = emotion;
        self
    }

    /// Generated with a usable image.
    pub fn is_generated(&self) -> bool {
        self.status == PageStatus::Generated && !self.image_url.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.status == PageStatus::Failed
    }

    /// Pending with a job in flight that has not been touched for longer than `grace`.
    pub fn is_stale(&self, grace: Duration, now: DateTime<Utc>) -> bool {
        self.status == PageStatus::Pending && self.job_id.is_some() && now - self.updated_at > grace
    }

    /// Whether `job_id` is the page's current attempt.
    pub fn is_current_job(&self, job_id: &JobId) -> bool {
        self.job_id.as_ref() == Some(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> StoryPage {
        StoryPage::new(StoryId::new(), 1, "Once upon a time", "a fox in a forest")
    }

    #[test]
    fn test_new_page_is_pending_without_image() {
        let page = page();
        assert_eq!(page.status, PageStatus::Pending);
        assert!(page.image_url.is_empty());
        assert!(!page.is_generated());
    }

    #[test]
    fn test_generated_requires_image_url() {
        let mut page = page();
        page.status = PageStatus::Generated;
        assert!(!page.is_generated());
        page.image_url = "https://cdn.example/1.png".to_string();
        assert!(page.is_generated());
    }

    #[test]
    fn test_stale_detection() {
        let mut page = page();
        let now = Utc::now();

        // No job id, never stale
        page.updated_at = now - Duration::seconds(60);
        assert!(!page.is_stale(Duration::seconds(10), now));

        page.job_id = Some(JobId::from("job-1"));
        assert!(page.is_stale(Duration::seconds(10), now));

        page.updated_at = now - Duration::seconds(5);
        assert!(!page.is_stale(Duration::seconds(10), now));

        page.updated_at = now - Duration::seconds(60);
        page.status = PageStatus::Generated;
        assert!(!page.is_stale(Duration::seconds(10), now));
    }
}
