//! Story records and story-level status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::ids::{StoryId, SubjectModelId};
use crate::page::StoryPage;
use crate::style::ArtStyle;

/// Reading speed used for the estimated read time.
pub const WORDS_PER_MINUTE: u32 = 200;

/// Story generation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    /// Story requested, pages not yet fanned out
    #[default]
    Pending,
    /// Page jobs are in flight
    Generating,
    /// Every page has an illustration
    Completed,
    /// Every page failed
    Failed,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::Generating => "generating",
            StoryStatus::Completed => "completed",
            StoryStatus::Failed => "failed",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StoryStatus::Pending),
            "generating" => Some(StoryStatus::Generating),
            "completed" => Some(StoryStatus::Completed),
            "failed" => Some(StoryStatus::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, StoryStatus::Completed | StoryStatus::Failed)
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested story length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl StoryLength {
    /// Number of pages the script writer is asked for.
    pub fn page_count(&self) -> u32 {
        match self {
            StoryLength::Short => 5,
            StoryLength::Medium => 8,
            StoryLength::Long => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryLength::Short => "short",
            StoryLength::Medium => "medium",
            StoryLength::Long => "long",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "short" => Some(StoryLength::Short),
            "medium" => Some(StoryLength::Medium),
            "long" => Some(StoryLength::Long),
            _ => None,
        }
    }
}

/// Optional personalization supplied when the story is requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Personalization {
    #[validate(length(min = 1, max = 40))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,

    #[validate(range(min = 1, max = 14))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_age: Option<u8>,

    #[serde(default)]
    pub length: StoryLength,

    #[validate(length(max = 280))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedication: Option<String>,

    /// Synthesize narration for each page
    #[serde(default)]
    pub audio_enabled: bool,

    /// Voice preset for narration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// A storybook generation request and its aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Story {
    pub id: StoryId,

    /// Owner
    pub user_id: String,

    pub title: String,

    #[serde(default)]
    pub status: StoryStatus,

    /// Subject whose identity drives face-consistent illustrations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_model_id: Option<SubjectModelId>,

    #[serde(default)]
    pub art_style: ArtStyle,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalization: Option<Personalization>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Story {
    /// Create a new story record in the `Generating` state.
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        subject_model_id: Option<SubjectModelId>,
        art_style: ArtStyle,
        personalization: Option<Personalization>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: StoryId::new(),
            user_id: user_id.into(),
            title: title.into(),
            status: StoryStatus::Generating,
            subject_model_id,
            art_style,
            personalization,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            error_message: None,
        }
    }

    /// Whether narration should be synthesized for this story's pages.
    pub fn audio_enabled(&self) -> bool {
        self.personalization
            .as_ref()
            .map(|p| p.audio_enabled)
            .unwrap_or(false)
    }

    /// Voice preset requested for narration, if any.
    pub fn voice(&self) -> Option<&str> {
        self.personalization.as_ref().and_then(|p| p.voice.as_deref())
    }
}

/// Derived analytics, written once per completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryAnalytics {
    pub story_id: StoryId,
    pub page_count: u32,
    pub word_count: u32,
    /// Estimated read time in seconds (whole minutes, rounded up)
    pub avg_read_time_secs: u32,
    pub computed_at: DateTime<Utc>,
}

impl StoryAnalytics {
    /// Compute analytics from the story's pages.
    pub fn compute(story_id: &StoryId, pages: &[StoryPage]) -> Self {
        let word_count: u32 = pages
            .iter()
            .map(|p| p.text.split_whitespace().count() as u32)
            .sum();

        Self {
            story_id: story_id.clone(),
            page_count: pages.len() as u32,
            word_count,
            avg_read_time_secs: estimated_read_time_secs(word_count),
            computed_at: Utc::now(),
        }
    }
}

/// Read time for `word_count` words at [`WORDS_PER_MINUTE`], rounded up to whole minutes.
pub fn estimated_read_time_secs(word_count: u32) -> u32 {
    word_count.div_ceil(WORDS_PER_MINUTE) * 60
}

/// Summary of a story in the user's library (list view).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorySummary {
    pub id: StoryId,
    pub title: String,
    pub status: StoryStatus,
    pub art_style: ArtStyle,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Story> for StorySummary {
    fn from(story: &Story) -> Self {
        Self {
            id: story.id.clone(),
            title: story.title.clone(),
            status: story.status,
            art_style: story.art_style,
            created_at: story.created_at,
            completed_at: story.completed_at,
        }
    }
}
