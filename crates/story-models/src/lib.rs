//! Shared data models for the storybook backend.
//!
//! This crate provides Serde-serializable types for:
//! - Stories, pages and derived analytics
//! - Scripts produced by the script writer
//! - Subject models and identity references
//! - External job reports and webhook payloads
//! - Credit costs and credit transactions

pub mod credit_cost;
pub mod credit_transaction;
pub mod ids;
pub mod job;
pub mod page;
pub mod script;
pub mod story;
pub mod style;
pub mod subject_model;

// Re-export common types
pub use credit_cost::{
    story_generation_cost, MODEL_TRAINING_COST, PAGE_AUDIO_COST, PAGE_IMAGE_COST,
    PREVIEW_IMAGE_COST,
};
pub use credit_transaction::{CreditOperationType, CreditTransaction, CreditTransactionKind};
pub use ids::{JobId, PageId, StoryId, SubjectModelId};
pub use job::{AssetKind, JobOutcome, JobPoll, JobReport, WebhookPayload};
pub use page::{PageStatus, StoryPage};
pub use script::{ScriptError, ScriptPage, StoryScript};
pub use story::{
    estimated_read_time_secs, Personalization, Story, StoryAnalytics, StoryLength, StoryStatus,
    StorySummary, WORDS_PER_MINUTE,
};
pub use style::{ArtStyle, ArtStyleParseError};
pub use subject_model::{
    IdentityReference, LoraReference, SubjectModel, SubjectModelStatus, DEFAULT_LORA_SCALE,
};
