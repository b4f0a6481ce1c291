//! Pipeline error types.

use story_firestore::FirestoreError;
use story_genai::GenAiError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Persistence failures from any store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation adapter error: {0}")]
    GenAi(#[from] GenAiError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Failures the user can fix (top up, change input) rather than retry blindly.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientCredits { .. }
                | PipelineError::BadRequest(_)
                | PipelineError::NotFound(_)
        )
    }
}

impl From<LedgerError> for PipelineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCredits { required, available } => {
                PipelineError::InsufficientCredits { required, available }
            }
            LedgerError::Store(e) => PipelineError::Store(e),
        }
    }
}

impl From<FirestoreError> for PipelineError {
    fn from(e: FirestoreError) -> Self {
        PipelineError::Store(StoreError::Firestore(e))
    }
}
