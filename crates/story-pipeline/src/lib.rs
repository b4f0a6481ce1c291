//! Storybook generation pipeline.
//!
//! This crate provides:
//! - The credit ledger (atomic debit, refund, grants, history)
//! - Store ports with in-memory and Firestore backends
//! - The page state machine shared by webhooks and the sweeper
//! - Story aggregation, reconciliation sweeps and orchestration
//! - Narration and subject model training

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod narration;
pub mod pipeline;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod subjects;
pub mod sweeper;
pub mod webhook;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregator::{StoryAggregator, StoryProgress};
pub use cache::StoryListCache;
pub use config::PipelineConfig;
pub use error::{LedgerError, LedgerResult, PipelineError, PipelineResult, StoreError, StoreResult};
pub use ledger::CreditLedger;
pub use logging::PageLogger;
pub use narration::{NarrationOutcome, Narrator};
pub use pipeline::{Generators, Pipeline};
pub use service::{GenerateStoryRequest, PreviewRequest, PreviewResult, StoryDetail, StoryService};
pub use state_machine::{transition_page, PageStateMachine, ResultSource, TransitionEffect};
pub use store::{CreditStore, FirestoreStore, MemoryStore, ModelStore, StoryStore, Stores};
pub use subjects::{SubjectModelService, DEFAULT_TRIGGER_WORD};
pub use sweeper::{ReconciliationSweeper, SweepReport};
pub use webhook::{WebhookScope, WebhookSigner};
