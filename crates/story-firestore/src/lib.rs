//! Firestore REST API client.
//!
//! This crate provides:
//! - A REST client with token caching, transport retry and metrics
//! - Optimistic compare-and-set on single documents
//! - Typed repositories for stories, pages, subject models, credit balances
//!   and credit transactions

pub mod cas;
pub mod client;
pub mod credit_transaction_repo;
pub mod error;
pub mod metrics;
pub mod page_repo;
pub mod retry;
pub mod story_repo;
pub mod subject_model_repo;
pub mod token_cache;
pub mod types;
pub mod user_credits;

pub use cas::{compare_and_set, CasOutcome};
pub use client::{FirestoreClient, FirestoreConfig};
pub use credit_transaction_repo::CreditTransactionRepository;
pub use error::{FirestoreError, FirestoreResult};
pub use page_repo::{PageJobIndex, PageRepository};
pub use retry::RetryConfig;
pub use story_repo::StoryRepository;
pub use subject_model_repo::SubjectModelRepository;
pub use token_cache::TokenSource;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
pub use user_credits::{CreditAccount, DebitOutcome, UserCreditsRepository};
