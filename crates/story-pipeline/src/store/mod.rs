//! Persistence ports.
//!
//! Every write goes through a compare-and-set style `update_*` call: the
//! mutation sees the current record and returns `true` to write it back. The
//! Firestore backend may call a mutation more than once when it loses a
//! precondition race, so mutations must derive everything from the record
//! they are given.

mod firestore;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use story_firestore::{CasOutcome, DebitOutcome, FirestoreClient};
use story_models::{
    CreditTransaction, JobId, PageId, Story, StoryAnalytics, StoryId, StoryPage, SubjectModel,
    SubjectModelId,
};

use crate::error::StoreResult;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// A record mutation; returns `true` to persist the change.
pub type Mutation<'a, T> = &'a mut (dyn FnMut(&mut T) -> bool + Send);

#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Create the story and all of its pages together.
    async fn create_story(&self, story: &Story, pages: &[StoryPage]) -> StoreResult<()>;

    async fn get_story(&self, story_id: &StoryId) -> StoreResult<Option<Story>>;

    /// Newest first.
    async fn list_stories(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Story>>;

    async fn update_story(&self, story_id: &StoryId, mutate: Mutation<'_, Story>) -> StoreResult<CasOutcome<Story>>;

    /// Pages ordered by page number.
    async fn get_pages(&self, story_id: &StoryId) -> StoreResult<Vec<StoryPage>>;

    async fn get_page(&self, story_id: &StoryId, page_id: &PageId) -> StoreResult<Option<StoryPage>>;

    async fn update_page(
        &self,
        story_id: &StoryId,
        page_id: &PageId,
        mutate: Mutation<'_, StoryPage>,
    ) -> StoreResult<CasOutcome<StoryPage>>;

    /// Record that `job_id` belongs to the given page.
    async fn index_page_job(&self, job_id: &JobId, story_id: &StoryId, page_id: &PageId) -> StoreResult<()>;

    /// The page whose current attempt is `job_id`.
    async fn find_page_by_job(&self, job_id: &JobId) -> StoreResult<Option<StoryPage>>;

    async fn upsert_analytics(&self, analytics: &StoryAnalytics) -> StoreResult<()>;

    async fn get_analytics(&self, story_id: &StoryId) -> StoreResult<Option<StoryAnalytics>>;

    /// Reachability probe for readiness checks.
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn create_model(&self, model: &SubjectModel) -> StoreResult<()>;

    async fn get_model(&self, model_id: &SubjectModelId) -> StoreResult<Option<SubjectModel>>;

    async fn update_model(
        &self,
        model_id: &SubjectModelId,
        mutate: Mutation<'_, SubjectModel>,
    ) -> StoreResult<CasOutcome<SubjectModel>>;

    async fn find_model_by_training_job(&self, job_id: &JobId) -> StoreResult<Option<SubjectModel>>;
}

/// Per-user balances. Every balance mutation is atomic on the user's row.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// 0 when the user has no account.
    async fn get_balance(&self, user_id: &str) -> StoreResult<u32>;

    /// Create the account with `initial` credits; `true` if this call created it.
    async fn ensure_account(&self, user_id: &str, initial: u32) -> StoreResult<bool>;

    async fn try_debit(&self, user_id: &str, amount: u32) -> StoreResult<DebitOutcome>;

    /// Increment, creating the account if needed. Returns the new balance.
    async fn credit(&self, user_id: &str, amount: u32) -> StoreResult<u32>;

    async fn record_transaction(&self, transaction: &CreditTransaction) -> StoreResult<()>;

    /// Newest first.
    async fn recent_transactions(&self, user_id: &str, limit: u32) -> StoreResult<Vec<CreditTransaction>>;
}

/// The three stores, backed by one implementation.
#[derive(Clone)]
pub struct Stores {
    pub stories: Arc<dyn StoryStore>,
    pub models: Arc<dyn ModelStore>,
    pub credits: Arc<dyn CreditStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            stories: store.clone(),
            models: store.clone(),
            credits: store,
        }
    }

    pub fn firestore(client: FirestoreClient) -> Self {
        let store = Arc::new(FirestoreStore::new(client));
        Self {
            stories: store.clone(),
            models: store.clone(),
            credits: store,
        }
    }
}
