//! Firestore-backed store.
//!
//! Conditional writes use `updateTime` preconditions through the repositories'
//! `update_if`; job correlation uses the `page_jobs/{job_id}` index.

use async_trait::async_trait;

use story_firestore::{
    CasOutcome, CreditTransactionRepository, DebitOutcome, FirestoreClient, PageRepository,
    StoryRepository, SubjectModelRepository, UserCreditsRepository,
};
use story_models::{
    CreditTransaction, JobId, PageId, Story, StoryAnalytics, StoryId, StoryPage, SubjectModel,
    SubjectModelId,
};

use super::{CreditStore, ModelStore, Mutation, StoryStore};
use crate::error::StoreResult;

#[derive(Clone)]
pub struct FirestoreStore {
    stories: StoryRepository,
    pages: PageRepository,
    models: SubjectModelRepository,
    credits: UserCreditsRepository,
    transactions: CreditTransactionRepository,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            stories: StoryRepository::new(client.clone()),
            pages: PageRepository::new(client.clone()),
            models: SubjectModelRepository::new(client.clone()),
            credits: UserCreditsRepository::new(client.clone()),
            transactions: CreditTransactionRepository::new(client),
        }
    }
}

#[async_trait]
impl StoryStore for FirestoreStore {
    async fn create_story(&self, story: &Story, pages: &[StoryPage]) -> StoreResult<()> {
        Ok(self.stories.create_with_pages(story, pages).await?)
    }

    async fn get_story(&self, story_id: &StoryId) -> StoreResult<Option<Story>> {
        Ok(self.stories.get(story_id).await?)
    }

    async fn list_stories(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Story>> {
        Ok(self.stories.list_for_user(user_id, limit).await?)
    }

    async fn update_story(&self, story_id: &StoryId, mutate: Mutation<'_, Story>) -> StoreResult<CasOutcome<Story>> {
        Ok(self.stories.update_if(story_id, mutate).await?)
    }

    async fn get_pages(&self, story_id: &StoryId) -> StoreResult<Vec<StoryPage>> {
        Ok(self.pages.list(story_id).await?)
    }

    async fn get_page(&self, story_id: &StoryId, page_id: &PageId) -> StoreResult<Option<StoryPage>> {
        Ok(self.pages.get(story_id, page_id).await?)
    }

    async fn update_page(
        &self,
        story_id: &StoryId,
        page_id: &PageId,
        mutate: Mutation<'_, StoryPage>,
    ) -> StoreResult<CasOutcome<StoryPage>> {
        Ok(self.pages.update_if(story_id, page_id, mutate).await?)
    }

    async fn index_page_job(&self, job_id: &JobId, story_id: &StoryId, page_id: &PageId) -> StoreResult<()> {
        Ok(self.pages.index_job(job_id, story_id, page_id).await?)
    }

    async fn find_page_by_job(&self, job_id: &JobId) -> StoreResult<Option<StoryPage>> {
        let Some(entry) = self.pages.lookup_job(job_id).await? else {
            return Ok(None);
        };
        Ok(self
            .pages
            .get(&entry.story_id, &entry.page_id)
            .await?
            .filter(|page| page.is_current_job(job_id)))
    }

    async fn upsert_analytics(&self, analytics: &StoryAnalytics) -> StoreResult<()> {
        Ok(self.stories.upsert_analytics(analytics).await?)
    }

    async fn get_analytics(&self, story_id: &StoryId) -> StoreResult<Option<StoryAnalytics>> {
        Ok(self.stories.get_analytics(story_id).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(self.stories.ping().await?)
    }
}

#[async_trait]
impl ModelStore for FirestoreStore {
    async fn create_model(&self, model: &SubjectModel) -> StoreResult<()> {
        Ok(self.models.create(model).await?)
    }

    async fn get_model(&self, model_id: &SubjectModelId) -> StoreResult<Option<SubjectModel>> {
        Ok(self.models.get(model_id).await?)
    }

    async fn update_model(
        &self,
        model_id: &SubjectModelId,
        mutate: Mutation<'_, SubjectModel>,
    ) -> StoreResult<CasOutcome<SubjectModel>> {
        Ok(self.models.update_if(model_id, mutate).await?)
    }

    async fn find_model_by_training_job(&self, job_id: &JobId) -> StoreResult<Option<SubjectModel>> {
        Ok(self.models.find_by_training_job(job_id).await?)
    }
}

#[async_trait]
impl CreditStore for FirestoreStore {
    async fn get_balance(&self, user_id: &str) -> StoreResult<u32> {
        Ok(self.credits.get_balance(user_id).await?)
    }

    async fn ensure_account(&self, user_id: &str, initial: u32) -> StoreResult<bool> {
        Ok(self.credits.ensure_account(user_id, initial).await?)
    }

    async fn try_debit(&self, user_id: &str, amount: u32) -> StoreResult<DebitOutcome> {
        Ok(self.credits.try_debit(user_id, amount).await?)
    }

    async fn credit(&self, user_id: &str, amount: u32) -> StoreResult<u32> {
        Ok(self.credits.credit(user_id, amount).await?)
    }

    async fn record_transaction(&self, transaction: &CreditTransaction) -> StoreResult<()> {
        Ok(self.transactions.create(transaction).await?)
    }

    async fn recent_transactions(&self, user_id: &str, limit: u32) -> StoreResult<Vec<CreditTransaction>> {
        Ok(self.transactions.list_recent(user_id, limit).await?)
    }
}
