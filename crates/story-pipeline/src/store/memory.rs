//! In-memory store for local development and tests.
//!
//! All state sits behind one async mutex, so every operation is a single
//! critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use story_firestore::{CasOutcome, DebitOutcome};
use story_models::{
    CreditTransaction, JobId, PageId, Story, StoryAnalytics, StoryId, StoryPage, SubjectModel,
    SubjectModelId,
};

use super::{CreditStore, ModelStore, Mutation, StoryStore};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct State {
    stories: HashMap<StoryId, Story>,
    pages: HashMap<StoryId, Vec<StoryPage>>,
    page_jobs: HashMap<JobId, (StoryId, PageId)>,
    analytics: HashMap<StoryId, StoryAnalytics>,
    models: HashMap<SubjectModelId, SubjectModel>,
    balances: HashMap<String, u32>,
    transactions: HashMap<String, Vec<CreditTransaction>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply<T: Clone>(record: &mut T, mutate: Mutation<'_, T>) -> CasOutcome<T> {
    let mut draft = record.clone();
    if mutate(&mut draft) {
        *record = draft.clone();
        CasOutcome::Written(draft)
    } else {
        CasOutcome::Unchanged(record.clone())
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn create_story(&self, story: &Story, pages: &[StoryPage]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.stories.contains_key(&story.id) {
            return Err(StoreError::conflict(format!("story {} already exists", story.id)));
        }

        let mut pages = pages.to_vec();
        pages.sort_by_key(|p| p.page_number);
        state.stories.insert(story.id.clone(), story.clone());
        state.pages.insert(story.id.clone(), pages);
        Ok(())
    }

    async fn get_story(&self, story_id: &StoryId) -> StoreResult<Option<Story>> {
        Ok(self.state.lock().await.stories.get(story_id).cloned())
    }

    async fn list_stories(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Story>> {
        let state = self.state.lock().await;
        let mut stories: Vec<Story> = state
            .stories
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        stories.truncate(limit as usize);
        Ok(stories)
    }

    async fn update_story(&self, story_id: &StoryId, mutate: Mutation<'_, Story>) -> StoreResult<CasOutcome<Story>> {
        let mut state = self.state.lock().await;
        Ok(match state.stories.get_mut(story_id) {
            Some(story) => apply(story, mutate),
            None => CasOutcome::Missing,
        })
    }

    async fn get_pages(&self, story_id: &StoryId) -> StoreResult<Vec<StoryPage>> {
        Ok(self
            .state
            .lock()
            .await
            .pages
            .get(story_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_page(&self, story_id: &StoryId, page_id: &PageId) -> StoreResult<Option<StoryPage>> {
        Ok(self
            .state
            .lock()
            .await
            .pages
            .get(story_id)
            .and_then(|pages| pages.iter().find(|p| &p.id == page_id))
            .cloned())
    }

    async fn update_page(
        &self,
        story_id: &StoryId,
        page_id: &PageId,
        mutate: Mutation<'_, StoryPage>,
    ) -> StoreResult<CasOutcome<StoryPage>> {
        let mut state = self.state.lock().await;
        let page = state
            .pages
            .get_mut(story_id)
            .and_then(|pages| pages.iter_mut().find(|p| &p.id == page_id));
        Ok(match page {
            Some(page) => apply(page, mutate),
            None => CasOutcome::Missing,
        })
    }

    async fn index_page_job(&self, job_id: &JobId, story_id: &StoryId, page_id: &PageId) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .page_jobs
            .insert(job_id.clone(), (story_id.clone(), page_id.clone()));
        Ok(())
    }

    async fn find_page_by_job(&self, job_id: &JobId) -> StoreResult<Option<StoryPage>> {
        let state = self.state.lock().await;
        let Some((story_id, page_id)) = state.page_jobs.get(job_id) else {
            return Ok(None);
        };
        Ok(state
            .pages
            .get(story_id)
            .and_then(|pages| pages.iter().find(|p| &p.id == page_id))
            .filter(|p| p.is_current_job(job_id))
            .cloned())
    }

    async fn upsert_analytics(&self, analytics: &StoryAnalytics) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .analytics
            .insert(analytics.story_id.clone(), analytics.clone());
        Ok(())
    }

    async fn get_analytics(&self, story_id: &StoryId) -> StoreResult<Option<StoryAnalytics>> {
        Ok(self.state.lock().await.analytics.get(story_id).cloned())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn create_model(&self, model: &SubjectModel) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.models.contains_key(&model.id) {
            return Err(StoreError::conflict(format!("subject model {} already exists", model.id)));
        }
        state.models.insert(model.id.clone(), model.clone());
        Ok(())
    }

    async fn get_model(&self, model_id: &SubjectModelId) -> StoreResult<Option<SubjectModel>> {
        Ok(self.state.lock().await.models.get(model_id).cloned())
    }

    async fn update_model(
        &self,
        model_id: &SubjectModelId,
        mutate: Mutation<'_, SubjectModel>,
    ) -> StoreResult<CasOutcome<SubjectModel>> {
        let mut state = self.state.lock().await;
        Ok(match state.models.get_mut(model_id) {
            Some(model) => apply(model, mutate),
            None => CasOutcome::Missing,
        })
    }

    async fn find_model_by_training_job(&self, job_id: &JobId) -> StoreResult<Option<SubjectModel>> {
        Ok(self
            .state
            .lock()
            .await
            .models
            .values()
            .find(|m| m.training_job_id.as_ref() == Some(job_id))
            .cloned())
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn get_balance(&self, user_id: &str) -> StoreResult<u32> {
        Ok(self.state.lock().await.balances.get(user_id).copied().unwrap_or(0))
    }

    async fn ensure_account(&self, user_id: &str, initial: u32) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.balances.contains_key(user_id) {
            return Ok(false);
        }
        state.balances.insert(user_id.to_string(), initial);
        Ok(true)
    }

    async fn try_debit(&self, user_id: &str, amount: u32) -> StoreResult<DebitOutcome> {
        let mut state = self.state.lock().await;
        let Some(balance) = state.balances.get_mut(user_id) else {
            return Ok(DebitOutcome::Insufficient { available: 0 });
        };
        if *balance < amount {
            return Ok(DebitOutcome::Insufficient { available: *balance });
        }
        *balance -= amount;
        Ok(DebitOutcome::Debited {
            balance_after: *balance,
        })
    }

    async fn credit(&self, user_id: &str, amount: u32) -> StoreResult<u32> {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(user_id.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }

    async fn record_transaction(&self, transaction: &CreditTransaction) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .transactions
            .entry(transaction.user_id.clone())
            .or_default()
            .push(transaction.clone());
        Ok(())
    }

    async fn recent_transactions(&self, user_id: &str, limit: u32) -> StoreResult<Vec<CreditTransaction>> {
        let state = self.state.lock().await;
        let mut transactions = state.transactions.get(user_id).cloned().unwrap_or_default();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(limit.clamp(1, 100) as usize);
        Ok(transactions)
    }
}
