//! In-process generation fakes for pipeline and API tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use story_genai::{
    AudioGenerator, AudioRequest, GenAiError, GenAiResult, ImageGenerator, ImageRequest, JobResultLookup,
    ModelTrainer, ScriptGenerator, ScriptRequest, SubmittedJob, TrainingRequest,
};
use story_firestore::{CasOutcome, DebitOutcome};
use story_models::{
    CreditTransaction, JobId, JobPoll, PageId, ScriptPage, Story, StoryAnalytics, StoryId, StoryPage, StoryScript,
};

use crate::error::{StoreError, StoreResult};
use crate::pipeline::Generators;
use crate::store::{CreditStore, MemoryStore, Mutation, StoryStore, Stores};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A script with `n` numbered pages.
pub fn sample_script(n: u32) -> StoryScript {
    StoryScript {
        title: "The Brave Little Fox".to_string(),
        pages: (1..=n)
            .map(|i| ScriptPage {
                page_number: i,
                text: format!("Page {} of the fox's big adventure.", i),
                image_description: format!("the fox on step {} of the journey", i),
                emotion: Some("happy".to_string()),
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct FakeImageGenerator {
    next_job: AtomicU32,
    fail_submit: AtomicBool,
    submissions: Mutex<Vec<(ImageRequest, String)>>,
    sync_url: Mutex<String>,
}

impl FakeImageGenerator {
    pub fn new() -> Self {
        Self {
            sync_url: Mutex::new("https://cdn.example/preview.png".to_string()),
            ..Default::default()
        }
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_sync_url(&self, url: &str) {
        *lock(&self.sync_url) = url.to_string();
    }

    pub fn submissions(&self) -> Vec<(ImageRequest, String)> {
        lock(&self.submissions).clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn submit(&self, request: &ImageRequest, webhook_url: &str) -> GenAiResult<SubmittedJob> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(GenAiError::Api {
                service: "fake-image",
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.submissions).push((request.clone(), webhook_url.to_string()));
        Ok(SubmittedJob {
            job_id: JobId::from(format!("job-{}", n)),
            endpoint: "fake/image".to_string(),
            poll_url: None,
        })
    }

    async fn generate_sync(&self, _request: &ImageRequest) -> String {
        lock(&self.sync_url).clone()
    }
}

#[derive(Default)]
pub struct FakeAudioGenerator {
    calls: AtomicU32,
    url: Mutex<String>,
}

impl FakeAudioGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            url: Mutex::new("https://cdn.example/narration.mp3".to_string()),
        }
    }

    pub fn set_url(&self, url: &str) {
        *lock(&self.url) = url.to_string();
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioGenerator for FakeAudioGenerator {
    async fn submit(&self, _request: &AudioRequest, _webhook_url: &str) -> GenAiResult<SubmittedJob> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmittedJob {
            job_id: JobId::from(format!("audio-{}", n)),
            endpoint: "fake/audio".to_string(),
            poll_url: None,
        })
    }

    async fn generate_sync(&self, request: &AudioRequest) -> String {
        if request.text.trim().is_empty() {
            return String::new();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.url).clone()
    }
}

#[derive(Default)]
pub struct FakeScriptGenerator {
    calls: AtomicU32,
    fail: AtomicBool,
}

impl FakeScriptGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptGenerator for FakeScriptGenerator {
    async fn generate_script(&self, request: &ScriptRequest) -> GenAiResult<StoryScript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenAiError::AllModelsFailed("fake script writer down".to_string()));
        }
        Ok(sample_script(request.page_count))
    }
}

#[derive(Default)]
pub struct FakeTrainer {
    next_job: AtomicU32,
    fail: AtomicBool,
}

impl FakeTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelTrainer for FakeTrainer {
    async fn submit_training(&self, _request: &TrainingRequest, _webhook_url: &str) -> GenAiResult<SubmittedJob> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenAiError::Api {
                service: "fake-trainer",
                status: 500,
                body: "boom".to_string(),
            });
        }
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmittedJob {
            job_id: JobId::from(format!("train-{}", n)),
            endpoint: "fake/training".to_string(),
            poll_url: None,
        })
    }
}

/// Job lookup answering from a fixed table; unknown jobs are Pending.
#[derive(Default)]
pub struct FakeJobLookup {
    results: Mutex<HashMap<JobId, JobPoll>>,
    fail: AtomicBool,
    lookups: AtomicU32,
}

impl FakeJobLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, job_id: &JobId, poll: JobPoll) {
        lock(&self.results).insert(job_id.clone(), poll);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobResultLookup for FakeJobLookup {
    async fn lookup(&self, _endpoint: &str, job_id: &JobId) -> GenAiResult<JobPoll> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenAiError::Api {
                service: "fake-queue",
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(lock(&self.results).get(job_id).cloned().unwrap_or(JobPoll::Pending))
    }
}

/// Handles to every fake behind a [`Generators`] set.
#[derive(Clone)]
pub struct Fakes {
    pub image: Arc<FakeImageGenerator>,
    pub audio: Arc<FakeAudioGenerator>,
    pub script: Arc<FakeScriptGenerator>,
    pub trainer: Arc<FakeTrainer>,
    pub jobs: Arc<FakeJobLookup>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            image: Arc::new(FakeImageGenerator::new()),
            audio: Arc::new(FakeAudioGenerator::new()),
            script: Arc::new(FakeScriptGenerator::new()),
            trainer: Arc::new(FakeTrainer::new()),
            jobs: Arc::new(FakeJobLookup::new()),
        }
    }

    pub fn generators(&self) -> Generators {
        Generators {
            image: self.image.clone(),
            audio: self.audio.clone(),
            script: self.script.clone(),
            trainer: self.trainer.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory store that fails chosen operations a set number of times.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    index_failures: AtomicU32,
    credit_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryStore::new()),
            index_failures: AtomicU32::new(0),
            credit_failures: AtomicU32::new(0),
        })
    }

    /// Fail the next `times` job index writes.
    pub fn fail_index(&self, times: u32) {
        self.index_failures.store(times, Ordering::SeqCst);
    }

    /// Fail the next `times` balance increments.
    pub fn fail_credit(&self, times: u32) {
        self.credit_failures.store(times, Ordering::SeqCst);
    }

    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores {
            stories: self.clone(),
            models: self.inner.clone(),
            credits: self.clone(),
        }
    }

    fn trip(counter: &AtomicU32) -> StoreResult<()> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl StoryStore for FlakyStore {
    async fn create_story(&self, story: &Story, pages: &[StoryPage]) -> StoreResult<()> {
        self.inner.create_story(story, pages).await
    }

    async fn get_story(&self, story_id: &StoryId) -> StoreResult<Option<Story>> {
        self.inner.get_story(story_id).await
    }

    async fn list_stories(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Story>> {
        self.inner.list_stories(user_id, limit).await
    }

    async fn update_story(&self, story_id: &StoryId, mutate: Mutation<'_, Story>) -> StoreResult<CasOutcome<Story>> {
        self.inner.update_story(story_id, mutate).await
    }

    async fn get_pages(&self, story_id: &StoryId) -> StoreResult<Vec<StoryPage>> {
        self.inner.get_pages(story_id).await
    }

    async fn get_page(&self, story_id: &StoryId, page_id: &PageId) -> StoreResult<Option<StoryPage>> {
        self.inner.get_page(story_id, page_id).await
    }

    async fn update_page(
        &self,
        story_id: &StoryId,
        page_id: &PageId,
        mutate: Mutation<'_, StoryPage>,
    ) -> StoreResult<CasOutcome<StoryPage>> {
        self.inner.update_page(story_id, page_id, mutate).await
    }

    async fn index_page_job(&self, job_id: &JobId, story_id: &StoryId, page_id: &PageId) -> StoreResult<()> {
        Self::trip(&self.index_failures)?;
        self.inner.index_page_job(job_id, story_id, page_id).await
    }

    async fn find_page_by_job(&self, job_id: &JobId) -> StoreResult<Option<StoryPage>> {
        self.inner.find_page_by_job(job_id).await
    }

    async fn upsert_analytics(&self, analytics: &StoryAnalytics) -> StoreResult<()> {
        self.inner.upsert_analytics(analytics).await
    }

    async fn get_analytics(&self, story_id: &StoryId) -> StoreResult<Option<StoryAnalytics>> {
        self.inner.get_analytics(story_id).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

#[async_trait]
impl CreditStore for FlakyStore {
    async fn get_balance(&self, user_id: &str) -> StoreResult<u32> {
        self.inner.get_balance(user_id).await
    }

    async fn ensure_account(&self, user_id: &str, initial: u32) -> StoreResult<bool> {
        self.inner.ensure_account(user_id, initial).await
    }

    async fn try_debit(&self, user_id: &str, amount: u32) -> StoreResult<DebitOutcome> {
        self.inner.try_debit(user_id, amount).await
    }

    async fn credit(&self, user_id: &str, amount: u32) -> StoreResult<u32> {
        Self::trip(&self.credit_failures)?;
        self.inner.credit(user_id, amount).await
    }

    async fn record_transaction(&self, transaction: &CreditTransaction) -> StoreResult<()> {
        self.inner.record_transaction(transaction).await
    }

    async fn recent_transactions(&self, user_id: &str, limit: u32) -> StoreResult<Vec<CreditTransaction>> {
        self.inner.recent_transactions(user_id, limit).await
    }
}
