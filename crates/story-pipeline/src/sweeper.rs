//! Reconciliation sweeper.
//!
//! Webhooks can be lost. Whenever a client reads a non-terminal story, the
//! sweeper polls the job system for every page that has been Pending longer
//! than the grace window and feeds terminal results through the page state
//! machine, exactly as a webhook would.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

use story_genai::JobResultLookup;
use story_models::{AssetKind, JobPoll, StoryId};

use crate::aggregator::StoryAggregator;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::record_sweep;
use crate::state_machine::{PageStateMachine, ResultSource, TransitionEffect};
use crate::store::StoryStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stale pages looked up
    pub checked: u32,
    /// Pages moved to a terminal state by this sweep
    pub recovered: u32,
    pub still_pending: u32,
    pub lookup_errors: u32,
}

pub struct ReconciliationSweeper {
    stories: Arc<dyn StoryStore>,
    jobs: Arc<dyn JobResultLookup>,
    machine: Arc<PageStateMachine>,
    aggregator: Arc<StoryAggregator>,
    grace: chrono::Duration,
    in_flight: Mutex<HashSet<StoryId>>,
}

/// Clears a story's in-flight marker when the sweep ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<StoryId>>,
    story_id: StoryId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.story_id);
    }
}

impl ReconciliationSweeper {
    pub fn new(
        stories: Arc<dyn StoryStore>,
        jobs: Arc<dyn JobResultLookup>,
        machine: Arc<PageStateMachine>,
        aggregator: Arc<StoryAggregator>,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            stories,
            jobs,
            machine,
            aggregator,
            grace,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, story_id: &StoryId) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(story_id.clone()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            story_id: story_id.clone(),
        })
    }

    /// Start a background sweep unless one is already running for the story.
    ///
    /// Returns `true` if a sweep was started. Never blocks the caller.
    pub fn spawn_sweep(self: &Arc<Self>, story_id: StoryId) -> bool {
        if self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).contains(&story_id) {
            return false;
        }

        let sweeper = Arc::clone(self);
        let span = tracing::info_span!("sweep", story_id = %story_id);
        tokio::spawn(
            async move {
                match sweeper.sweep_story(&story_id).await {
                    Ok(Some(report)) if report.recovered > 0 => {
                        info!(recovered = report.recovered, still_pending = report.still_pending, "Sweep recovered pages")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Sweep failed"),
                }
            }
            .instrument(span),
        );
        true
    }

    /// Reconcile one story now.
    ///
    /// Returns `None` if a sweep for the story is already running.
    pub async fn sweep_story(&self, story_id: &StoryId) -> PipelineResult<Option<SweepReport>> {
        let Some(_guard) = self.claim(story_id) else {
            debug!(story_id = %story_id, "Sweep already in flight");
            return Ok(None);
        };

        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("story {}", story_id)))?;
        let mut report = SweepReport::default();
        if story.status.is_terminal() {
            return Ok(Some(report));
        }

        let now = Utc::now();
        let pages = self.stories.get_pages(story_id).await?;
        for page in pages.iter().filter(|p| p.is_stale(self.grace, now)) {
            let (Some(job_id), Some(endpoint)) = (&page.job_id, &page.job_endpoint) else {
                continue;
            };
            report.checked += 1;

            let poll = match self.jobs.lookup(endpoint, job_id).await {
                Ok(poll) => poll,
                Err(e) => {
                    warn!(page_id = %page.id, job_id = %job_id, error = %e, "Job lookup failed; page left pending");
                    report.lookup_errors += 1;
                    continue;
                }
            };

            let JobPoll::Finished(job_report) = poll else {
                report.still_pending += 1;
                continue;
            };
            let Some(outcome) = job_report.classify(AssetKind::Image) else {
                report.still_pending += 1;
                continue;
            };

            let effect = self.machine.apply_page_result(page, outcome, ResultSource::Sweep).await?;
            if effect != TransitionEffect::Skipped {
                report.recovered += 1;
            }
        }

        if report.recovered > 0 {
            self.aggregator.check_story_completion(story_id).await?;
        }
        record_sweep(report.recovered as u64);
        debug!(
            story_id = %story_id,
            checked = report.checked,
            recovered = report.recovered,
            lookup_errors = report.lookup_errors,
            "Sweep finished"
        );
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use story_models::{ArtStyle, JobId, JobReport, PageStatus, Story, StoryPage, StoryStatus};

    use crate::cache::StoryListCache;
    use crate::ledger::CreditLedger;
    use crate::store::MemoryStore;
    use crate::testing::FakeJobLookup;

    struct Fixture {
        store: Arc<MemoryStore>,
        jobs: Arc<FakeJobLookup>,
        sweeper: Arc<ReconciliationSweeper>,
        story: Story,
    }

    /// A story whose pages were submitted `age` ago as job-1..job-n.
    async fn fixture(n: u32, age: chrono::Duration) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = CreditLedger::new(store.clone(), 10);
        ledger.ensure_account("user-1").await.unwrap();

        let story = Story::new("user-1", "Title", None, ArtStyle::Anime, None);
        let pages: Vec<StoryPage> = (1..=n)
            .map(|i| {
                let mut page = StoryPage::new(story.id.clone(), i, "text", "prompt");
                page.job_id = Some(JobId::from(format!("job-{}", i)));
                page.job_endpoint = Some("fake/image".to_string());
                page.credits_charged = 1;
                page.updated_at = Utc::now() - age;
                page
            })
            .collect();
        store.create_story(&story, &pages).await.unwrap();
        for page in &pages {
            store
                .index_page_job(page.job_id.as_ref().unwrap(), &story.id, &page.id)
                .await
                .unwrap();
        }

        let aggregator = Arc::new(StoryAggregator::new(
            store.clone(),
            StoryListCache::new(Duration::from_secs(60)),
        ));
        let machine = Arc::new(PageStateMachine::new(store.clone(), ledger, aggregator.clone(), None));
        let jobs = Arc::new(FakeJobLookup::new());
        let sweeper = Arc::new(ReconciliationSweeper::new(
            store.clone(),
            jobs.clone(),
            machine,
            aggregator,
            chrono::Duration::seconds(10),
        ));

        Fixture {
            store,
            jobs,
            sweeper,
            story,
        }
    }

    fn finished(url: &str) -> JobPoll {
        JobPoll::Finished(JobReport::new(
            "OK",
            Some(serde_json::json!({"images": [{"url": url}]})),
        ))
    }

    #[tokio::test]
    async fn test_missed_webhook_is_recovered() {
        let f = fixture(2, chrono::Duration::seconds(60)).await;
        f.jobs.set(&JobId::from("job-1"), finished("https://cdn.example/1.png"));
        f.jobs.set(&JobId::from("job-2"), finished("https://cdn.example/2.png"));

        let report = f.sweeper.sweep_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.recovered, 2);

        let story = f.store.get_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(story.status, StoryStatus::Completed);
    }

    #[tokio::test]
    async fn test_fresh_pages_are_not_polled() {
        let f = fixture(1, chrono::Duration::seconds(1)).await;
        f.jobs.set(&JobId::from("job-1"), finished("https://cdn.example/1.png"));

        let report = f.sweeper.sweep_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(f.jobs.lookups(), 0);
    }

    #[tokio::test]
    async fn test_lookup_error_leaves_page_pending() {
        let f = fixture(1, chrono::Duration::seconds(60)).await;
        f.jobs.fail(true);

        let report = f.sweeper.sweep_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(report.lookup_errors, 1);
        assert_eq!(report.recovered, 0);

        let pages = f.store.get_pages(&f.story.id).await.unwrap();
        assert_eq!(pages[0].status, PageStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_job_is_left_alone() {
        let f = fixture(1, chrono::Duration::seconds(60)).await;

        let report = f.sweeper.sweep_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(report.still_pending, 1);
        assert_eq!(
            f.store.get_pages(&f.story.id).await.unwrap()[0].status,
            PageStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_polled_error_fails_page() {
        let f = fixture(2, chrono::Duration::seconds(60)).await;
        f.jobs.set(
            &JobId::from("job-1"),
            JobPoll::Finished(JobReport::new("ERROR", None).with_error("nsfw")),
        );

        let report = f.sweeper.sweep_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.still_pending, 1);

        let pages = f.store.get_pages(&f.story.id).await.unwrap();
        assert_eq!(pages[0].status, PageStatus::Failed);
        assert_eq!(pages[0].error_message.as_deref(), Some("nsfw"));
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_are_deduplicated() {
        let f = fixture(1, chrono::Duration::seconds(60)).await;
        let _guard = f.sweeper.claim(&f.story.id).unwrap();

        assert!(f.sweeper.sweep_story(&f.story.id).await.unwrap().is_none());
        assert!(!f.sweeper.spawn_sweep(f.story.id.clone()));
    }

    #[tokio::test]
    async fn test_terminal_story_is_skipped() {
        let f = fixture(1, chrono::Duration::seconds(60)).await;
        f.store
            .update_story(&f.story.id, &mut |s: &mut Story| {
                s.status = StoryStatus::Completed;
                true
            })
            .await
            .unwrap();
        f.jobs.set(&JobId::from("job-1"), finished("https://cdn.example/1.png"));

        let report = f.sweeper.sweep_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(f.jobs.lookups(), 0);
    }
}
