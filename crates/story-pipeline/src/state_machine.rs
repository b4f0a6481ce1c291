//! Page state machine.
//!
//! Pending -> Generated and Pending -> Failed, both terminal for a given job
//! id. Webhooks and the reconciliation sweeper feed results through the same
//! [`PageStateMachine::apply_page_result`], which writes only if the page is
//! still Pending on the reporting job. A repeated or superseded result is a
//! no-op, so side effects (refund, completion check, narration) run once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use story_firestore::CasOutcome;
use story_models::{
    AssetKind, CreditOperationType, JobId, JobOutcome, JobReport, PageStatus, StoryPage,
};

use crate::aggregator::StoryAggregator;
use crate::error::PipelineResult;
use crate::ledger::CreditLedger;
use crate::logging::PageLogger;
use crate::metrics::record_page_transition;
use crate::narration::Narrator;
use crate::store::StoryStore;

/// Where a page result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Webhook,
    Sweep,
    Submission,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Webhook => "webhook",
            ResultSource::Sweep => "sweep",
            ResultSource::Submission => "submission",
        }
    }
}

/// What applying a result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum TransitionEffect {
    /// The page was no longer Pending on this job; nothing changed
    Skipped,
    PageGenerated { story_completed: bool },
    PageFailed { story_failed: bool, refunded: u32 },
}

impl TransitionEffect {
    pub fn is_applied(&self) -> bool {
        !matches!(self, TransitionEffect::Skipped)
    }
}

/// Apply `outcome` to `page` if it is still Pending on `job_id`.
///
/// Returns `false` and leaves the page untouched otherwise. A success without
/// an asset URL fails the page.
pub fn transition_page(page: &mut StoryPage, job_id: &JobId, outcome: &JobOutcome, now: DateTime<Utc>) -> bool {
    if page.status != PageStatus::Pending || !page.is_current_job(job_id) {
        return false;
    }

    match outcome {
        JobOutcome::Succeeded { asset_url } if !asset_url.is_empty() => {
            page.status = PageStatus::Generated;
            page.image_url = asset_url.clone();
            page.error_message = None;
        }
        JobOutcome::Succeeded { .. } => {
            page.status = PageStatus::Failed;
            page.error_message = Some("Job completed without an image URL".to_string());
        }
        JobOutcome::Failed { reason } => {
            page.status = PageStatus::Failed;
            page.error_message = Some(reason.clone());
        }
    }
    page.updated_at = now;
    true
}

pub struct PageStateMachine {
    stories: Arc<dyn StoryStore>,
    ledger: CreditLedger,
    aggregator: Arc<StoryAggregator>,
    narrator: Option<Arc<Narrator>>,
}

impl PageStateMachine {
    pub fn new(
        stories: Arc<dyn StoryStore>,
        ledger: CreditLedger,
        aggregator: Arc<StoryAggregator>,
        narrator: Option<Arc<Narrator>>,
    ) -> Self {
        Self {
            stories,
            ledger,
            aggregator,
            narrator,
        }
    }

    /// Apply a webhook or poll report addressed by job id.
    ///
    /// Returns `None` when no page's current attempt is `job_id` (unknown or
    /// superseded job).
    pub async fn apply_job_result(
        &self,
        job_id: &JobId,
        report: &JobReport,
        source: ResultSource,
    ) -> PipelineResult<Option<TransitionEffect>> {
        let Some(page) = self.stories.find_page_by_job(job_id).await? else {
            warn!(job_id = %job_id, source = source.as_str(), "No page is waiting on this job");
            return Ok(None);
        };

        let Some(outcome) = report.classify(AssetKind::Image) else {
            PageLogger::new(&page).log_skipped(source.as_str(), "job still in flight");
            return Ok(Some(TransitionEffect::Skipped));
        };

        self.apply_page_result(&page, outcome, source).await.map(Some)
    }

    /// Apply a terminal outcome for the page's current job.
    pub async fn apply_page_result(
        &self,
        page: &StoryPage,
        outcome: JobOutcome,
        source: ResultSource,
    ) -> PipelineResult<TransitionEffect> {
        let logger = PageLogger::new(page);
        let Some(job_id) = page.job_id.clone() else {
            logger.log_skipped(source.as_str(), "page has no job");
            return Ok(TransitionEffect::Skipped);
        };

        let mut refund = 0u32;
        let written = self
            .stories
            .update_page(&page.story_id, &page.id, &mut |p: &mut StoryPage| {
                refund = 0;
                let charged = p.credits_charged;
                if !transition_page(p, &job_id, &outcome, Utc::now()) {
                    return false;
                }
                if p.is_failed() {
                    refund = charged;
                    p.credits_charged = 0;
                }
                true
            })
            .await?;

        let updated = match written {
            CasOutcome::Written(updated) => updated,
            CasOutcome::Unchanged(current) => {
                logger.log_skipped(source.as_str(), current.status.as_str());
                record_page_transition("skipped", source.as_str());
                return Ok(TransitionEffect::Skipped);
            }
            CasOutcome::Missing => {
                logger.log_skipped(source.as_str(), "page no longer exists");
                return Ok(TransitionEffect::Skipped);
            }
        };

        if updated.is_generated() {
            logger.log_generated(source.as_str());
            record_page_transition("generated", source.as_str());
            self.after_generated(&updated).await;

            let story_completed = match self.aggregator.check_story_completion(&updated.story_id).await {
                Ok(completed) => completed,
                Err(e) => {
                    logger.log_error(&format!("completion check failed: {}", e));
                    false
                }
            };
            return Ok(TransitionEffect::PageGenerated { story_completed });
        }

        let reason = updated.error_message.clone().unwrap_or_default();
        logger.log_failed(source.as_str(), &reason);
        record_page_transition("failed", source.as_str());

        if refund > 0 {
            match self.stories.get_story(&updated.story_id).await {
                Ok(Some(story)) => {
                    self.ledger
                        .refund(
                            &story.user_id,
                            refund,
                            CreditOperationType::PageImage,
                            updated.id.as_str(),
                            "page generation failed",
                        )
                        .await
                }
                Ok(None) => error!(story_id = %updated.story_id, "Story missing; page refund skipped"),
                Err(e) => error!(story_id = %updated.story_id, error = %e, "Story lookup failed; page refund skipped"),
            }
        }

        let story_failed = self.check_failure(&updated, &logger).await;
        Ok(TransitionEffect::PageFailed {
            story_failed,
            refunded: refund,
        })
    }

    /// Fail a page whose job could not be submitted.
    ///
    /// Guarded on the page still being Pending on the job id it had before the
    /// submission attempt. Credits are handled by the caller.
    pub async fn mark_submission_failed(&self, page: &StoryPage, reason: &str) -> PipelineResult<TransitionEffect> {
        let expected_job = page.job_id.clone();
        let written = self
            .stories
            .update_page(&page.story_id, &page.id, &mut |p: &mut StoryPage| {
                if p.status != PageStatus::Pending || p.job_id != expected_job {
                    return false;
                }
                p.status = PageStatus::Failed;
                p.error_message = Some(reason.to_string());
                p.updated_at = Utc::now();
                true
            })
            .await?;

        let logger = PageLogger::new(page);
        let CasOutcome::Written(updated) = written else {
            return Ok(TransitionEffect::Skipped);
        };

        logger.log_failed(ResultSource::Submission.as_str(), reason);
        record_page_transition("failed", ResultSource::Submission.as_str());
        let story_failed = self.check_failure(&updated, &logger).await;
        Ok(TransitionEffect::PageFailed {
            story_failed,
            refunded: 0,
        })
    }

    async fn check_failure(&self, page: &StoryPage, logger: &PageLogger) -> bool {
        match self.aggregator.check_story_failure(&page.story_id).await {
            Ok(failed) => failed,
            Err(e) => {
                logger.log_error(&format!("failure check failed: {}", e));
                false
            }
        }
    }

    async fn after_generated(&self, page: &StoryPage) {
        let Some(narrator) = &self.narrator else {
            return;
        };

        match self.stories.get_story(&page.story_id).await {
            Ok(Some(story)) if story.audio_enabled() => {
                narrator.spawn_narration(story.user_id.clone(), story.voice().map(str::to_string), page.clone());
            }
            Ok(_) => {}
            Err(e) => warn!(story_id = %page.story_id, error = %e, "Story lookup failed; narration skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use story_models::{ArtStyle, Story, StoryStatus};

    use crate::cache::StoryListCache;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: CreditLedger,
        machine: PageStateMachine,
        story: Story,
        pages: Vec<StoryPage>,
    }

    async fn fixture(n: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = CreditLedger::new(store.clone(), 10);
        ledger.ensure_account("user-1").await.unwrap();

        let story = Story::new("user-1", "Title", None, ArtStyle::Cartoon, None);
        let pages: Vec<StoryPage> = (1..=n)
            .map(|i| StoryPage::new(story.id.clone(), i, "words here", "prompt"))
            .collect();
        store.create_story(&story, &pages).await.unwrap();

        let mut submitted = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            let job_id = JobId::from(format!("job-{}", i + 1));
            ledger
                .debit("user-1", 1, CreditOperationType::PageImage, page.id.as_str())
                .await
                .unwrap();
            let assigned = job_id.clone();
            let updated = store
                .update_page(&story.id, &page.id, &mut |p: &mut StoryPage| {
                    p.job_id = Some(assigned.clone());
                    p.credits_charged = 1;
                    true
                })
                .await
                .unwrap()
                .into_inner()
                .unwrap();
            store.index_page_job(&job_id, &story.id, &page.id).await.unwrap();
            submitted.push(updated);
        }

        let aggregator = Arc::new(StoryAggregator::new(
            store.clone(),
            StoryListCache::new(Duration::from_secs(60)),
        ));
        let machine = PageStateMachine::new(store.clone(), ledger.clone(), aggregator, None);

        Fixture {
            store,
            ledger,
            machine,
            story,
            pages: submitted,
        }
    }

    #[test]
    fn test_transition_requires_pending_and_current_job() {
        let mut page = StoryPage::new(story_models::StoryId::new(), 1, "t", "p");
        let job = JobId::from("job-1");
        let now = Utc::now();

        // No job assigned yet
        assert!(!transition_page(&mut page, &job, &JobOutcome::succeeded("u"), now));

        page.job_id = Some(job.clone());
        assert!(!transition_page(&mut page, &JobId::from("other"), &JobOutcome::succeeded("u"), now));
        assert!(transition_page(&mut page, &job, &JobOutcome::succeeded("u"), now));
        assert_eq!(page.status, PageStatus::Generated);

        // Terminal: a later failure report is ignored
        assert!(!transition_page(&mut page, &job, &JobOutcome::failed("late"), now));
        assert_eq!(page.image_url, "u");
    }

    #[test]
    fn test_success_without_url_fails_page() {
        let mut page = StoryPage::new(story_models::StoryId::new(), 1, "t", "p");
        let job = JobId::from("job-1");
        page.job_id = Some(job.clone());
        assert!(transition_page(&mut page, &job, &JobOutcome::succeeded(""), Utc::now()));
        assert_eq!(page.status, PageStatus::Failed);
        assert!(page.image_url.is_empty());
    }

    #[tokio::test]
    async fn test_generated_result_completes_single_page_story() {
        let f = fixture(1).await;
        let report = JobReport::new(
            "OK",
            Some(serde_json::json!({"images": [{"url": "https://cdn.example/1.png"}]})),
        );

        let effect = f
            .machine
            .apply_job_result(&JobId::from("job-1"), &report, ResultSource::Webhook)
            .await
            .unwrap();
        assert_eq!(effect, Some(TransitionEffect::PageGenerated { story_completed: true }));

        let story = f.store.get_story(&f.story.id).await.unwrap().unwrap();
        assert_eq!(story.status, StoryStatus::Completed);
    }

    #[tokio::test]
    async fn test_repeated_terminal_result_is_noop() {
        let f = fixture(2).await;
        let report = JobReport::new("ERROR", None).with_error("safety filter");
        let job = JobId::from("job-1");

        let first = f.machine.apply_job_result(&job, &report, ResultSource::Webhook).await.unwrap();
        assert_eq!(
            first,
            Some(TransitionEffect::PageFailed {
                story_failed: false,
                refunded: 1
            })
        );

        let balance = f.ledger.get_balance("user-1").await.unwrap();
        let second = f
            .machine
            .apply_page_result(&f.pages[0], JobOutcome::failed("safety filter"), ResultSource::Sweep)
            .await
            .unwrap();
        assert_eq!(second, TransitionEffect::Skipped);
        assert_eq!(f.ledger.get_balance("user-1").await.unwrap(), balance);
    }

    #[tokio::test]
    async fn test_all_pages_failed_fails_story() {
        let f = fixture(2).await;
        let report = JobReport::new("ERROR", None);

        f.machine
            .apply_job_result(&JobId::from("job-1"), &report, ResultSource::Webhook)
            .await
            .unwrap();
        let effect = f
            .machine
            .apply_job_result(&JobId::from("job-2"), &report, ResultSource::Webhook)
            .await
            .unwrap();
        assert_eq!(
            effect,
            Some(TransitionEffect::PageFailed {
                story_failed: true,
                refunded: 1
            })
        );
        // 10 signup, 2 debited, 2 refunded
        assert_eq!(f.ledger.get_balance("user-1").await.unwrap(), 10);
        assert_eq!(
            f.store.get_story(&f.story.id).await.unwrap().unwrap().status,
            StoryStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_in_flight_report_is_skipped() {
        let f = fixture(1).await;
        let effect = f
            .machine
            .apply_job_result(&JobId::from("job-1"), &JobReport::new("IN_PROGRESS", None), ResultSource::Webhook)
            .await
            .unwrap();
        assert_eq!(effect, Some(TransitionEffect::Skipped));
        assert_eq!(f.pages[0].status, PageStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_job_is_ignored() {
        let f = fixture(1).await;
        let effect = f
            .machine
            .apply_job_result(&JobId::from("nope"), &JobReport::new("OK", None), ResultSource::Webhook)
            .await
            .unwrap();
        assert_eq!(effect, None);
    }

    #[tokio::test]
    async fn test_concurrent_results_converge() {
        let f = Arc::new(fixture(1).await);
        let page = f.pages[0].clone();

        let webhook = {
            let f = Arc::clone(&f);
            let page = page.clone();
            tokio::spawn(async move {
                f.machine
                    .apply_page_result(&page, JobOutcome::succeeded("https://cdn.example/a.png"), ResultSource::Webhook)
                    .await
                    .unwrap()
            })
        };
        let sweep = {
            let f = Arc::clone(&f);
            tokio::spawn(async move {
                f.machine
                    .apply_page_result(&page, JobOutcome::succeeded("https://cdn.example/a.png"), ResultSource::Sweep)
                    .await
                    .unwrap()
            })
        };

        let effects = [webhook.await.unwrap(), sweep.await.unwrap()];
        assert_eq!(effects.iter().filter(|e| e.is_applied()).count(), 1);

        let stored = f.store.get_pages(&f.story.id).await.unwrap();
        assert_eq!(stored[0].status, PageStatus::Generated);
    }
}
