//! Story-level status derived from page states.
//!
//! Story status is never tracked separately from the pages: completion and
//! failure are re-derived from the page records on every evaluation, and only
//! the evaluation whose conditional write succeeds runs the side effects.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use story_firestore::CasOutcome;
use story_models::{PageStatus, Story, StoryAnalytics, StoryId, StoryPage, StoryStatus};

use crate::cache::StoryListCache;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::record_story_finished;
use crate::store::StoryStore;

/// Progress projection for status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryProgress {
    pub story_id: StoryId,
    pub status: StoryStatus,
    pub total_pages: u32,
    pub generated_pages: u32,
    pub failed_pages: u32,
    pub pending_pages: u32,
    /// `round(generated / total * 100)`
    pub progress_percent: u32,
}

impl StoryProgress {
    pub fn from_pages(story_id: &StoryId, status: StoryStatus, pages: &[StoryPage]) -> Self {
        let total = pages.len() as u32;
        let generated = pages.iter().filter(|p| p.is_generated()).count() as u32;
        let failed = pages.iter().filter(|p| p.is_failed()).count() as u32;
        let pending = pages.iter().filter(|p| p.status == PageStatus::Pending).count() as u32;

        let progress_percent = if total == 0 {
            0
        } else {
            (generated as f64 / total as f64 * 100.0).round() as u32
        };

        Self {
            story_id: story_id.clone(),
            status,
            total_pages: total,
            generated_pages: generated,
            failed_pages: failed,
            pending_pages: pending,
            progress_percent,
        }
    }
}

/// Every page generated with a usable image.
pub fn all_generated(pages: &[StoryPage]) -> bool {
    !pages.is_empty() && pages.iter().all(StoryPage::is_generated)
}

/// Every page failed.
pub fn all_failed(pages: &[StoryPage]) -> bool {
    !pages.is_empty() && pages.iter().all(StoryPage::is_failed)
}

pub struct StoryAggregator {
    stories: Arc<dyn StoryStore>,
    cache: StoryListCache,
}

impl StoryAggregator {
    pub fn new(stories: Arc<dyn StoryStore>, cache: StoryListCache) -> Self {
        Self { stories, cache }
    }

    /// Whether every page is generated; completes the story if so.
    ///
    /// Safe to call redundantly and concurrently: the Completed write is
    /// conditional on the story still being Pending or Generating, and only
    /// the caller that performs it writes analytics and invalidates the cache.
    pub async fn check_story_completion(&self, story_id: &StoryId) -> PipelineResult<bool> {
        let pages = self.stories.get_pages(story_id).await?;
        if !all_generated(&pages) {
            return Ok(false);
        }

        let outcome = self
            .stories
            .update_story(story_id, &mut |story: &mut Story| {
                if !matches!(story.status, StoryStatus::Pending | StoryStatus::Generating) {
                    return false;
                }
                let now = Utc::now();
                story.status = StoryStatus::Completed;
                story.completed_at = Some(now);
                story.updated_at = now;
                true
            })
            .await?;

        if let CasOutcome::Written(story) = outcome {
            info!(story_id = %story_id, user_id = %story.user_id, pages = pages.len(), "Story completed");
            record_story_finished("completed");

            let analytics = StoryAnalytics::compute(story_id, &pages);
            if let Err(e) = self.stories.upsert_analytics(&analytics).await {
                error!(story_id = %story_id, error = %e, "Failed to write story analytics");
            }
            self.cache.invalidate(&story.user_id).await;
        }

        Ok(true)
    }

    /// Fail the story when every page has failed.
    ///
    /// Mixed generated/failed stories stay Generating so failed pages can be
    /// retried. Returns `true` if this call failed the story.
    pub async fn check_story_failure(&self, story_id: &StoryId) -> PipelineResult<bool> {
        let pages = self.stories.get_pages(story_id).await?;
        if !all_failed(&pages) {
            return Ok(false);
        }

        let reason = pages
            .iter()
            .find_map(|p| p.error_message.clone())
            .unwrap_or_else(|| "All pages failed".to_string());

        let outcome = self
            .stories
            .update_story(story_id, &mut |story: &mut Story| {
                if story.status.is_terminal() {
                    return false;
                }
                let now = Utc::now();
                story.status = StoryStatus::Failed;
                story.failed_at = Some(now);
                story.error_message = Some(reason.clone());
                story.updated_at = now;
                true
            })
            .await?;

        match outcome {
            CasOutcome::Written(story) => {
                info!(story_id = %story_id, user_id = %story.user_id, "Story failed: every page failed");
                record_story_finished("failed");
                self.cache.invalidate(&story.user_id).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn get_story_status(&self, story_id: &StoryId) -> PipelineResult<StoryProgress> {
        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("story {}", story_id)))?;
        let pages = self.stories.get_pages(story_id).await?;
        Ok(StoryProgress::from_pages(story_id, story.status, &pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use story_models::{ArtStyle, Story};

    use crate::store::MemoryStore;

    async fn setup(n: u32) -> (Arc<MemoryStore>, StoryAggregator, Story, Vec<StoryPage>) {
        let store = Arc::new(MemoryStore::new());
        let story = Story::new("user-1", "Title", None, ArtStyle::Watercolor, None);
        let pages: Vec<StoryPage> = (1..=n)
            .map(|i| StoryPage::new(story.id.clone(), i, "one two three", "prompt"))
            .collect();
        store.create_story(&story, &pages).await.unwrap();
        let aggregator = StoryAggregator::new(store.clone(), StoryListCache::new(Duration::from_secs(60)));
        (store, aggregator, story, pages)
    }

    async fn set_page(store: &MemoryStore, page: &StoryPage, status: PageStatus, url: &str) {
        let url = url.to_string();
        store
            .update_page(&page.story_id, &page.id, &mut |p: &mut StoryPage| {
                p.status = status;
                p.image_url = url.clone();
                true
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_progress_rounds() {
        let story_id = StoryId::new();
        let mut pages: Vec<StoryPage> = (1..=3).map(|i| StoryPage::new(story_id.clone(), i, "t", "p")).collect();
        pages[0].status = PageStatus::Generated;
        pages[0].image_url = "u".into();
        pages[1].status = PageStatus::Failed;

        let progress = StoryProgress::from_pages(&story_id, StoryStatus::Generating, &pages);
        assert_eq!(progress.progress_percent, 33);
        assert_eq!(progress.generated_pages, 1);
        assert_eq!(progress.failed_pages, 1);
        assert_eq!(progress.pending_pages, 1);

        pages[1].status = PageStatus::Generated;
        pages[1].image_url = "u".into();
        let progress = StoryProgress::from_pages(&story_id, StoryStatus::Generating, &pages);
        assert_eq!(progress.progress_percent, 67);

        let empty = StoryProgress::from_pages(&story_id, StoryStatus::Pending, &[]);
        assert_eq!(empty.progress_percent, 0);
    }

    #[test]
    fn test_generated_without_url_does_not_count() {
        let story_id = StoryId::new();
        let mut page = StoryPage::new(story_id, 1, "t", "p");
        page.status = PageStatus::Generated;
        assert!(!all_generated(&[page]));
        assert!(!all_generated(&[]));
    }

    #[tokio::test]
    async fn test_completion_requires_every_page() {
        let (store, aggregator, story, pages) = setup(2).await;
        set_page(&store, &pages[0], PageStatus::Generated, "https://cdn.example/1.png").await;
        assert!(!aggregator.check_story_completion(&story.id).await.unwrap());
        assert_eq!(
            store.get_story(&story.id).await.unwrap().unwrap().status,
            StoryStatus::Generating
        );

        set_page(&store, &pages[1], PageStatus::Generated, "https://cdn.example/2.png").await;
        assert!(aggregator.check_story_completion(&story.id).await.unwrap());

        let stored = store.get_story(&story.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StoryStatus::Completed);
        assert!(stored.completed_at.is_some());

        let analytics = store.get_analytics(&story.id).await.unwrap().unwrap();
        assert_eq!(analytics.word_count, 6);
        assert_eq!(analytics.avg_read_time_secs, 60);
    }

    #[tokio::test]
    async fn test_redundant_completion_keeps_first_timestamp() {
        let (store, aggregator, story, pages) = setup(1).await;
        set_page(&store, &pages[0], PageStatus::Generated, "https://cdn.example/1.png").await;

        assert!(aggregator.check_story_completion(&story.id).await.unwrap());
        let first = store.get_story(&story.id).await.unwrap().unwrap().completed_at;
        assert!(aggregator.check_story_completion(&story.id).await.unwrap());
        let second = store.get_story(&story.id).await.unwrap().unwrap().completed_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_partial_failure_stays_generating() {
        let (store, aggregator, story, pages) = setup(2).await;
        set_page(&store, &pages[0], PageStatus::Generated, "https://cdn.example/1.png").await;
        set_page(&store, &pages[1], PageStatus::Failed, "").await;

        assert!(!aggregator.check_story_failure(&story.id).await.unwrap());
        assert!(!aggregator.check_story_completion(&story.id).await.unwrap());
        assert_eq!(
            store.get_story(&story.id).await.unwrap().unwrap().status,
            StoryStatus::Generating
        );
    }

    #[tokio::test]
    async fn test_all_failed_fails_story() {
        let (store, aggregator, story, pages) = setup(2).await;
        for page in &pages {
            set_page(&store, page, PageStatus::Failed, "").await;
        }
        assert!(aggregator.check_story_failure(&story.id).await.unwrap());
        assert!(!aggregator.check_story_failure(&story.id).await.unwrap());

        let progress = aggregator.get_story_status(&story.id).await.unwrap();
        assert_eq!(progress.status, StoryStatus::Failed);
        assert_eq!(progress.failed_pages, 2);
    }
}
