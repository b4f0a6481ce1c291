//! Story and analytics documents.

use tracing::info;

use story_models::{Story, StoryAnalytics, StoryId, StoryPage};

use crate::cas::{compare_and_set, CasOutcome};
use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::page_repo::PageRepository;
use crate::types::{encode_fields, StructuredQuery, ToFirestoreValue, Write};

pub const STORIES_COLLECTION: &str = "stories";
pub const ANALYTICS_COLLECTION: &str = "story_analytics";

/// Repository for `stories/{story_id}` and `story_analytics/{story_id}`.
#[derive(Clone)]
pub struct StoryRepository {
    client: FirestoreClient,
}

impl StoryRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Create the story and all of its pages in one batch.
    pub async fn create_with_pages(&self, story: &Story, pages: &[StoryPage]) -> FirestoreResult<()> {
        let mut writes = Vec::with_capacity(pages.len() + 1);
        writes.push(Write::create(
            self.client
                .full_document_name(STORIES_COLLECTION, story.id.as_str()),
            encode_fields(story)?,
        ));
        for page in pages {
            writes.push(Write::create(
                self.client.full_document_name(
                    &PageRepository::collection(&story.id),
                    page.id.as_str(),
                ),
                encode_fields(page)?,
            ));
        }

        self.client.batch_write(writes).await?;
        info!(
            story_id = %story.id,
            user_id = %story.user_id,
            pages = pages.len(),
            "Created story"
        );
        Ok(())
    }

    pub async fn get(&self, story_id: &StoryId) -> FirestoreResult<Option<Story>> {
        self.client
            .get_document(STORIES_COLLECTION, story_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    /// Stories owned by `user_id`, newest first.
    pub async fn list_for_user(&self, user_id: &str, limit: u32) -> FirestoreResult<Vec<Story>> {
        let query = StructuredQuery::collection(STORIES_COLLECTION)
            .where_eq("user_id", user_id.to_firestore_value());
        let docs = self.client.run_query("", query).await?;

        let mut stories = docs
            .iter()
            .map(|d| d.decode::<Story>())
            .collect::<FirestoreResult<Vec<_>>>()?;
        // Sorted here to avoid requiring a composite index
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        stories.truncate(limit as usize);
        Ok(stories)
    }

    /// Atomically apply `mutate` to the story.
    pub async fn update_if<F>(&self, story_id: &StoryId, mutate: F) -> FirestoreResult<CasOutcome<Story>>
    where
        F: FnMut(&mut Story) -> bool,
    {
        compare_and_set(&self.client, STORIES_COLLECTION, story_id.as_str(), mutate).await
    }

    /// Idempotent upsert of the story's analytics.
    pub async fn upsert_analytics(&self, analytics: &StoryAnalytics) -> FirestoreResult<()> {
        self.client
            .update_document(
                ANALYTICS_COLLECTION,
                analytics.story_id.as_str(),
                encode_fields(analytics)?,
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn get_analytics(&self, story_id: &StoryId) -> FirestoreResult<Option<StoryAnalytics>> {
        self.client
            .get_document(ANALYTICS_COLLECTION, story_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    /// Cheap reachability probe.
    pub async fn ping(&self) -> FirestoreResult<()> {
        self.client
            .list_documents(STORIES_COLLECTION, Some(1), None)
            .await
            .map(|_| ())
    }
}
