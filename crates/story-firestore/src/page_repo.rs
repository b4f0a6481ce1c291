//! Page documents and the job-id index.
//!
//! Pages live under `stories/{story_id}/pages/{page_id}`. Webhooks only carry a
//! job id, so every submitted job also gets a `page_jobs/{job_id}` document
//! pointing back at its page.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use story_models::{JobId, PageId, StoryId, StoryPage};

use crate::cas::{compare_and_set, CasOutcome};
use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::encode_fields;

pub const PAGE_JOBS_COLLECTION: &str = "page_jobs";

const LIST_PAGE_SIZE: u32 = 300;

/// `page_jobs/{job_id}` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageJobIndex {
    pub story_id: StoryId,
    pub page_id: PageId,
}

#[derive(Clone)]
pub struct PageRepository {
    client: FirestoreClient,
}

impl PageRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub fn collection(story_id: &StoryId) -> String {
        format!("stories/{}/pages", story_id)
    }

    pub async fn get(&self, story_id: &StoryId, page_id: &PageId) -> FirestoreResult<Option<StoryPage>> {
        self.client
            .get_document(&Self::collection(story_id), page_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    /// All pages of a story ordered by page number.
    pub async fn list(&self, story_id: &StoryId) -> FirestoreResult<Vec<StoryPage>> {
        let collection = Self::collection(story_id);
        let mut pages = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_documents(&collection, Some(LIST_PAGE_SIZE), page_token.as_deref())
                .await?;

            for doc in response.documents.unwrap_or_default() {
                match doc.decode::<StoryPage>() {
                    Ok(page) => pages.push(page),
                    Err(e) => warn!(story_id = %story_id, error = %e, "Skipping undecodable page"),
                }
            }

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        pages.sort_by_key(|p| p.page_number);
        Ok(pages)
    }

    /// Atomically apply `mutate` to a page.
    pub async fn update_if<F>(
        &self,
        story_id: &StoryId,
        page_id: &PageId,
        mutate: F,
    ) -> FirestoreResult<CasOutcome<StoryPage>>
    where
        F: FnMut(&mut StoryPage) -> bool,
    {
        compare_and_set(&self.client, &Self::collection(story_id), page_id.as_str(), mutate).await
    }

    /// Record which page a job belongs to.
    pub async fn index_job(&self, job_id: &JobId, story_id: &StoryId, page_id: &PageId) -> FirestoreResult<()> {
        let entry = PageJobIndex {
            story_id: story_id.clone(),
            page_id: page_id.clone(),
        };
        self.client
            .update_document(PAGE_JOBS_COLLECTION, job_id.as_str(), encode_fields(&entry)?, None)
            .await?;
        debug!(job_id = %job_id, page_id = %page_id, "Indexed page job");
        Ok(())
    }

    pub async fn lookup_job(&self, job_id: &JobId) -> FirestoreResult<Option<PageJobIndex>> {
        self.client
            .get_document(PAGE_JOBS_COLLECTION, job_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }
}
