//! Story orchestration.
//!
//! Turns a script into a story with one Pending page per script entry, fans
//! out page image jobs, and serves status reads (which also dispatch the
//! reconciliation sweeper). Credits: the balance is checked for the whole
//! story up front, each page is debited right before its job is submitted,
//! and a page that does not complete is refunded by the state machine.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use story_firestore::CasOutcome;
use story_genai::{
    build_image_prompt, ImageGenerator, ImagePrompt, ImageRequest, NegativePromptPolicy, ScriptGenerator,
    ScriptRequest, SubmittedJob,
};
use story_models::{
    story_generation_cost, ArtStyle, CreditOperationType, IdentityReference, JobId, PageId, PageStatus,
    Personalization, Story, StoryId, StoryPage, StoryScript, StoryStatus, StorySummary, SubjectModel,
    SubjectModelId, PAGE_IMAGE_COST, PREVIEW_IMAGE_COST,
};

use crate::aggregator::{StoryAggregator, StoryProgress};
use crate::cache::StoryListCache;
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::CreditLedger;
use crate::logging::PageLogger;
use crate::metrics::record_page_submission;
use crate::state_machine::PageStateMachine;
use crate::store::{ModelStore, StoryStore};
use crate::subjects::load_owned_model;
use crate::sweeper::ReconciliationSweeper;
use crate::webhook::{WebhookScope, WebhookSigner};

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateStoryRequest {
    /// Overrides the script title
    #[serde(default)]
    pub title: Option<String>,
    /// Story theme for the script writer; required unless `script` is given
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub subject_model_id: Option<SubjectModelId>,
    #[serde(default)]
    pub art_style: ArtStyle,
    #[serde(default)]
    pub personalization: Personalization,
    /// Caller-supplied script; skips the script writer
    #[serde(default)]
    pub script: Option<StoryScript>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryDetail {
    pub story: Story,
    pub pages: Vec<StoryPage>,
    pub progress: StoryProgress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub scene_description: String,
    #[serde(default)]
    pub art_style: ArtStyle,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub subject_model_id: Option<SubjectModelId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub image_url: String,
    pub credits_charged: u32,
    pub balance: u32,
}

// ============================================================================
// Service
// ============================================================================

pub struct StoryService {
    pub(crate) stories: Arc<dyn StoryStore>,
    pub(crate) models: Arc<dyn ModelStore>,
    pub(crate) ledger: CreditLedger,
    pub(crate) image: Arc<dyn ImageGenerator>,
    pub(crate) script: Arc<dyn ScriptGenerator>,
    pub(crate) machine: Arc<PageStateMachine>,
    pub(crate) aggregator: Arc<StoryAggregator>,
    pub(crate) sweeper: Arc<ReconciliationSweeper>,
    pub(crate) signer: WebhookSigner,
    pub(crate) cache: StoryListCache,
    pub(crate) negative_prompt_policy: NegativePromptPolicy,
    pub(crate) fanout_concurrency: usize,
    pub(crate) list_limit: u32,
    pub(crate) sweep_grace: chrono::Duration,
}

impl StoryService {
    /// Generate (or accept) a script, create the story and submit every page.
    pub async fn generate_story(&self, user_id: &str, request: GenerateStoryRequest) -> PipelineResult<StoryDetail> {
        let GenerateStoryRequest {
            title,
            theme,
            subject_model_id,
            art_style,
            personalization,
            script,
        } = request;

        let subject = match &subject_model_id {
            Some(id) => Some(load_owned_model(self.models.as_ref(), user_id, id).await?),
            None => None,
        };

        let mut script = match script {
            Some(script) => script,
            None => {
                let page_count = personalization.length.page_count();
                self.ledger.require(user_id, story_generation_cost(page_count)).await?;

                let theme = theme
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| PipelineError::bad_request("theme is required when no script is supplied"))?;

                let request = ScriptRequest {
                    theme: theme.to_string(),
                    page_count,
                    art_style,
                    personalization: personalization.clone(),
                };
                self.script.generate_script(&request).await?
            }
        };
        script.validate().map_err(|e| PipelineError::bad_request(e.to_string()))?;
        if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            script.title = title;
        }

        self.ledger
            .require(user_id, story_generation_cost(script.page_count()))
            .await?;

        let (story, pages) = self
            .create_story_rows(user_id, subject.as_ref(), &script, art_style, Some(personalization))
            .await?;

        let identity = subject.as_ref().map(SubjectModel::identity).unwrap_or_default();
        let span = tracing::info_span!("fanout", story_id = %story.id, pages = pages.len());
        let (story_ref, identity_ref) = (&story, &identity);
        let results: Vec<PipelineResult<JobId>> = stream::iter(pages.iter().cloned())
            .map(|page| async move { self.trigger_page_generation(story_ref, &page, identity_ref).await })
            .buffer_unordered(self.fanout_concurrency.max(1))
            .collect::<Vec<_>>()
            .instrument(span)
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            story_id = %story.id,
            user_id = %user_id,
            pages = pages.len(),
            failed_submissions = failed,
            "Story generation started"
        );

        self.load_detail(&story.id).await
    }

    /// Create the story and its Pending pages from a script.
    pub async fn create_story(
        &self,
        user_id: &str,
        subject_model_id: Option<&SubjectModelId>,
        script: &StoryScript,
        art_style: ArtStyle,
        personalization: Option<Personalization>,
    ) -> PipelineResult<(Story, Vec<StoryPage>)> {
        script.validate().map_err(|e| PipelineError::bad_request(e.to_string()))?;
        let subject = match subject_model_id {
            Some(id) => Some(load_owned_model(self.models.as_ref(), user_id, id).await?),
            None => None,
        };
        self.create_story_rows(user_id, subject.as_ref(), script, art_style, personalization)
            .await
    }

    async fn create_story_rows(
        &self,
        user_id: &str,
        subject: Option<&SubjectModel>,
        script: &StoryScript,
        art_style: ArtStyle,
        personalization: Option<Personalization>,
    ) -> PipelineResult<(Story, Vec<StoryPage>)> {
        let trigger_word = subject.and_then(|m| m.identity().lora).and_then(|l| l.trigger_word);
        let story = Story::new(
            user_id,
            script.title.clone(),
            subject.map(|m| m.id.clone()),
            art_style,
            personalization,
        );

        let mut entries: Vec<_> = script.pages.iter().collect();
        entries.sort_by_key(|p| p.page_number);
        let pages: Vec<StoryPage> = entries
            .into_iter()
            .map(|entry| {
                let prompt = build_image_prompt(
                    &entry.image_description,
                    art_style,
                    entry.emotion.as_deref(),
                    self.negative_prompt_policy,
                    trigger_word.as_deref(),
                );
                StoryPage::new(story.id.clone(), entry.page_number, entry.text.clone(), prompt.prompt)
                    .with_emotion(entry.emotion.clone())
            })
            .collect();

        self.stories.create_story(&story, &pages).await?;
        self.cache.invalidate(user_id).await;
        info!(story_id = %story.id, user_id = %user_id, pages = pages.len(), "Story created");
        Ok((story, pages))
    }

    /// Debit and submit one page's image job.
    ///
    /// On a failed debit or submission the page is marked Failed right away.
    /// The page keeps its previous job id until the new job is recorded, so a
    /// late result for an older attempt can never match.
    pub async fn trigger_page_generation(
        &self,
        story: &Story,
        page: &StoryPage,
        identity: &IdentityReference,
    ) -> PipelineResult<JobId> {
        let logger = PageLogger::new(page);

        if let Err(e) = self
            .ledger
            .debit(&story.user_id, PAGE_IMAGE_COST, CreditOperationType::PageImage, page.id.as_str())
            .await
        {
            record_page_submission(false);
            self.machine.mark_submission_failed(page, &e.to_string()).await?;
            return Err(e.into());
        }

        let request = ImageRequest::new(
            ImagePrompt {
                prompt: page.image_prompt.clone(),
                negative_prompt: self.negative_prompt_policy.negative_prompt(),
            },
            identity.clone(),
        );
        let backend = request.backend();

        let job = match self.image.submit(&request, &self.signer.url(WebhookScope::StoryPage)).await {
            Ok(job) => job,
            Err(e) => {
                record_page_submission(false);
                logger.log_error(&format!("submission failed: {}", e));
                self.refund_page(&story.user_id, page, "image submission failed").await;
                self.machine
                    .mark_submission_failed(page, &format!("Image submission failed: {}", e))
                    .await?;
                return Err(PipelineError::generation(format!("image submission failed: {}", e)));
            }
        };

        let outcome = match self.record_submission(page, &job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The job is running but no page points at it; settle the page now
                record_page_submission(false);
                logger.log_error(&format!("recording submission failed: {}", e));
                self.refund_page(&story.user_id, page, "submission could not be recorded").await;
                if let Err(mark_err) = self
                    .machine
                    .mark_submission_failed(page, &format!("Submission could not be recorded: {}", e))
                    .await
                {
                    logger.log_error(&format!("marking page failed also failed: {}", mark_err));
                }
                return Err(e);
            }
        };

        match outcome {
            CasOutcome::Written(_) => {
                record_page_submission(true);
                logger.with_job(&job.job_id).log_submitted(backend.as_str());
                Ok(job.job_id)
            }
            _ => {
                record_page_submission(false);
                self.refund_page(&story.user_id, page, "page changed during submission").await;
                Err(PipelineError::conflict("page changed during submission"))
            }
        }
    }

    /// Index the job and point the page at it, guarded on the page still being
    /// Pending on its previous job.
    async fn record_submission(&self, page: &StoryPage, job: &SubmittedJob) -> PipelineResult<CasOutcome<StoryPage>> {
        self.stories.index_page_job(&job.job_id, &page.story_id, &page.id).await?;

        let expected_job = page.job_id.clone();
        let outcome = self
            .stories
            .update_page(&page.story_id, &page.id, &mut |p: &mut StoryPage| {
                if p.status != PageStatus::Pending || p.job_id != expected_job {
                    return false;
                }
                p.job_id = Some(job.job_id.clone());
                p.job_endpoint = Some(job.endpoint.clone());
                p.credits_charged = PAGE_IMAGE_COST;
                p.error_message = None;
                p.updated_at = Utc::now();
                true
            })
            .await?;
        Ok(outcome)
    }

    /// Retry one page without touching its siblings.
    ///
    /// Allowed for Failed pages and for Pending pages whose job has gone
    /// quiet past the sweep grace window. The reset clears the job
    /// correlation so results for the old job are ignored.
    pub async fn retry_page_generation(
        &self,
        user_id: &str,
        story_id: &StoryId,
        page_id: &PageId,
    ) -> PipelineResult<JobId> {
        let story = self.owned_story(user_id, story_id).await?;
        let page = self
            .stories
            .get_page(story_id, page_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("page {}", page_id)))?;

        let now = Utc::now();
        if page.status == PageStatus::Generated {
            return Err(PipelineError::conflict("page already generated"));
        }
        if page.status == PageStatus::Pending && page.job_id.is_some() && !page.is_stale(self.sweep_grace, now) {
            return Err(PipelineError::conflict("page generation already in progress"));
        }

        self.ledger.require(user_id, PAGE_IMAGE_COST).await?;

        let observed_status = page.status;
        let observed_job = page.job_id.clone();
        let mut superseded_charge = 0u32;
        let reset = self
            .stories
            .update_page(story_id, page_id, &mut |p: &mut StoryPage| {
                superseded_charge = 0;
                if p.status != observed_status || p.job_id != observed_job {
                    return false;
                }
                if p.status == PageStatus::Pending {
                    superseded_charge = p.credits_charged;
                }
                p.status = PageStatus::Pending;
                p.job_id = None;
                p.job_endpoint = None;
                p.credits_charged = 0;
                p.image_url.clear();
                p.error_message = None;
                p.updated_at = now;
                true
            })
            .await?;

        let CasOutcome::Written(page) = reset else {
            return Err(PipelineError::conflict("page changed, try again"));
        };
        if superseded_charge > 0 {
            self.ledger
                .refund(
                    user_id,
                    superseded_charge,
                    CreditOperationType::PageImage,
                    page.id.as_str(),
                    "superseded by retry",
                )
                .await;
        }

        let reopened = self
            .stories
            .update_story(story_id, &mut |s: &mut Story| {
                if s.status != StoryStatus::Failed {
                    return false;
                }
                s.status = StoryStatus::Generating;
                s.failed_at = None;
                s.error_message = None;
                s.updated_at = now;
                true
            })
            .await?;
        let story = match reopened {
            CasOutcome::Written(story) => {
                info!(story_id = %story_id, "Reopened failed story for retry");
                self.cache.invalidate(user_id).await;
                story
            }
            _ => story,
        };

        let identity = self.story_identity(&story).await;
        info!(story_id = %story_id, page_id = %page_id, "Retrying page generation");
        self.trigger_page_generation(&story, &page, &identity).await
    }

    /// Story, pages and progress. Dispatches a sweep for non-terminal stories.
    pub async fn get_story_detail(&self, user_id: &str, story_id: &StoryId) -> PipelineResult<StoryDetail> {
        let story = self.owned_story(user_id, story_id).await?;
        if !story.status.is_terminal() {
            self.sweeper.spawn_sweep(story_id.clone());
        }
        self.load_detail(story_id).await
    }

    /// Progress projection. Dispatches a sweep for non-terminal stories.
    pub async fn get_story_status(&self, user_id: &str, story_id: &StoryId) -> PipelineResult<StoryProgress> {
        let story = self.owned_story(user_id, story_id).await?;
        if !story.status.is_terminal() {
            self.sweeper.spawn_sweep(story_id.clone());
        }
        self.aggregator.get_story_status(story_id).await
    }

    pub async fn list_stories(&self, user_id: &str) -> PipelineResult<Arc<Vec<StorySummary>>> {
        let stories = Arc::clone(&self.stories);
        let limit = self.list_limit;
        self.cache
            .get_or_load(user_id, || async move {
                let list = stories.list_stories(user_id, limit).await?;
                Ok::<_, PipelineError>(list.iter().map(StorySummary::from).collect())
            })
            .await
    }

    /// Generate a single preview image synchronously.
    pub async fn generate_preview(&self, user_id: &str, request: PreviewRequest) -> PipelineResult<PreviewResult> {
        let scene = request.scene_description.trim();
        if scene.is_empty() {
            return Err(PipelineError::bad_request("scene_description is required"));
        }

        let subject = match &request.subject_model_id {
            Some(id) => Some(load_owned_model(self.models.as_ref(), user_id, id).await?),
            None => None,
        };
        let identity = subject.as_ref().map(SubjectModel::identity).unwrap_or_default();
        let trigger_word = identity.lora.as_ref().and_then(|l| l.trigger_word.clone());

        let prompt = build_image_prompt(
            scene,
            request.art_style,
            request.emotion.as_deref(),
            self.negative_prompt_policy,
            trigger_word.as_deref(),
        );

        let balance = self
            .ledger
            .debit(user_id, PREVIEW_IMAGE_COST, CreditOperationType::PreviewImage, "preview")
            .await?;

        let image_url = self.image.generate_sync(&ImageRequest::new(prompt, identity)).await;
        if image_url.is_empty() {
            self.ledger
                .refund(
                    user_id,
                    PREVIEW_IMAGE_COST,
                    CreditOperationType::PreviewImage,
                    "preview",
                    "preview produced no image",
                )
                .await;
            return Err(PipelineError::generation("preview image generation failed"));
        }

        Ok(PreviewResult {
            image_url,
            credits_charged: PREVIEW_IMAGE_COST,
            balance,
        })
    }

    async fn owned_story(&self, user_id: &str, story_id: &StoryId) -> PipelineResult<Story> {
        self.stories
            .get_story(story_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| PipelineError::not_found(format!("story {}", story_id)))
    }

    async fn load_detail(&self, story_id: &StoryId) -> PipelineResult<StoryDetail> {
        let story = self
            .stories
            .get_story(story_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("story {}", story_id)))?;
        let pages = self.stories.get_pages(story_id).await?;
        let progress = StoryProgress::from_pages(story_id, story.status, &pages);
        Ok(StoryDetail { story, pages, progress })
    }

    /// Current identity for a story's subject; empty if the model is gone.
    async fn story_identity(&self, story: &Story) -> IdentityReference {
        let Some(model_id) = &story.subject_model_id else {
            return IdentityReference::none();
        };
        match self.models.get_model(model_id).await {
            Ok(Some(model)) => model.identity(),
            Ok(None) => IdentityReference::none(),
            Err(e) => {
                warn!(story_id = %story.id, model_id = %model_id, error = %e, "Subject model lookup failed");
                IdentityReference::none()
            }
        }
    }

    async fn refund_page(&self, user_id: &str, page: &StoryPage, reason: &str) {
        self.ledger
            .refund(user_id, PAGE_IMAGE_COST, CreditOperationType::PageImage, page.id.as_str(), reason)
            .await;
    }
}
