//! Per-page narration.
//!
//! Runs after a page image lands, off the webhook path. Narration is billed
//! per page and refunded when synthesis produces nothing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn, Instrument};

use story_firestore::CasOutcome;
use story_genai::{AudioGenerator, AudioRequest};
use story_models::{CreditOperationType, StoryPage, PAGE_AUDIO_COST};

use crate::error::{LedgerError, PipelineResult};
use crate::ledger::CreditLedger;
use crate::logging::PageLogger;
use crate::store::StoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationOutcome {
    Narrated,
    /// Page already narrated or has no text
    NotNeeded,
    InsufficientCredits,
    /// Synthesis returned no audio; the debit was refunded
    Failed,
}

pub struct Narrator {
    audio: Arc<dyn AudioGenerator>,
    stories: Arc<dyn StoryStore>,
    ledger: CreditLedger,
}

impl Narrator {
    pub fn new(audio: Arc<dyn AudioGenerator>, stories: Arc<dyn StoryStore>, ledger: CreditLedger) -> Self {
        Self { audio, stories, ledger }
    }

    /// Narrate `page` in the background.
    pub fn spawn_narration(self: &Arc<Self>, user_id: String, voice: Option<String>, page: StoryPage) {
        let narrator = Arc::clone(self);
        let span = PageLogger::new(&page).span();
        tokio::spawn(
            async move {
                if let Err(e) = narrator.narrate_page(&user_id, voice, &page).await {
                    warn!(error = %e, "Page narration failed");
                }
            }
            .instrument(span),
        );
    }

    pub async fn narrate_page(
        &self,
        user_id: &str,
        voice: Option<String>,
        page: &StoryPage,
    ) -> PipelineResult<NarrationOutcome> {
        if page.audio_url.is_some() || page.text.trim().is_empty() {
            return Ok(NarrationOutcome::NotNeeded);
        }

        match self
            .ledger
            .debit(user_id, PAGE_AUDIO_COST, CreditOperationType::PageAudio, page.id.as_str())
            .await
        {
            Ok(_) => {}
            Err(LedgerError::InsufficientCredits { available, .. }) => {
                info!(page_id = %page.id, available, "Skipping narration: insufficient credits");
                return Ok(NarrationOutcome::InsufficientCredits);
            }
            Err(e) => return Err(e.into()),
        }

        let url = self.audio.generate_sync(&AudioRequest::new(page.text.clone(), voice)).await;
        if url.is_empty() {
            self.refund(user_id, page, "narration produced no audio").await;
            return Ok(NarrationOutcome::Failed);
        }

        let written = self
            .stories
            .update_page(&page.story_id, &page.id, &mut |p: &mut StoryPage| {
                if p.audio_url.is_some() {
                    return false;
                }
                p.audio_url = Some(url.clone());
                p.updated_at = Utc::now();
                true
            })
            .await;

        match written {
            Ok(CasOutcome::Written(_)) => {
                debug!(page_id = %page.id, "Page narrated");
                Ok(NarrationOutcome::Narrated)
            }
            Ok(_) => {
                self.refund(user_id, page, "page already narrated").await;
                Ok(NarrationOutcome::NotNeeded)
            }
            Err(e) => {
                self.refund(user_id, page, "narration could not be saved").await;
                Err(e.into())
            }
        }
    }

    async fn refund(&self, user_id: &str, page: &StoryPage, reason: &str) {
        self.ledger
            .refund(user_id, PAGE_AUDIO_COST, CreditOperationType::PageAudio, page.id.as_str(), reason)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use story_models::{ArtStyle, Story};

    use crate::store::MemoryStore;
    use crate::testing::FakeAudioGenerator;

    async fn setup(credits: u32) -> (Arc<MemoryStore>, Arc<FakeAudioGenerator>, CreditLedger, Narrator, StoryPage) {
        let store = Arc::new(MemoryStore::new());
        let ledger = CreditLedger::new(store.clone(), credits);
        ledger.ensure_account("user-1").await.unwrap();

        let story = Story::new("user-1", "Title", None, ArtStyle::Pencil, None);
        let page = StoryPage::new(story.id.clone(), 1, "The fox ran home.", "prompt");
        store.create_story(&story, std::slice::from_ref(&page)).await.unwrap();

        let audio = Arc::new(FakeAudioGenerator::new());
        let narrator = Narrator::new(audio.clone(), store.clone(), ledger.clone());
        (store, audio, ledger, narrator, page)
    }

    #[tokio::test]
    async fn test_narration_charges_and_saves_audio() {
        let (store, audio, ledger, narrator, page) = setup(2).await;

        let outcome = narrator.narrate_page("user-1", None, &page).await.unwrap();
        assert_eq!(outcome, NarrationOutcome::Narrated);
        assert_eq!(audio.calls(), 1);
        assert_eq!(ledger.get_balance("user-1").await.unwrap(), 1);

        let stored = store.get_page(&page.story_id, &page.id).await.unwrap().unwrap();
        assert_eq!(stored.audio_url.as_deref(), Some("https://cdn.example/narration.mp3"));
    }

    #[tokio::test]
    async fn test_empty_audio_is_refunded() {
        let (store, audio, ledger, narrator, page) = setup(2).await;
        audio.set_url("");

        let outcome = narrator.narrate_page("user-1", None, &page).await.unwrap();
        assert_eq!(outcome, NarrationOutcome::Failed);
        assert_eq!(ledger.get_balance("user-1").await.unwrap(), 2);
        assert!(store
            .get_page(&page.story_id, &page.id)
            .await
            .unwrap()
            .unwrap()
            .audio_url
            .is_none());
    }

    #[tokio::test]
    async fn test_no_credits_skips_synthesis() {
        let (_store, audio, _ledger, narrator, page) = setup(0).await;

        let outcome = narrator.narrate_page("user-1", None, &page).await.unwrap();
        assert_eq!(outcome, NarrationOutcome::InsufficientCredits);
        assert_eq!(audio.calls(), 0);
    }

    #[tokio::test]
    async fn test_already_narrated_page_is_skipped() {
        let (_store, audio, ledger, narrator, mut page) = setup(2).await;
        page.audio_url = Some("https://cdn.example/old.mp3".to_string());

        let outcome = narrator.narrate_page("user-1", None, &page).await.unwrap();
        assert_eq!(outcome, NarrationOutcome::NotNeeded);
        assert_eq!(audio.calls(), 0);
        assert_eq!(ledger.get_balance("user-1").await.unwrap(), 2);
    }
}
