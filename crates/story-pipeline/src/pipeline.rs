//! Component wiring.
//!
//! Every component is constructed once here and shared through `Arc`s; there
//! is no global state.

use std::sync::Arc;

use story_genai::{
    AudioGenerator, FaceConsistentImageAdapter, GenAiConfig, GenAiResult, GeminiScriptAdapter, ImageGenerator,
    JobResultLookup, LoraTrainingAdapter, ModelTrainer, NarrationAdapter, QueueClient, ScriptGenerator,
};

use crate::aggregator::StoryAggregator;
use crate::cache::StoryListCache;
use crate::config::PipelineConfig;
use crate::ledger::CreditLedger;
use crate::narration::Narrator;
use crate::service::StoryService;
use crate::state_machine::PageStateMachine;
use crate::store::{StoryStore, Stores};
use crate::subjects::SubjectModelService;
use crate::sweeper::ReconciliationSweeper;
use crate::webhook::WebhookSigner;

/// The external generation services the pipeline talks to.
#[derive(Clone)]
pub struct Generators {
    pub image: Arc<dyn ImageGenerator>,
    pub audio: Arc<dyn AudioGenerator>,
    pub script: Arc<dyn ScriptGenerator>,
    pub trainer: Arc<dyn ModelTrainer>,
    pub jobs: Arc<dyn JobResultLookup>,
}

impl Generators {
    /// Real adapters sharing one queue client.
    pub fn from_config(config: GenAiConfig) -> GenAiResult<Self> {
        let script = GeminiScriptAdapter::new(&config)?;
        let queue = QueueClient::new(config)?;
        Ok(Self {
            image: Arc::new(FaceConsistentImageAdapter::new(queue.clone())),
            audio: Arc::new(NarrationAdapter::new(queue.clone())),
            script: Arc::new(script),
            trainer: Arc::new(LoraTrainingAdapter::new(queue.clone())),
            jobs: Arc::new(queue),
        })
    }
}

#[derive(Clone)]
pub struct Pipeline {
    pub config: PipelineConfig,
    pub ledger: CreditLedger,
    pub stories: Arc<StoryService>,
    pub subjects: Arc<SubjectModelService>,
    pub machine: Arc<PageStateMachine>,
    pub aggregator: Arc<StoryAggregator>,
    pub sweeper: Arc<ReconciliationSweeper>,
    pub signer: WebhookSigner,
    store: Arc<dyn StoryStore>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, stores: Stores, generators: Generators) -> Self {
        let ledger = CreditLedger::new(stores.credits.clone(), config.signup_credits);
        let cache = StoryListCache::new(config.story_list_cache_ttl);
        let signer = WebhookSigner::new(config.webhook_base_url.clone(), config.webhook_secret.as_deref());

        let aggregator = Arc::new(StoryAggregator::new(stores.stories.clone(), cache.clone()));
        let narrator = Arc::new(Narrator::new(
            generators.audio.clone(),
            stores.stories.clone(),
            ledger.clone(),
        ));
        let machine = Arc::new(PageStateMachine::new(
            stores.stories.clone(),
            ledger.clone(),
            aggregator.clone(),
            Some(narrator),
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            stores.stories.clone(),
            generators.jobs.clone(),
            machine.clone(),
            aggregator.clone(),
            config.sweep_grace_chrono(),
        ));

        let stories = Arc::new(StoryService {
            stories: stores.stories.clone(),
            models: stores.models.clone(),
            ledger: ledger.clone(),
            image: generators.image.clone(),
            script: generators.script.clone(),
            machine: machine.clone(),
            aggregator: aggregator.clone(),
            sweeper: sweeper.clone(),
            signer: signer.clone(),
            cache,
            negative_prompt_policy: config.negative_prompt_policy,
            fanout_concurrency: config.page_fanout_concurrency,
            list_limit: config.story_list_limit,
            sweep_grace: config.sweep_grace_chrono(),
        });
        let subjects = Arc::new(SubjectModelService::new(
            stores.models.clone(),
            ledger.clone(),
            generators.trainer.clone(),
            signer.clone(),
        ));

        Self {
            config,
            ledger,
            stories,
            subjects,
            machine,
            aggregator,
            sweeper,
            signer,
            store: stores.stories,
        }
    }

    /// Store reachability for readiness probes.
    pub async fn ping(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
