//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use story_firestore::FirestoreClient;
use story_genai::GenAiConfig;
use story_pipeline::{Generators, Pipeline, PipelineConfig, Stores};

use crate::config::{ApiConfig, StoreBackend};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Build the full pipeline from environment configuration.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let stores = match config.store_backend {
            StoreBackend::Memory => Stores::memory(),
            StoreBackend::Firestore => {
                let client = FirestoreClient::from_env()
                    .await
                    .context("failed to create Firestore client")?;
                Stores::firestore(client)
            }
        };
        info!(backend = config.store_backend.as_str(), "Store backend selected");

        let genai = GenAiConfig::from_env().context("invalid generation adapter configuration")?;
        let generators = Generators::from_config(genai).context("failed to create generation adapters")?;

        let pipeline = Pipeline::new(PipelineConfig::from_env(), stores, generators);
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: ApiConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }
}
