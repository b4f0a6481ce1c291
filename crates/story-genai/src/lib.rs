//! Generation adapters for the storybook backend.
//!
//! Each adapter wraps one endpoint family on the external job system:
//! - [`image`]: face-consistent page illustrations
//! - [`audio`]: page narration
//! - [`training`]: LoRA training for subject models
//! - [`script`]: Gemini script writer with model fallback
//!
//! Async submissions report back through webhooks; synchronous calls share
//! the bounded retry helper in [`retry`].

pub mod audio;
pub mod config;
pub mod error;
pub mod image;
pub mod metrics;
pub mod prompt;
pub mod queue;
pub mod retry;
pub mod script;
pub mod training;

pub use audio::{AudioGenerator, AudioRequest, NarrationAdapter, DEFAULT_VOICE};
pub use config::{Endpoints, GenAiConfig};
pub use error::{GenAiError, GenAiResult};
pub use image::{FaceBackend, FaceConsistentImageAdapter, ImageGenerator, ImageRequest};
pub use prompt::{build_image_prompt, ImagePrompt, NegativePromptPolicy};
pub use queue::{JobResultLookup, QueueClient, SubmittedJob};
pub use retry::{retry_until, RetryPolicy};
pub use script::{GeminiScriptAdapter, ScriptGenerator, ScriptRequest};
pub use training::{LoraTrainingAdapter, ModelTrainer, TrainingRequest};
