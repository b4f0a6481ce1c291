//! Subject models: the identity references that keep a character's face
//! consistent across pages.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use story_firestore::CasOutcome;
use story_genai::{ModelTrainer, TrainingRequest};
use story_models::{
    AssetKind, CreditOperationType, JobId, JobOutcome, JobReport, SubjectModel, SubjectModelId,
    SubjectModelStatus, MODEL_TRAINING_COST,
};

use crate::error::{PipelineError, PipelineResult};
use crate::ledger::CreditLedger;
use crate::store::ModelStore;
use crate::webhook::{WebhookScope, WebhookSigner};

/// Trigger token used when the caller does not pick one.
pub const DEFAULT_TRIGGER_WORD: &str = "TOK";

/// Load a model, hiding models owned by other users.
pub(crate) async fn load_owned_model(
    models: &dyn ModelStore,
    user_id: &str,
    model_id: &SubjectModelId,
) -> PipelineResult<SubjectModel> {
    models
        .get_model(model_id)
        .await?
        .filter(|m| m.user_id == user_id)
        .ok_or_else(|| PipelineError::not_found(format!("subject model {}", model_id)))
}

pub struct SubjectModelService {
    models: Arc<dyn ModelStore>,
    ledger: CreditLedger,
    trainer: Arc<dyn ModelTrainer>,
    signer: WebhookSigner,
}

impl SubjectModelService {
    pub fn new(
        models: Arc<dyn ModelStore>,
        ledger: CreditLedger,
        trainer: Arc<dyn ModelTrainer>,
        signer: WebhookSigner,
    ) -> Self {
        Self {
            models,
            ledger,
            trainer,
            signer,
        }
    }

    /// Register a subject backed by a reference photo. Usable immediately.
    pub async fn register_reference(
        &self,
        user_id: &str,
        name: &str,
        reference_image_url: &str,
    ) -> PipelineResult<SubjectModel> {
        let name = name.trim();
        let url = reference_image_url.trim();
        if name.is_empty() {
            return Err(PipelineError::bad_request("name is required"));
        }
        if url.is_empty() {
            return Err(PipelineError::bad_request("reference_image_url is required"));
        }

        let model = SubjectModel::from_reference(user_id, name, url);
        self.models.create_model(&model).await?;
        info!(user_id = %user_id, model_id = %model.id, "Registered subject model");
        Ok(model)
    }

    pub async fn get_model(&self, user_id: &str, model_id: &SubjectModelId) -> PipelineResult<SubjectModel> {
        load_owned_model(self.models.as_ref(), user_id, model_id).await
    }

    /// Start LoRA training for an existing subject.
    ///
    /// The training cost is debited before submission and refunded if the
    /// submission or the training job fails.
    pub async fn start_training(
        &self,
        user_id: &str,
        model_id: &SubjectModelId,
        images_data_url: &str,
        trigger_word: Option<&str>,
    ) -> PipelineResult<SubjectModel> {
        let model = load_owned_model(self.models.as_ref(), user_id, model_id).await?;
        if model.is_training() {
            return Err(PipelineError::conflict("training already in progress"));
        }
        if images_data_url.trim().is_empty() {
            return Err(PipelineError::bad_request("images_data_url is required"));
        }

        let trigger = trigger_word
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| model.trigger_word.clone())
            .unwrap_or_else(|| DEFAULT_TRIGGER_WORD.to_string());

        self.ledger
            .debit(user_id, MODEL_TRAINING_COST, CreditOperationType::ModelTraining, model.id.as_str())
            .await?;

        let request = TrainingRequest::new(images_data_url.trim(), trigger.clone());
        let job = match self
            .trainer
            .submit_training(&request, &self.signer.url(WebhookScope::ModelTraining))
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.refund(user_id, &model.id, MODEL_TRAINING_COST, "training submission failed")
                    .await;
                return Err(PipelineError::generation(format!("training submission failed: {}", e)));
            }
        };

        let outcome = self
            .models
            .update_model(&model.id, &mut |m: &mut SubjectModel| {
                if m.is_training() {
                    return false;
                }
                m.status = SubjectModelStatus::Training;
                m.training_job_id = Some(job.job_id.clone());
                m.trigger_word = Some(trigger.clone());
                m.credits_charged = MODEL_TRAINING_COST;
                m.error_message = None;
                m.updated_at = Utc::now();
                true
            })
            .await?;

        match outcome {
            CasOutcome::Written(updated) => {
                info!(
                    user_id = %user_id,
                    model_id = %updated.id,
                    job_id = %job.job_id,
                    "Subject model training submitted"
                );
                Ok(updated)
            }
            _ => {
                self.refund(user_id, &model.id, MODEL_TRAINING_COST, "training already in progress")
                    .await;
                Err(PipelineError::conflict("training already in progress"))
            }
        }
    }

    /// Apply a training webhook. Returns `true` if the model changed.
    pub async fn apply_training_result(&self, job_id: &JobId, report: &JobReport) -> PipelineResult<bool> {
        let Some(model) = self.models.find_model_by_training_job(job_id).await? else {
            warn!(job_id = %job_id, "No subject model is waiting on this training job");
            return Ok(false);
        };
        let Some(outcome) = report.classify(AssetKind::LoraWeights) else {
            return Ok(false);
        };

        let mut refund = 0u32;
        let written = self
            .models
            .update_model(&model.id, &mut |m: &mut SubjectModel| {
                refund = 0;
                if !m.is_training() || m.training_job_id.as_ref() != Some(job_id) {
                    return false;
                }
                match &outcome {
                    JobOutcome::Succeeded { asset_url } => {
                        m.status = SubjectModelStatus::Ready;
                        m.lora_tensor_url = Some(asset_url.clone());
                        m.error_message = None;
                    }
                    JobOutcome::Failed { reason } => {
                        m.status = SubjectModelStatus::Failed;
                        m.error_message = Some(reason.clone());
                        refund = m.credits_charged;
                        m.credits_charged = 0;
                    }
                }
                m.updated_at = Utc::now();
                true
            })
            .await?;

        let CasOutcome::Written(updated) = written else {
            return Ok(false);
        };

        info!(
            model_id = %updated.id,
            job_id = %job_id,
            status = updated.status.as_str(),
            "Subject model training finished"
        );
        if refund > 0 {
            self.refund(&updated.user_id, &updated.id, refund, "training failed").await;
        }
        Ok(true)
    }

    async fn refund(&self, user_id: &str, model_id: &SubjectModelId, amount: u32, reason: &str) {
        self.ledger
            .refund(user_id, amount, CreditOperationType::ModelTraining, model_id.as_str(), reason)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::store::MemoryStore;
    use crate::testing::FakeTrainer;

    async fn setup(credits: u32) -> (Arc<FakeTrainer>, CreditLedger, SubjectModelService) {
        let store = Arc::new(MemoryStore::new());
        let ledger = CreditLedger::new(store.clone(), credits);
        ledger.ensure_account("user-1").await.unwrap();
        let trainer = Arc::new(FakeTrainer::new());
        let service = SubjectModelService::new(
            store,
            ledger.clone(),
            trainer.clone(),
            WebhookSigner::new("https://api.example/webhooks", None),
        );
        (trainer, ledger, service)
    }

    #[tokio::test]
    async fn test_register_reference_is_ready() {
        let (_, _, service) = setup(0).await;
        let model = service
            .register_reference("user-1", "Mia", "https://cdn.example/mia.jpg")
            .await
            .unwrap();
        assert!(model.is_ready());
        assert!(!model.identity().is_empty());

        let err = service.register_reference("user-1", " ", "u").await.unwrap_err();
        assert!(matches!(err, PipelineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_models_are_private_to_owner() {
        let (_, _, service) = setup(0).await;
        let model = service
            .register_reference("user-1", "Mia", "https://cdn.example/mia.jpg")
            .await
            .unwrap();
        let err = service.get_model("user-2", &model.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_training_success_makes_lora_available() {
        let (_, ledger, service) = setup(15).await;
        let model = service
            .register_reference("user-1", "Mia", "https://cdn.example/mia.jpg")
            .await
            .unwrap();

        let training = service
            .start_training("user-1", &model.id, "https://cdn.example/mia.zip", Some("mia"))
            .await
            .unwrap();
        assert!(training.is_training());
        assert_eq!(ledger.get_balance("user-1").await.unwrap(), 5);

        let job_id = training.training_job_id.clone().unwrap();
        let report = JobReport::new(
            "OK",
            Some(json!({"diffusers_lora_file": {"url": "https://cdn.example/mia.safetensors"}})),
        );
        assert!(service.apply_training_result(&job_id, &report).await.unwrap());
        assert!(!service.apply_training_result(&job_id, &report).await.unwrap());

        let ready = service.get_model("user-1", &model.id).await.unwrap();
        assert!(ready.is_ready());
        let lora = ready.identity().lora.unwrap();
        assert_eq!(lora.trigger_word.as_deref(), Some("mia"));
    }

    #[tokio::test]
    async fn test_training_failure_refunds() {
        let (_, ledger, service) = setup(10).await;
        let model = service
            .register_reference("user-1", "Mia", "https://cdn.example/mia.jpg")
            .await
            .unwrap();
        let training = service
            .start_training("user-1", &model.id, "https://cdn.example/mia.zip", None)
            .await
            .unwrap();
        assert_eq!(training.trigger_word.as_deref(), Some(DEFAULT_TRIGGER_WORD));

        let report = JobReport::new("ERROR", None).with_error("not enough images");
        let job_id = training.training_job_id.unwrap();
        assert!(service.apply_training_result(&job_id, &report).await.unwrap());

        let failed = service.get_model("user-1", &model.id).await.unwrap();
        assert_eq!(failed.status, SubjectModelStatus::Failed);
        assert_eq!(ledger.get_balance("user-1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_submission_failure_refunds() {
        let (trainer, ledger, service) = setup(10).await;
        trainer.fail(true);
        let model = service
            .register_reference("user-1", "Mia", "https://cdn.example/mia.jpg")
            .await
            .unwrap();

        let err = service
            .start_training("user-1", &model.id, "https://cdn.example/mia.zip", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
        assert_eq!(ledger.get_balance("user-1").await.unwrap(), 10);
        assert!(service.get_model("user-1", &model.id).await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_training_requires_credits() {
        let (_, _, service) = setup(3).await;
        let model = service
            .register_reference("user-1", "Mia", "https://cdn.example/mia.jpg")
            .await
            .unwrap();
        let err = service
            .start_training("user-1", &model.id, "https://cdn.example/mia.zip", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientCredits { required: 10, available: 3 }));
    }
}
