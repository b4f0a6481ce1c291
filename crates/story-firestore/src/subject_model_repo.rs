//! Subject model documents.

use tracing::info;

use story_models::{JobId, SubjectModel, SubjectModelId};

use crate::cas::{compare_and_set, CasOutcome};
use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{encode_fields, StructuredQuery, ToFirestoreValue};

pub const SUBJECT_MODELS_COLLECTION: &str = "subject_models";

#[derive(Clone)]
pub struct SubjectModelRepository {
    client: FirestoreClient,
}

impl SubjectModelRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn create(&self, model: &SubjectModel) -> FirestoreResult<()> {
        self.client
            .create_document(SUBJECT_MODELS_COLLECTION, model.id.as_str(), encode_fields(model)?)
            .await?;
        info!(model_id = %model.id, user_id = %model.user_id, status = %model.status, "Created subject model");
        Ok(())
    }

    pub async fn get(&self, model_id: &SubjectModelId) -> FirestoreResult<Option<SubjectModel>> {
        self.client
            .get_document(SUBJECT_MODELS_COLLECTION, model_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    pub async fn update_if<F>(
        &self,
        model_id: &SubjectModelId,
        mutate: F,
    ) -> FirestoreResult<CasOutcome<SubjectModel>>
    where
        F: FnMut(&mut SubjectModel) -> bool,
    {
        compare_and_set(&self.client, SUBJECT_MODELS_COLLECTION, model_id.as_str(), mutate).await
    }

    /// The model whose training job is `job_id`.
    pub async fn find_by_training_job(&self, job_id: &JobId) -> FirestoreResult<Option<SubjectModel>> {
        let query = StructuredQuery::collection(SUBJECT_MODELS_COLLECTION)
            .where_eq("training_job_id", job_id.as_str().to_firestore_value())
            .limit(1);

        self.client
            .run_query("", query)
            .await?
            .first()
            .map(|doc| doc.decode())
            .transpose()
    }
}
