//! Subject models: the identity a story's illustrations stay consistent with.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{JobId, SubjectModelId};

/// Default LoRA strength applied at inference.
pub const DEFAULT_LORA_SCALE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubjectModelStatus {
    /// LoRA training job in flight
    #[default]
    Training,
    Ready,
    Failed,
}

impl SubjectModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectModelStatus::Training => "training",
            SubjectModelStatus::Ready => "ready",
            SubjectModelStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubjectModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered subject (usually the child the book is about).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubjectModel {
    pub id: SubjectModelId,

    pub user_id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub status: SubjectModelStatus,

    /// Reference photo of the subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<String>,

    /// Token the LoRA was trained on; included in prompts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_word: Option<String>,

    /// Trained LoRA weights
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_tensor_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_job_id: Option<JobId>,

    #[serde(default)]
    pub credits_charged: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl SubjectModel {
    /// A subject backed by a reference photo only. Usable immediately.
    pub fn from_reference(
        user_id: impl Into<String>,
        name: impl Into<String>,
        reference_image_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubjectModelId::new(),
            user_id: user_id.into(),
            name: name.into(),
            status: SubjectModelStatus::Ready,
            reference_image_url: Some(reference_image_url.into()),
            trigger_word: None,
            lora_tensor_url: None,
            training_job_id: None,
            credits_charged: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SubjectModelStatus::Ready
    }

    pub fn is_training(&self) -> bool {
        self.status == SubjectModelStatus::Training
    }

    /// Identity reference for image generation.
    ///
    /// A trained LoRA is only used once the model is ready.
    pub fn identity(&self) -> IdentityReference {
        let lora = match (&self.lora_tensor_url, self.is_ready()) {
            (Some(tensor_url), true) if !tensor_url.is_empty() => Some(LoraReference {
                tensor_url: tensor_url.clone(),
                trigger_word: self.trigger_word.clone(),
                scale: DEFAULT_LORA_SCALE,
            }),
            _ => None,
        };

        IdentityReference {
            lora,
            face_image_url: self.reference_image_url.clone().filter(|u| !u.is_empty()),
        }
    }
}

/// Trained LoRA weights for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoraReference {
    pub tensor_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_word: Option<String>,
    pub scale: f32,
}

/// Whatever is known about the subject's appearance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IdentityReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora: Option<LoraReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_image_url: Option<String>,
}

impl IdentityReference {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lora.is_none() && self.face_image_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_subject_is_ready_with_face_only() {
        let model = SubjectModel::from_reference("u1", "Mia", "https://cdn.example/mia.jpg");
        let identity = model.identity();
        assert!(identity.lora.is_none());
        assert_eq!(identity.face_image_url.as_deref(), Some("https://cdn.example/mia.jpg"));
    }

    #[test]
    fn test_lora_ignored_until_ready() {
        let mut model = SubjectModel::from_reference("u1", "Mia", "https://cdn.example/mia.jpg");
        model.status = SubjectModelStatus::Training;
        model.lora_tensor_url = Some("https://cdn.example/w.safetensors".into());
        assert!(model.identity().lora.is_none());

        model.status = SubjectModelStatus::Ready;
        let lora = model.identity().lora.unwrap();
        assert_eq!(lora.tensor_url, "https://cdn.example/w.safetensors");
        assert_eq!(lora.scale, DEFAULT_LORA_SCALE);
    }
}
