//! Credit transaction data models.
//!
//! Every debit, refund and grant against a user's balance is recorded as a
//! [`CreditTransaction`] so the credit history can be shown and audited.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionKind {
    Debit,
    Refund,
    Grant,
}

impl CreditTransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Refund => "refund",
            Self::Grant => "grant",
        }
    }
}

/// What the credits paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CreditOperationType {
    /// Illustration for one story page
    PageImage,
    /// Narration for one story page
    PageAudio,
    /// Synchronous preview image
    PreviewImage,
    /// LoRA subject model training
    ModelTraining,
    /// Purchase, signup bonus or manual adjustment
    Grant,
}

impl CreditOperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageImage => "page_image",
            Self::PageAudio => "page_audio",
            Self::PreviewImage => "preview_image",
            Self::ModelTraining => "model_training",
            Self::Grant => "grant",
        }
    }

    /// Human-readable label for credit history.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PageImage => "Page Illustration",
            Self::PageAudio => "Page Narration",
            Self::PreviewImage => "Preview Image",
            Self::ModelTraining => "Model Training",
            Self::Grant => "Credit Grant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page_image" => Some(Self::PageImage),
            "page_audio" => Some(Self::PageAudio),
            "preview_image" => Some(Self::PreviewImage),
            "model_training" => Some(Self::ModelTraining),
            "grant" => Some(Self::Grant),
            _ => None,
        }
    }
}

/// A credit transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreditTransaction {
    pub id: String,

    pub user_id: String,

    pub kind: CreditTransactionKind,

    pub operation_type: CreditOperationType,

    /// Always positive; `kind` carries the direction
    pub amount: u32,

    /// Balance after this transaction was applied
    pub balance_after: u32,

    /// Billing reference (page id, model id or job id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,

    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        user_id: impl Into<String>,
        kind: CreditTransactionKind,
        operation_type: CreditOperationType,
        amount: u32,
        balance_after: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            operation_type,
            amount,
            balance_after,
            reference_id: None,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Signed change to the balance.
    pub fn delta(&self) -> i64 {
        match self.kind {
            CreditTransactionKind::Debit => -(self.amount as i64),
            CreditTransactionKind::Refund | CreditTransactionKind::Grant => self.amount as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_sign_follows_kind() {
        let debit = CreditTransaction::new(
            "u1",
            CreditTransactionKind::Debit,
            CreditOperationType::PageImage,
            3,
            7,
            "Page 1 illustration",
        );
        assert_eq!(debit.delta(), -3);

        let refund = CreditTransaction {
            kind: CreditTransactionKind::Refund,
            ..debit.clone()
        };
        assert_eq!(refund.delta(), 3);
    }

    #[test]
    fn test_operation_type_parse() {
        assert_eq!(
            CreditOperationType::parse("model_training"),
            Some(CreditOperationType::ModelTraining)
        );
        assert_eq!(CreditOperationType::parse("bogus"), None);
    }
}
