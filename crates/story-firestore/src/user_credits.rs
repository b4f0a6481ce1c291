//! User credit balances.
//!
//! One `user_credits/{user_id}` document per user holding a non-negative integer
//! balance. Every mutation is an optimistic read-modify-write on `updateTime`, so
//! concurrent debits for the same user serialize and the balance never goes
//! below zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cas::{compare_and_set, CasOutcome};
use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::encode_fields;

pub const USER_CREDITS_COLLECTION: &str = "user_credits";

/// `user_credits/{user_id}` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: String,
    pub balance: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    pub fn new(user_id: impl Into<String>, balance: u32) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance_after: u32 },
    Insufficient { available: u32 },
}

#[derive(Clone)]
pub struct UserCreditsRepository {
    client: FirestoreClient,
}

impl UserCreditsRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Balance, or 0 when the user has no account yet.
    pub async fn get_balance(&self, user_id: &str) -> FirestoreResult<u32> {
        Ok(self
            .client
            .get_document(USER_CREDITS_COLLECTION, user_id)
            .await?
            .and_then(|doc| doc.field::<u32>("balance"))
            .unwrap_or(0))
    }

    /// Create the account with `initial` credits if it does not exist.
    ///
    /// Returns `true` if this call created it.
    pub async fn ensure_account(&self, user_id: &str, initial: u32) -> FirestoreResult<bool> {
        let account = CreditAccount::new(user_id, initial);
        match self
            .client
            .create_document(USER_CREDITS_COLLECTION, user_id, encode_fields(&account)?)
            .await
        {
            Ok(_) => {
                info!(user_id = %user_id, balance = initial, "Created credit account");
                Ok(true)
            }
            Err(FirestoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Atomically decrement the balance if it covers `amount`.
    pub async fn try_debit(&self, user_id: &str, amount: u32) -> FirestoreResult<DebitOutcome> {
        let mut short_by = None;
        let outcome = compare_and_set(
            &self.client,
            USER_CREDITS_COLLECTION,
            user_id,
            |account: &mut CreditAccount| {
                if account.balance < amount {
                    short_by = Some(account.balance);
                    return false;
                }
                short_by = None;
                account.balance -= amount;
                account.updated_at = Utc::now();
                true
            },
        )
        .await?;

        match outcome {
            CasOutcome::Written(account) => {
                debug!(user_id = %user_id, amount, balance = account.balance, "Debited credits");
                Ok(DebitOutcome::Debited {
                    balance_after: account.balance,
                })
            }
            CasOutcome::Unchanged(account) => Ok(DebitOutcome::Insufficient {
                available: short_by.unwrap_or(account.balance),
            }),
            CasOutcome::Missing => Ok(DebitOutcome::Insufficient { available: 0 }),
        }
    }

    /// Atomically increment the balance, creating the account if needed.
    ///
    /// Returns the balance after the increment.
    pub async fn credit(&self, user_id: &str, amount: u32) -> FirestoreResult<u32> {
        // Two rounds cover losing the create race to a concurrent ensure_account
        for _ in 0..2 {
            let outcome = compare_and_set(
                &self.client,
                USER_CREDITS_COLLECTION,
                user_id,
                |account: &mut CreditAccount| {
                    account.balance = account.balance.saturating_add(amount);
                    account.updated_at = Utc::now();
                    true
                },
            )
            .await?;

            match outcome {
                CasOutcome::Written(account) | CasOutcome::Unchanged(account) => {
                    return Ok(account.balance)
                }
                CasOutcome::Missing => {
                    if self.ensure_account(user_id, amount).await? {
                        return Ok(amount);
                    }
                    warn!(user_id = %user_id, "Credit account appeared concurrently, retrying credit");
                }
            }
        }

        Err(FirestoreError::request_failed(format!(
            "Failed to credit user {}",
            user_id
        )))
    }
}
