//! Credit ledger.
//!
//! Balances live in the [`CreditStore`]; every movement is also appended to
//! the user's transaction history in a background task so history writes never
//! hold up generation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use story_firestore::DebitOutcome;
use story_models::{CreditOperationType, CreditTransaction, CreditTransactionKind};

use crate::error::{LedgerError, LedgerResult};
use crate::metrics::record_credits;
use crate::store::CreditStore;

/// Timeout for background transaction recording.
const TRANSACTION_RECORD_TIMEOUT: Duration = Duration::from_secs(5);

/// Delays between refund attempts after a store error.
const REFUND_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_secs(1),
    Duration::from_secs(5),
];

#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
    signup_credits: u32,
    refund_delays: Vec<Duration>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>, signup_credits: u32) -> Self {
        Self {
            store,
            signup_credits,
            refund_delays: REFUND_RETRY_DELAYS.to_vec(),
        }
    }

    pub fn with_refund_delays(mut self, delays: Vec<Duration>) -> Self {
        self.refund_delays = delays;
        self
    }

    /// Balance, 0 when the user has no account.
    pub async fn get_balance(&self, user_id: &str) -> LedgerResult<u32> {
        Ok(self.store.get_balance(user_id).await?)
    }

    pub async fn has_enough(&self, user_id: &str, amount: u32) -> LedgerResult<bool> {
        Ok(self.get_balance(user_id).await? >= amount)
    }

    /// Fail with `InsufficientCredits` unless the balance covers `amount`.
    pub async fn require(&self, user_id: &str, amount: u32) -> LedgerResult<()> {
        let available = self.get_balance(user_id).await?;
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Create the user's account with the signup grant on first sight.
    ///
    /// Returns `true` if the account was created by this call.
    pub async fn ensure_account(&self, user_id: &str) -> LedgerResult<bool> {
        let created = self.store.ensure_account(user_id, self.signup_credits).await?;
        if created {
            info!(user_id = %user_id, credits = self.signup_credits, "Created credit account");
            if self.signup_credits > 0 {
                self.record(
                    CreditTransaction::new(
                        user_id,
                        CreditTransactionKind::Grant,
                        CreditOperationType::Grant,
                        self.signup_credits,
                        self.signup_credits,
                        "Signup credits",
                    ),
                );
            }
        }
        Ok(created)
    }

    /// Atomically check and decrement the balance.
    ///
    /// Returns the balance after the debit.
    pub async fn debit(
        &self,
        user_id: &str,
        amount: u32,
        operation: CreditOperationType,
        reference_id: &str,
    ) -> LedgerResult<u32> {
        match self.store.try_debit(user_id, amount).await? {
            DebitOutcome::Debited { balance_after } => {
                debug!(
                    user_id = %user_id,
                    amount,
                    operation = operation.as_str(),
                    reference_id = %reference_id,
                    balance_after,
                    "Debited credits"
                );
                record_credits("debit", amount);
                self.record(
                    CreditTransaction::new(
                        user_id,
                        CreditTransactionKind::Debit,
                        operation,
                        amount,
                        balance_after,
                        operation.label(),
                    )
                    .with_reference(reference_id),
                );
                Ok(balance_after)
            }
            DebitOutcome::Insufficient { available } => {
                info!(
                    user_id = %user_id,
                    required = amount,
                    available,
                    operation = operation.as_str(),
                    "Insufficient credits"
                );
                Err(LedgerError::InsufficientCredits {
                    required: amount,
                    available,
                })
            }
        }
    }

    /// Return credits for billed work that did not complete.
    ///
    /// Store errors are retried on a short schedule. Never fails: a refund
    /// that still cannot be written is logged and swallowed so refunds cannot
    /// block state transitions.
    pub async fn refund(
        &self,
        user_id: &str,
        amount: u32,
        operation: CreditOperationType,
        reference_id: &str,
        reason: &str,
    ) {
        if amount == 0 {
            return;
        }

        let Some(balance_after) = self.credit_with_retry(user_id, amount, reference_id).await else {
            error!(
                user_id = %user_id,
                amount,
                reference_id = %reference_id,
                attempts = self.refund_delays.len() + 1,
                "Credit refund failed"
            );
            record_credits("refund_lost", amount);
            return;
        };

        info!(
            user_id = %user_id,
            amount,
            operation = operation.as_str(),
            reference_id = %reference_id,
            reason,
            "Refunded credits"
        );
        record_credits("refund", amount);
        self.record(
            CreditTransaction::new(
                user_id,
                CreditTransactionKind::Refund,
                operation,
                amount,
                balance_after,
                format!("Refund: {}", reason),
            )
            .with_reference(reference_id),
        );
    }

    async fn credit_with_retry(&self, user_id: &str, amount: u32, reference_id: &str) -> Option<u32> {
        let mut delays = self.refund_delays.iter();
        loop {
            match self.store.credit(user_id, amount).await {
                Ok(balance_after) => return Some(balance_after),
                Err(e) => {
                    let delay = delays.next()?;
                    warn!(
                        user_id = %user_id,
                        reference_id = %reference_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Refund attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }
    }

    /// Top up a balance (purchase or manual adjustment).
    pub async fn grant(&self, user_id: &str, amount: u32, reason: &str) -> LedgerResult<u32> {
        let balance_after = self.store.credit(user_id, amount).await?;
        info!(user_id = %user_id, amount, reason, balance_after, "Granted credits");
        record_credits("grant", amount);
        self.record(CreditTransaction::new(
            user_id,
            CreditTransactionKind::Grant,
            CreditOperationType::Grant,
            amount,
            balance_after,
            reason,
        ));
        Ok(balance_after)
    }

    pub async fn recent_transactions(&self, user_id: &str, limit: u32) -> LedgerResult<Vec<CreditTransaction>> {
        Ok(self.store.recent_transactions(user_id, limit).await?)
    }

    /// Record a transaction asynchronously (fire-and-forget).
    fn record(&self, transaction: CreditTransaction) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match tokio::time::timeout(TRANSACTION_RECORD_TIMEOUT, store.record_transaction(&transaction)).await {
                Ok(Ok(())) => debug!(
                    user_id = %transaction.user_id,
                    transaction_id = %transaction.id,
                    kind = transaction.kind.as_str(),
                    "Recorded credit transaction"
                ),
                Ok(Err(e)) => warn!(
                    user_id = %transaction.user_id,
                    error = %e,
                    "Failed to record credit transaction"
                ),
                Err(_) => warn!(
                    user_id = %transaction.user_id,
                    "Credit transaction recording timed out"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::FlakyStore;

    fn ledger(signup: u32) -> CreditLedger {
        CreditLedger::new(Arc::new(MemoryStore::new()), signup)
    }

    async fn wait_for_transactions(ledger: &CreditLedger, user: &str, count: usize) -> Vec<CreditTransaction> {
        for _ in 0..100 {
            let txs = ledger.recent_transactions(user, 100).await.unwrap();
            if txs.len() >= count {
                return txs;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ledger.recent_transactions(user, 100).await.unwrap()
    }

    #[tokio::test]
    async fn test_signup_grant_is_applied_once() {
        let ledger = ledger(5);
        assert!(ledger.ensure_account("u1").await.unwrap());
        assert!(!ledger.ensure_account("u1").await.unwrap());
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_debit_and_insufficient() {
        let ledger = ledger(2);
        ledger.ensure_account("u1").await.unwrap();

        assert_eq!(ledger.debit("u1", 2, CreditOperationType::PageImage, "p1").await.unwrap(), 0);
        let err = ledger
            .debit("u1", 1, CreditOperationType::PageImage, "p2")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits { required: 1, available: 0 }));
    }

    #[tokio::test]
    async fn test_unknown_user_balance_is_zero() {
        let ledger = ledger(0);
        assert_eq!(ledger.get_balance("ghost").await.unwrap(), 0);
        assert!(!ledger.has_enough("ghost", 1).await.unwrap());
        assert!(ledger.require("ghost", 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_restores_balance_and_records_history() {
        let ledger = ledger(3);
        ledger.ensure_account("u1").await.unwrap();
        ledger.debit("u1", 1, CreditOperationType::PageImage, "p1").await.unwrap();
        ledger
            .refund("u1", 1, CreditOperationType::PageImage, "p1", "generation failed")
            .await;

        assert_eq!(ledger.get_balance("u1").await.unwrap(), 3);
        let txs = wait_for_transactions(&ledger, "u1", 3).await;
        assert_eq!(txs.len(), 3);
        assert!(txs.iter().any(|t| t.kind == CreditTransactionKind::Refund));
    }

    #[tokio::test]
    async fn test_refund_retries_transient_store_errors() {
        let store = FlakyStore::new();
        let ledger = CreditLedger::new(store.stores().credits, 3).with_refund_delays(vec![Duration::from_millis(1)]);
        ledger.ensure_account("u1").await.unwrap();
        ledger.debit("u1", 1, CreditOperationType::PageImage, "p1").await.unwrap();

        store.fail_credit(1);
        ledger
            .refund("u1", 1, CreditOperationType::PageImage, "p1", "generation failed")
            .await;

        assert_eq!(ledger.get_balance("u1").await.unwrap(), 3);
        let txs = wait_for_transactions(&ledger, "u1", 3).await;
        assert!(txs.iter().any(|t| t.kind == CreditTransactionKind::Refund));
    }

    #[tokio::test]
    async fn test_refund_gives_up_after_retries() {
        let store = FlakyStore::new();
        let ledger = CreditLedger::new(store.stores().credits, 3)
            .with_refund_delays(vec![Duration::from_millis(1), Duration::from_millis(1)]);
        ledger.ensure_account("u1").await.unwrap();
        ledger.debit("u1", 1, CreditOperationType::PageImage, "p1").await.unwrap();

        store.fail_credit(3);
        ledger
            .refund("u1", 1, CreditOperationType::PageImage, "p1", "generation failed")
            .await;

        assert_eq!(ledger.get_balance("u1").await.unwrap(), 2);
        // Store has recovered; a later refund goes through on the first attempt
        ledger
            .refund("u1", 1, CreditOperationType::PageImage, "p1", "generation failed")
            .await;
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overspend() {
        let ledger = ledger(10);
        ledger.ensure_account("u1").await.unwrap();

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .debit("u1", 1, CreditOperationType::PageImage, &format!("p{}", i))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 10);
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_grant_tops_up() {
        let ledger = ledger(0);
        assert_eq!(ledger.grant("u2", 7, "purchase").await.unwrap(), 7);
        assert_eq!(ledger.grant("u2", 3, "bonus").await.unwrap(), 10);
    }
}
