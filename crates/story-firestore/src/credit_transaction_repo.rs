//! Credit transaction history under `user_credits/{user_id}/transactions`.

use tracing::{info, warn};

use story_models::CreditTransaction;

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{encode_fields, StructuredQuery};
use crate::user_credits::USER_CREDITS_COLLECTION;

const TRANSACTIONS_COLLECTION: &str = "transactions";

#[derive(Clone)]
pub struct CreditTransactionRepository {
    client: FirestoreClient,
}

impl CreditTransactionRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn parent(user_id: &str) -> String {
        format!("{}/{}", USER_CREDITS_COLLECTION, user_id)
    }

    pub async fn create(&self, transaction: &CreditTransaction) -> FirestoreResult<()> {
        let collection = format!("{}/{}", Self::parent(&transaction.user_id), TRANSACTIONS_COLLECTION);
        self.client
            .create_document(&collection, &transaction.id, encode_fields(transaction)?)
            .await?;
        info!(
            user_id = %transaction.user_id,
            tx_id = %transaction.id,
            kind = transaction.kind.as_str(),
            operation = transaction.operation_type.as_str(),
            amount = transaction.amount,
            "Recorded credit transaction"
        );
        Ok(())
    }

    /// Most recent transactions, newest first. `limit` is clamped to 1..=100.
    pub async fn list_recent(&self, user_id: &str, limit: u32) -> FirestoreResult<Vec<CreditTransaction>> {
        let query = StructuredQuery::collection(TRANSACTIONS_COLLECTION)
            .order_by_desc("created_at")
            .limit(limit.clamp(1, 100));
        let docs = self.client.run_query(&Self::parent(user_id), query).await?;

        let mut transactions = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.decode::<CreditTransaction>() {
                Ok(tx) => transactions.push(tx),
                Err(e) => warn!(
                    user_id = %user_id,
                    tx_id = doc.doc_id().unwrap_or(""),
                    error = %e,
                    "Failed to parse credit transaction document"
                ),
            }
        }
        Ok(transactions)
    }
}
