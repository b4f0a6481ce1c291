//! Optimistic read-modify-write on a single document.
//!
//! The document is read together with its `updateTime`, mutated in memory and
//! written back with `currentDocument.updateTime` as a precondition. A lost race
//! re-reads and re-applies the mutation, so the mutation must decide purely from
//! the state it is handed.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::encode_fields;

/// Maximum attempts for one compare-and-set.
const MAX_CAS_ATTEMPTS: u32 = 5;

/// Base delay between attempts (milliseconds), scaled linearly by attempt.
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Result of a compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The document does not exist.
    Missing,
    /// The mutation declined to write; carries the current state.
    Unchanged(T),
    /// The mutation was written; carries the new state.
    Written(T),
}

impl<T> CasOutcome<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, CasOutcome::Written(_))
    }

    pub fn into_inner(self) -> Option<T> {
        match self {
            CasOutcome::Missing => None,
            CasOutcome::Unchanged(v) | CasOutcome::Written(v) => Some(v),
        }
    }
}

/// Apply `mutate` to the document atomically.
///
/// `mutate` returns `true` to write the modified value, `false` to leave the
/// document untouched.
pub async fn compare_and_set<T, F>(
    client: &FirestoreClient,
    collection: &str,
    doc_id: &str,
    mut mutate: F,
) -> FirestoreResult<CasOutcome<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T) -> bool,
{
    let mut last_error = None;

    for attempt in 0..MAX_CAS_ATTEMPTS {
        let Some(doc) = client.get_document(collection, doc_id).await? else {
            return Ok(CasOutcome::Missing);
        };

        let mut value: T = doc.decode()?;
        if !mutate(&mut value) {
            return Ok(CasOutcome::Unchanged(value));
        }

        let fields = encode_fields(&value)?;
        match client
            .update_document_with_precondition(
                collection,
                doc_id,
                fields,
                None,
                doc.update_time.as_deref(),
            )
            .await
        {
            Ok(_) => return Ok(CasOutcome::Written(value)),
            Err(e) if e.is_precondition_failed() => {
                debug!(
                    collection = %collection,
                    doc_id = %doc_id,
                    attempt = attempt + 1,
                    "Compare-and-set lost a race, retrying"
                );
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(
                    RETRY_BASE_DELAY_MS * (attempt as u64 + 1),
                ))
                .await;
            }
            Err(e) => return Err(e),
        }
    }

    warn!(
        collection = %collection,
        doc_id = %doc_id,
        attempts = MAX_CAS_ATTEMPTS,
        error = ?last_error,
        "Compare-and-set failed after retries"
    );
    Err(FirestoreError::request_failed(format!(
        "{}/{}: too many concurrent updates",
        collection, doc_id
    )))
}
