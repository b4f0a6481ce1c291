//! Access token caching for Firestore requests.
//!
//! Tokens are refreshed a minute before expiry. Refresh happens under the write
//! lock so concurrent callers wait for one refresh instead of each fetching. If
//! a refresh fails while the old token is still usable, the old token is served.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// TTL assumed when the provider reports an unusable expiry.
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for Firestore REST access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Where tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// Google service account credentials
    Provider(Arc<dyn TokenProvider>),
    /// No authentication (local emulator)
    Anonymous,
}

pub struct TokenCache {
    source: TokenSource,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.source, TokenSource::Anonymous)
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Get a bearer token, or `None` when running anonymously.
    pub async fn get_token(&self) -> FirestoreResult<Option<String>> {
        let provider = match &self.source {
            TokenSource::Anonymous => return Ok(None),
            TokenSource::Provider(p) => p,
        };

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.is_fresh() {
                return Ok(Some(cached.access_token.clone()));
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh() {
                return Ok(Some(cached.access_token.clone()));
            }
        }

        match provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let now = Utc::now();
                let expires_at = match (token.expires_at() - now).to_std() {
                    Ok(ttl) => Instant::now() + ttl,
                    Err(_) if token.expires_at() > now => Instant::now() + TOKEN_DEFAULT_TTL,
                    Err(_) => Instant::now(),
                };
                let access_token = token.as_str().to_string();
                *cache = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });
                debug!("Refreshed Firestore access token");
                Ok(Some(access_token))
            }
            Err(e) => match cache.as_ref() {
                Some(cached) if cached.is_usable() => {
                    warn!(error = %e, "Token refresh failed, serving existing token");
                    Ok(Some(cached.access_token.clone()))
                }
                _ => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_anonymous_source_has_no_token() {
        let cache = TokenCache::new(TokenSource::Anonymous);
        assert!(cache.is_anonymous());
        assert_eq!(cache.get_token().await.unwrap(), None);
    }

    #[test]
    fn test_firestore_scope() {
        assert!(FIRESTORE_SCOPE.contains("datastore"));
    }
}
