//! Per-user story list cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use story_models::StorySummary;

const MAX_USERS: u64 = 10_000;

#[derive(Clone)]
pub struct StoryListCache {
    inner: Cache<String, Arc<Vec<StorySummary>>>,
}

impl StoryListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(MAX_USERS).time_to_live(ttl).build(),
        }
    }

    /// Cached list for `user_id`, loading it on a miss.
    pub async fn get_or_load<F, Fut, E>(&self, user_id: &str, load: F) -> Result<Arc<Vec<StorySummary>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<StorySummary>, E>>,
    {
        if let Some(hit) = self.inner.get(user_id).await {
            return Ok(hit);
        }

        let list = Arc::new(load().await?);
        self.inner.insert(user_id.to_string(), Arc::clone(&list)).await;
        Ok(list)
    }

    pub async fn invalidate(&self, user_id: &str) {
        debug!(user_id = %user_id, "Invalidating story list cache");
        self.inner.invalidate(user_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_loads_once_until_invalidated() {
        let cache = StoryListCache::new(Duration::from_secs(60));
        let loads = AtomicU32::new(0);

        for _ in 0..3 {
            let list = cache
                .get_or_load("u1", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(Vec::new())
                })
                .await
                .unwrap();
            assert!(list.is_empty());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cache.invalidate("u1").await;
        cache
            .get_or_load("u1", || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Vec::new())
            })
            .await
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_errors_are_not_cached() {
        let cache = StoryListCache::new(Duration::from_secs(60));
        let result = cache.get_or_load("u1", || async { Err::<Vec<StorySummary>, _>("down") }).await;
        assert!(result.is_err());

        let result = cache.get_or_load("u1", || async { Ok::<_, &str>(Vec::new()) }).await;
        assert!(result.is_ok());
    }
}
