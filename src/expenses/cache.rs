use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::ExpenseListItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListScope {
    /// Every expense of the company, the reviewer inbox.
    Company,
    /// Expenses submitted by (or assigned to) one profile.
    Submitter(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub company_id: Uuid,
    pub scope: ListScope,
}

impl CacheKey {
    pub fn new(company_id: Uuid, scope: ListScope) -> Self {
        Self { company_id, scope }
    }
}

struct Entry {
    items: Arc<Vec<ExpenseListItem>>,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, Entry>,
    generations: HashMap<Uuid, u64>,
}

/// Expense lists keyed by company and scope.
///
/// Mutations invalidate every list of the affected company. A load that
/// started before an invalidation is returned to its caller but not stored.
#[derive(Clone)]
pub struct ExpenseListCache {
    inner: Arc<RwLock<CacheInner>>,
    ttl: Duration,
}

impl ExpenseListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner::default())),
            ttl,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Vec<ExpenseListItem>>> {
        let guard = self.inner.read().await;
        guard
            .entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.items.clone())
    }

    pub async fn generation(&self, company_id: Uuid) -> u64 {
        let guard = self.inner.read().await;
        guard.generations.get(&company_id).copied().unwrap_or(0)
    }

    /// Stores `items` unless the company was invalidated after `generation`.
    pub async fn store(
        &self,
        key: CacheKey,
        generation: u64,
        items: Vec<ExpenseListItem>,
    ) -> Arc<Vec<ExpenseListItem>> {
        let items = Arc::new(items);
        let mut guard = self.inner.write().await;
        let current = guard
            .generations
            .get(&key.company_id)
            .copied()
            .unwrap_or(0);
        if current == generation {
            guard.entries.insert(
                key,
                Entry {
                    items: items.clone(),
                    stored_at: Instant::now(),
                },
            );
        } else {
            debug!(
                company_id = %key.company_id,
                "discarding expense list loaded before invalidation"
            );
        }
        items
    }

    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: CacheKey,
        load: F,
    ) -> Result<Arc<Vec<ExpenseListItem>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ExpenseListItem>, E>>,
    {
        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }
        let generation = self.generation(key.company_id).await;
        let items = load().await?;
        Ok(self.store(key, generation, items).await)
    }

    pub async fn invalidate_company(&self, company_id: Uuid) {
        let mut guard = self.inner.write().await;
        guard.entries.retain(|key, _| key.company_id != company_id);
        *guard.generations.entry(company_id).or_insert(0) += 1;
        debug!(%company_id, "invalidated cached expense lists");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expenses::{fixtures::item, ExpenseStatus};

    fn key(company_id: Uuid) -> CacheKey {
        CacheKey::new(company_id, ListScope::Company)
    }

    #[tokio::test]
    async fn loads_once_then_serves_hits() {
        let cache = ExpenseListCache::new(Duration::from_secs(60));
        let company = Uuid::new_v4();
        let mut loads = 0;

        for _ in 0..2 {
            let items = cache
                .get_or_load(key(company), || {
                    loads += 1;
                    async { Ok::<_, ()>(vec![item(ExpenseStatus::Submitted, 10)]) }
                })
                .await
                .unwrap();
            assert_eq!(items.len(), 1);
        }
        assert_eq!(loads, 1);
    }

    #[tokio::test]
    async fn invalidation_only_touches_one_company() {
        let cache = ExpenseListCache::new(Duration::from_secs(60));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache.store(key(first), 0, vec![]).await;
        cache
            .store(CacheKey::new(first, ListScope::Submitter(Uuid::new_v4())), 0, vec![])
            .await;
        cache.store(key(second), 0, vec![]).await;

        cache.invalidate_company(first).await;

        assert!(cache.get(&key(first)).await.is_none());
        assert!(cache.get(&key(second)).await.is_some());
        assert_eq!(cache.generation(first).await, 1);
    }

    #[tokio::test]
    async fn stale_generation_is_not_stored() {
        let cache = ExpenseListCache::new(Duration::from_secs(60));
        let company = Uuid::new_v4();
        let generation = cache.generation(company).await;
        cache.invalidate_company(company).await;

        let returned = cache
            .store(key(company), generation, vec![item(ExpenseStatus::Draft, 1)])
            .await;
        assert_eq!(returned.len(), 1);
        assert!(cache.get(&key(company)).await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ExpenseListCache::new(Duration::ZERO);
        let company = Uuid::new_v4();
        cache.store(key(company), 0, vec![]).await;
        assert!(cache.get(&key(company)).await.is_none());
    }
}
