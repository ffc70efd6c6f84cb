use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::ServiceResult;
use crate::repository::{EngagementStore, MemoryStore, PgEngagementStore};
use crate::services::{
    ContentService, CounterMaintainer, EngagementService, FeedRankingEngine, Notifier, PgNotifier,
};

/// Services shared by the HTTP surface and background jobs
///
/// The store itself stays private: every mutation goes through a service so
/// edge writes and counter updates cannot be split.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn EngagementStore>,
    pub engagement: EngagementService,
    pub content: ContentService,
    pub feed: FeedRankingEngine,
    pub counters: CounterMaintainer,
}

impl AppState {
    /// Services over a fresh in-memory store
    pub fn in_memory(notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        Self::new(Arc::new(MemoryStore::new()), notifier, config)
    }

    /// Services over PostgreSQL, with notifications persisted through the same pool
    pub fn postgres(pool: PgPool, config: &Config) -> Self {
        let store = PgEngagementStore::new(
            pool.clone(),
            Duration::from_millis(config.database.begin_timeout_ms),
        );
        Self::new(Arc::new(store), Arc::new(PgNotifier::new(pool)), config)
    }

    pub(crate) fn new(
        store: Arc<dyn EngagementStore>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        let mut engagement = EngagementService::new(store.clone(), notifier);
        if let Some(policy) = config.retry.policy() {
            engagement = engagement.with_retry(policy);
        }

        Self {
            engagement,
            content: ContentService::new(store.clone()),
            feed: FeedRankingEngine::new(store.clone(), &config.feed),
            counters: CounterMaintainer::new(store.clone()),
            store,
        }
    }

    /// Store connectivity for readiness checks
    pub async fn ping(&self) -> ServiceResult<()> {
        Ok(self.store.ping().await?)
    }
}
