use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{CounterKind, EdgeKind, PostCounters};
use crate::error::{ServiceError, ServiceResult, StoreError, StoreResult};
use crate::metrics;
use crate::repository::{EngagementStore, StoreTx};

/// Keeps the denormalized per-post counters in step with edge and comment changes
///
/// Counters are written inside the same unit of work as the change that
/// triggers them, on a locked post row, so concurrent events on one post
/// serialize and no increment is lost.
///
/// Invariants:
/// - like_count == number of like edges on the post
/// - comment_count == number of comments on the post
/// - view_count only grows
/// - no counter ever goes below zero; a decrement at zero is clamped and
///   reported as drift instead of failing the caller
#[derive(Clone)]
pub struct CounterMaintainer {
    store: Arc<dyn EngagementStore>,
}

/// Outcome of a full reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
}

impl CounterMaintainer {
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self { store }
    }

    // ========== Event hooks (caller's unit of work) ==========

    pub(crate) async fn on_like_added(
        &self,
        tx: &mut dyn StoreTx,
        post_id: Uuid,
    ) -> StoreResult<i64> {
        self.adjust(tx, post_id, CounterKind::Likes, 1).await
    }

    pub(crate) async fn on_like_removed(
        &self,
        tx: &mut dyn StoreTx,
        post_id: Uuid,
    ) -> StoreResult<i64> {
        self.adjust(tx, post_id, CounterKind::Likes, -1).await
    }

    pub(crate) async fn on_comment_added(
        &self,
        tx: &mut dyn StoreTx,
        post_id: Uuid,
    ) -> StoreResult<i64> {
        self.adjust(tx, post_id, CounterKind::Comments, 1).await
    }

    pub(crate) async fn on_comment_removed(
        &self,
        tx: &mut dyn StoreTx,
        post_id: Uuid,
    ) -> StoreResult<i64> {
        self.adjust(tx, post_id, CounterKind::Comments, -1).await
    }

    pub(crate) async fn on_viewed(
        &self,
        tx: &mut dyn StoreTx,
        post_id: Uuid,
    ) -> StoreResult<i64> {
        self.adjust(tx, post_id, CounterKind::Views, 1).await
    }

    /// Apply `delta` to one counter and return the stored value
    async fn adjust(
        &self,
        tx: &mut dyn StoreTx,
        post_id: Uuid,
        kind: CounterKind,
        delta: i64,
    ) -> StoreResult<i64> {
        let post = tx
            .lock_post(post_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("post {}", post_id)))?;

        let mut counters = post.counters();
        let current = counters.get(kind);
        let next = current + delta;

        if next < 0 {
            warn!(
                post_id = %post_id,
                counter = kind.as_str(),
                current = current,
                "Counter underflow, clamping at zero"
            );
            metrics::record_counter_underflow(kind.as_str());
            counters.set(kind, 0);
        } else {
            counters.set(kind, next);
        }

        tx.write_counters(&counters).await?;
        Ok(counters.get(kind))
    }

    // ========== Reads ==========

    pub async fn counters(&self, post_id: Uuid) -> ServiceResult<PostCounters> {
        self.store
            .get_post(post_id)
            .await?
            .map(|post| post.counters())
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))
    }

    // ========== Reconciliation ==========

    /// Rewrite likes and comments of one post from the source rows
    ///
    /// Views have no source rows (anonymous views are counted too) and are kept.
    pub async fn recompute_counters(&self, post_id: Uuid) -> ServiceResult<PostCounters> {
        let (counters, _) = self.recompute(post_id).await?;
        Ok(counters)
    }

    async fn recompute(&self, post_id: Uuid) -> ServiceResult<(PostCounters, bool)> {
        let mut tx = self.store.begin().await?;
        let post = tx
            .lock_post(post_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))?;

        let before = post.counters();
        let after = PostCounters {
            like_count: tx.count_by_object(EdgeKind::Like, post_id).await?,
            comment_count: tx.count_comments(post_id).await?,
            ..before
        };

        let drifted = after != before;
        if drifted {
            tx.write_counters(&after).await?;
            for kind in [CounterKind::Likes, CounterKind::Comments] {
                if before.get(kind) != after.get(kind) {
                    warn!(
                        post_id = %post_id,
                        counter = kind.as_str(),
                        stored = before.get(kind),
                        actual = after.get(kind),
                        "Counter drift repaired"
                    );
                    metrics::record_counter_repaired(kind.as_str());
                }
            }
        }
        tx.commit().await?;

        Ok((after, drifted))
    }

    /// Recompute every post's counters
    ///
    /// Posts deleted while the pass runs are skipped. Other failures are
    /// logged and counted so one bad post does not stop the pass.
    pub async fn reconcile_all(&self) -> ServiceResult<ReconcileReport> {
        let post_ids = self.store.list_post_ids().await?;
        let mut report = ReconcileReport::default();

        for post_id in post_ids {
            match self.recompute(post_id).await {
                Ok((_, drifted)) => {
                    report.checked += 1;
                    if drifted {
                        report.repaired += 1;
                    }
                }
                Err(ServiceError::NotFound(_)) => {
                    debug!(post_id = %post_id, "Post deleted during reconciliation");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(post_id = %post_id, error = %e, "Failed to reconcile counters");
                }
            }
        }

        info!(
            checked = report.checked,
            repaired = report.repaired,
            failed = report.failed,
            "Counter reconciliation finished"
        );
        Ok(report)
    }
}
