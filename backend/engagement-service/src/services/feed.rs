//! Feed ranking
//!
//! Every request re-scores the whole candidate set with a recency-decayed
//! engagement score:
//!
//! ```text
//! engagement = sqrt(likes + comments + sqrt(views))
//! raw        = engagement * (1 + follow) * (1 - viewed * 0.9) + follow * 2
//! score      = raw / sqrt(hours_away / 2 + 1)
//! ```
//!
//! `follow` and `viewed` are 0/1 viewer signals. They stay at 0 unless
//! personalization is enabled, in which case they come from the follow
//! relation and the view-history collaborator.
//!
//! Ranking is read-only; dropping the future mid-way has no side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::domain::{EdgeKind, Post};
use crate::error::ServiceResult;
use crate::metrics;
use crate::pagination::{paginate, Page, PageRequest};
use crate::repository::EngagementStore;
use crate::services::relations::RelationStore;

/// Weight removed from an already-seen post
pub const READ_PENALTY: f64 = 0.9;
/// Flat bonus for posts by followed authors
pub const FOLLOW_BONUS: f64 = 2.0;

/// Everything the score depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub hours_away: f64,
    pub follows_author: bool,
    pub has_viewed: bool,
}

/// Per-post viewer signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerSignals {
    pub follows_author: bool,
    pub has_viewed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPost {
    pub post: Post,
    pub score: f64,
}

pub fn decayed_score(inputs: &ScoreInputs) -> f64 {
    let follow_boost = if inputs.follows_author { 1.0 } else { 0.0 };
    let read_penalty = if inputs.has_viewed { 1.0 } else { 0.0 };

    let engagement = (inputs.like_count as f64
        + inputs.comment_count as f64
        + (inputs.view_count as f64).sqrt())
    .sqrt();
    let raw = engagement * (1.0 + follow_boost) * (1.0 - read_penalty * READ_PENALTY)
        + follow_boost * FOLLOW_BONUS;

    raw / (inputs.hours_away / 2.0 + 1.0).sqrt()
}

/// Fractional hours from `created_at` to `now`; future timestamps count as 0
pub fn hours_away(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// Score and order candidates
///
/// Order: score descending, then newer first, then id ascending, so equal
/// inputs always produce the same output.
pub fn rank_candidates(
    candidates: Vec<Post>,
    signals: &HashMap<Uuid, ViewerSignals>,
    now: DateTime<Utc>,
    limit: Option<usize>,
) -> Vec<RankedPost> {
    let mut ranked: Vec<RankedPost> = candidates
        .into_iter()
        .map(|post| {
            let viewer = signals.get(&post.id).copied().unwrap_or_default();
            let score = decayed_score(&ScoreInputs {
                like_count: post.like_count,
                comment_count: post.comment_count,
                view_count: post.view_count,
                hours_away: hours_away(post.created_at, now),
                follows_author: viewer.follows_author,
                has_viewed: viewer.has_viewed,
            });
            RankedPost { post, score }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.post.created_at.cmp(&a.post.created_at))
            .then_with(|| a.post.id.cmp(&b.post.id))
    });

    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    ranked
}

/// Which of a set of posts a user has already seen
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewHistory: Send + Sync {
    async fn viewed_among(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
    ) -> ServiceResult<HashSet<Uuid>>;
}

/// View history backed by the store's view records
#[derive(Clone)]
pub struct StoreViewHistory {
    store: Arc<dyn EngagementStore>,
}

impl StoreViewHistory {
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ViewHistory for StoreViewHistory {
    async fn viewed_among(
        &self,
        user_id: Uuid,
        post_ids: &[Uuid],
    ) -> ServiceResult<HashSet<Uuid>> {
        Ok(self.store.viewed_posts(user_id, post_ids).await?)
    }
}

#[derive(Clone)]
pub struct FeedRankingEngine {
    store: Arc<dyn EngagementStore>,
    relations: RelationStore,
    view_history: Arc<dyn ViewHistory>,
    personalization: bool,
    default_limit: usize,
}

impl FeedRankingEngine {
    pub fn new(store: Arc<dyn EngagementStore>, config: &FeedConfig) -> Self {
        Self {
            relations: RelationStore::new(store.clone()),
            view_history: Arc::new(StoreViewHistory::new(store.clone())),
            store,
            personalization: config.personalization,
            default_limit: config.default_limit,
        }
    }

    pub fn with_view_history(mut self, view_history: Arc<dyn ViewHistory>) -> Self {
        self.view_history = view_history;
        self
    }

    /// Top `limit` posts for `viewer_id` as of `now`, the configured
    /// default when no limit is given
    pub async fn rank_feed(
        &self,
        viewer_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<RankedPost>> {
        let limit = limit.unwrap_or(self.default_limit);
        self.rank(viewer_id, now, Some(limit)).await
    }

    /// The full ranked set, one page at a time
    pub async fn feed_page(
        &self,
        viewer_id: Uuid,
        now: DateTime<Utc>,
        page: PageRequest,
    ) -> ServiceResult<Page<RankedPost>> {
        let ranked = self.rank(viewer_id, now, None).await?;
        Ok(paginate(ranked, page))
    }

    async fn rank(
        &self,
        viewer_id: Uuid,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<RankedPost>> {
        let candidates = self.store.list_posts().await?;
        let signals = self.viewer_signals(viewer_id, &candidates).await?;

        let started = Instant::now();
        let total = candidates.len();
        let ranked = rank_candidates(candidates, &signals, now, limit);
        metrics::record_feed_ranking(started.elapsed());

        debug!(
            viewer_id = %viewer_id,
            candidates = total,
            returned = ranked.len(),
            personalized = self.personalization,
            "Feed ranked"
        );
        Ok(ranked)
    }

    async fn viewer_signals(
        &self,
        viewer_id: Uuid,
        candidates: &[Post],
    ) -> ServiceResult<HashMap<Uuid, ViewerSignals>> {
        if !self.personalization || candidates.is_empty() {
            return Ok(HashMap::new());
        }

        let followed: HashSet<Uuid> = self
            .relations
            .list_by_subject(EdgeKind::Follow, viewer_id)
            .await?
            .into_iter()
            .collect();

        let post_ids: Vec<Uuid> = candidates.iter().map(|post| post.id).collect();
        let viewed = self.view_history.viewed_among(viewer_id, &post_ids).await?;

        Ok(candidates
            .iter()
            .map(|post| {
                (
                    post.id,
                    ViewerSignals {
                        follows_author: followed.contains(&post.author_id),
                        has_viewed: viewed.contains(&post.id),
                    },
                )
            })
            .collect())
    }
}
