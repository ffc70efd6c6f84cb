use resilience::{with_retry_if, RetryConfig, RetryError};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Edge, EdgeKind, Post, User};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::pagination::{paginate, Page, PageRequest};
use crate::repository::EngagementStore;
use crate::services::counters::CounterMaintainer;
use crate::services::notifications::{new_follower_event, Notifier};
use crate::services::relations::RelationStore;

/// Like, favorite and follow toggles
///
/// Each toggle is one unit of work: existence checks, the edge write and the
/// counter update commit together or not at all. "Add" fails with
/// `AlreadyExists` when the edge is present, "remove" fails with `NotFound`
/// when it is absent; neither is idempotent.
///
/// When a retry policy is set, whole units of work are retried on
/// `StoreUnavailable` only. Business outcomes are never retried.
#[derive(Clone)]
pub struct EngagementService {
    store: Arc<dyn EngagementStore>,
    relations: RelationStore,
    counters: CounterMaintainer,
    notifier: Arc<dyn Notifier>,
    retry: Option<RetryConfig>,
}

impl EngagementService {
    pub fn new(store: Arc<dyn EngagementStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            relations: RelationStore::new(store.clone()),
            counters: CounterMaintainer::new(store.clone()),
            store,
            notifier,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    // ========== Likes ==========

    /// Like a post; returns the post's new like count
    pub async fn add_like(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<i64> {
        self.run(EdgeKind::Like, "add", || self.add_like_once(user_id, post_id))
            .await
    }

    /// Unlike a post; returns the post's new like count
    pub async fn remove_like(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<i64> {
        self.run(EdgeKind::Like, "remove", || {
            self.remove_like_once(user_id, post_id)
        })
        .await
    }

    async fn add_like_once(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<i64> {
        let mut tx = self.store.begin().await?;

        if tx.lock_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }
        if !tx.user_exists(user_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }

        self.relations
            .create_in(tx.as_mut(), EdgeKind::Like, user_id, post_id)
            .await?;
        let like_count = self.counters.on_like_added(tx.as_mut(), post_id).await?;
        tx.commit().await?;

        info!(user_id = %user_id, post_id = %post_id, like_count, "Post liked");
        Ok(like_count)
    }

    async fn remove_like_once(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<i64> {
        let mut tx = self.store.begin().await?;

        if tx.lock_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }

        self.relations
            .remove_in(tx.as_mut(), EdgeKind::Like, user_id, post_id)
            .await?;
        let like_count = self.counters.on_like_removed(tx.as_mut(), post_id).await?;
        tx.commit().await?;

        info!(user_id = %user_id, post_id = %post_id, like_count, "Post unliked");
        Ok(like_count)
    }

    // ========== Favorites ==========

    pub async fn add_favorite(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<Edge> {
        self.run(EdgeKind::Favorite, "add", || {
            self.add_favorite_once(user_id, post_id)
        })
        .await
    }

    pub async fn remove_favorite(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        self.run(EdgeKind::Favorite, "remove", || {
            self.remove_favorite_once(user_id, post_id)
        })
        .await
    }

    async fn add_favorite_once(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<Edge> {
        let mut tx = self.store.begin().await?;

        // Locked so a concurrent delete cannot orphan the new edge
        if tx.lock_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }
        if !tx.user_exists(user_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }

        let edge = self
            .relations
            .create_in(tx.as_mut(), EdgeKind::Favorite, user_id, post_id)
            .await?;
        tx.commit().await?;

        info!(user_id = %user_id, post_id = %post_id, "Post favorited");
        Ok(edge)
    }

    async fn remove_favorite_once(&self, user_id: Uuid, post_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;

        if tx.lock_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }

        self.relations
            .remove_in(tx.as_mut(), EdgeKind::Favorite, user_id, post_id)
            .await?;
        tx.commit().await?;

        info!(user_id = %user_id, post_id = %post_id, "Post unfavorited");
        Ok(())
    }

    // ========== Follows ==========

    /// Follow a user and trigger a NEW_FOLLOWER notification for the followee
    pub async fn add_follow(&self, follower_id: Uuid, followee_id: Uuid) -> ServiceResult<Edge> {
        self.run(EdgeKind::Follow, "add", || {
            self.add_follow_once(follower_id, followee_id)
        })
        .await
    }

    pub async fn remove_follow(&self, follower_id: Uuid, followee_id: Uuid) -> ServiceResult<()> {
        self.run(EdgeKind::Follow, "remove", || {
            self.remove_follow_once(follower_id, followee_id)
        })
        .await
    }

    async fn add_follow_once(&self, follower_id: Uuid, followee_id: Uuid) -> ServiceResult<Edge> {
        if follower_id == followee_id {
            return Err(ServiceError::SelfAction(
                "users cannot follow themselves".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        if !tx.user_exists(followee_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", followee_id)));
        }
        let actor = tx
            .get_user(follower_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", follower_id)))?;

        let edge = self
            .relations
            .create_in(tx.as_mut(), EdgeKind::Follow, follower_id, followee_id)
            .await?;
        let follower_count = tx.count_by_object(EdgeKind::Follow, followee_id).await?;
        tx.commit().await?;

        info!(
            follower_id = %follower_id,
            followee_id = %followee_id,
            follower_count,
            "User followed"
        );

        let event = new_follower_event(followee_id, &actor, follower_count);
        if let Err(e) = self.notifier.notify(event) {
            warn!(
                followee_id = %followee_id,
                error = %e,
                "Failed to trigger follow notification"
            );
        }

        Ok(edge)
    }

    async fn remove_follow_once(&self, follower_id: Uuid, followee_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;

        if !tx.user_exists(followee_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", followee_id)));
        }

        self.relations
            .remove_in(tx.as_mut(), EdgeKind::Follow, follower_id, followee_id)
            .await?;
        tx.commit().await?;

        info!(follower_id = %follower_id, followee_id = %followee_id, "User unfollowed");
        Ok(())
    }

    // ========== Queries ==========

    /// Whether the (kind, subject, object) edge is present
    pub async fn is_present(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> ServiceResult<bool> {
        self.relations.exists(kind, subject_id, object_id).await
    }

    /// Users who liked a post, in like order
    pub async fn post_likers(&self, post_id: Uuid, page: PageRequest) -> ServiceResult<Page<User>> {
        if self.store.get_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }
        let ids = self.relations.list_by_object(EdgeKind::Like, post_id).await?;
        self.hydrate_users(paginate(ids, page)).await
    }

    /// Posts a user favorited, in favorite order
    pub async fn favorites(&self, user_id: Uuid, page: PageRequest) -> ServiceResult<Page<Post>> {
        self.ensure_user(user_id).await?;
        let ids = self
            .relations
            .list_by_subject(EdgeKind::Favorite, user_id)
            .await?;
        let ids = paginate(ids, page);
        let posts = self.store.get_posts(&ids.items).await?;
        Ok(ids.with_items(posts))
    }

    pub async fn followers(&self, user_id: Uuid, page: PageRequest) -> ServiceResult<Page<User>> {
        self.ensure_user(user_id).await?;
        let ids = self.relations.list_by_object(EdgeKind::Follow, user_id).await?;
        self.hydrate_users(paginate(ids, page)).await
    }

    pub async fn following(&self, user_id: Uuid, page: PageRequest) -> ServiceResult<Page<User>> {
        self.ensure_user(user_id).await?;
        let ids = self
            .relations
            .list_by_subject(EdgeKind::Follow, user_id)
            .await?;
        self.hydrate_users(paginate(ids, page)).await
    }

    async fn ensure_user(&self, user_id: Uuid) -> ServiceResult<()> {
        if !self.store.user_exists(user_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn hydrate_users(&self, ids: Page<Uuid>) -> ServiceResult<Page<User>> {
        let users = self.store.get_users(&ids.items).await?;
        Ok(ids.with_items(users))
    }

    /// Run one toggle attempt (or several under the retry policy) and record its outcome
    async fn run<T, F, Fut>(&self, kind: EdgeKind, action: &str, op: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let result = match &self.retry {
            Some(config) => with_retry_if(config.clone(), op, ServiceError::is_retryable)
                .await
                .map_err(RetryError::into_inner),
            None => {
                let mut op = op;
                op().await
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::record_toggle(kind.as_str(), action, outcome);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Comment, NewPost, NewUser};
    use crate::error::{StoreError, StoreResult};
    use crate::repository::{MemoryStore, StoreTx};
    use crate::services::notifications::{LogNotifier, MockNotifier};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Store whose next `failures` units of work fail as unavailable
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        begins: AtomicU32,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(0),
                begins: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EngagementStore for FlakyStore {
        async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.begin().await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }

        async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
            self.inner.get_user(user_id).await
        }

        async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool> {
            self.inner.user_exists(user_id).await
        }

        async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
            self.inner.get_users(ids).await
        }

        async fn get_post(&self, post_id: Uuid) -> StoreResult<Option<Post>> {
            self.inner.get_post(post_id).await
        }

        async fn get_posts(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>> {
            self.inner.get_posts(ids).await
        }

        async fn list_posts(&self) -> StoreResult<Vec<Post>> {
            self.inner.list_posts().await
        }

        async fn list_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>> {
            self.inner.list_posts_by_author(author_id).await
        }

        async fn list_post_ids(&self) -> StoreResult<Vec<Uuid>> {
            self.inner.list_post_ids().await
        }

        async fn list_comments(&self, post_id: Uuid) -> StoreResult<Vec<Comment>> {
            self.inner.list_comments(post_id).await
        }

        async fn edge_exists(
            &self,
            kind: EdgeKind,
            subject_id: Uuid,
            object_id: Uuid,
        ) -> StoreResult<bool> {
            self.inner.edge_exists(kind, subject_id, object_id).await
        }

        async fn list_by_subject(
            &self,
            kind: EdgeKind,
            subject_id: Uuid,
        ) -> StoreResult<Vec<Uuid>> {
            self.inner.list_by_subject(kind, subject_id).await
        }

        async fn list_by_object(&self, kind: EdgeKind, object_id: Uuid) -> StoreResult<Vec<Uuid>> {
            self.inner.list_by_object(kind, object_id).await
        }

        async fn has_viewed(&self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<bool> {
            self.inner.has_viewed(viewer_id, post_id).await
        }

        async fn viewed_posts(
            &self,
            viewer_id: Uuid,
            post_ids: &[Uuid],
        ) -> StoreResult<HashSet<Uuid>> {
            self.inner.viewed_posts(viewer_id, post_ids).await
        }
    }

    async fn create_user(store: &Arc<dyn EngagementStore>, username: &str) -> User {
        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(NewUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                name: username.to_string(),
                avatar: None,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        user
    }

    async fn create_post(store: &Arc<dyn EngagementStore>, author_id: Uuid) -> Post {
        let mut tx = store.begin().await.unwrap();
        let post = tx
            .insert_post(
                author_id,
                NewPost {
                    title: "Pancakes".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        post
    }

    fn service_with(notifier: Arc<dyn Notifier>) -> (Arc<dyn EngagementStore>, EngagementService) {
        let store: Arc<dyn EngagementStore> = Arc::new(MemoryStore::new());
        let service = EngagementService::new(store.clone(), notifier);
        (store, service)
    }

    fn service() -> (Arc<dyn EngagementStore>, EngagementService) {
        service_with(Arc::new(LogNotifier))
    }

    #[tokio::test]
    async fn test_like_toggle_keeps_count_in_step() {
        let (store, service) = service();
        let author = create_user(&store, "author").await;
        let fan = create_user(&store, "fan").await;
        let post = create_post(&store, author.id).await;

        assert_eq!(service.add_like(fan.id, post.id).await.unwrap(), 1);
        assert!(service.is_present(EdgeKind::Like, fan.id, post.id).await.unwrap());

        let err = service.add_like(fan.id, post.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().like_count, 1);

        assert_eq!(service.remove_like(fan.id, post.id).await.unwrap(), 0);
        let err = service.remove_like(fan.id, post.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_like_missing_post() {
        let (store, service) = service();
        let fan = create_user(&store, "fan").await;

        let err = service.add_like(fan.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_favorite_toggle_does_not_touch_counters() {
        let (store, service) = service();
        let author = create_user(&store, "author").await;
        let post = create_post(&store, author.id).await;

        service.add_favorite(author.id, post.id).await.unwrap();
        let err = service.add_favorite(author.id, post.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));

        let stored = store.get_post(post.id).await.unwrap().unwrap();
        assert_eq!(stored.like_count, 0);

        service.remove_favorite(author.id, post.id).await.unwrap();
        assert!(!service
            .is_present(EdgeKind::Favorite, author.id, post.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_self_follow_is_rejected_before_store() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);
        let (store, service) = service_with(Arc::new(notifier));
        let user = create_user(&store, "loner").await;

        let err = service.add_follow(user.id, user.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::SelfAction(_)));
    }

    #[tokio::test]
    async fn test_follow_notifies_followee() {
        let (store, _) = service();
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;

        let mut notifier = MockNotifier::new();
        let (alice_id, bob_id) = (alice.id, bob.id);
        notifier
            .expect_notify()
            .withf(move |event| {
                event.target_user_id == bob_id
                    && event.actor_id == alice_id
                    && event.payload["follower_count"] == 1
                    && event.payload["actor_name"] == "alice"
            })
            .times(1)
            .returning(|_| Ok(()));
        let service = EngagementService::new(store.clone(), Arc::new(notifier));

        service.add_follow(alice.id, bob.id).await.unwrap();
        assert!(service.is_present(EdgeKind::Follow, alice.id, bob.id).await.unwrap());
        assert!(!service.is_present(EdgeKind::Follow, bob.id, alice.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_follower_count_includes_new_follower() {
        let (store, _) = service();
        let star = create_user(&store, "star").await;
        let mut fans = Vec::new();
        for i in 0..3 {
            fans.push(create_user(&store, &format!("fan{}", i)).await);
        }

        let mut notifier = MockNotifier::new();
        let mut seq = mockall::Sequence::new();
        for expected in 1..=3i64 {
            notifier
                .expect_notify()
                .withf(move |event| event.payload["follower_count"] == expected)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        let service = EngagementService::new(store.clone(), Arc::new(notifier));

        for fan in &fans {
            service.add_follow(fan.id, star.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_follow() {
        let (store, _) = service();
        let alice = create_user(&store, "alice").await;
        let bob = create_user(&store, "bob").await;

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .times(1)
            .returning(|_| Err(ServiceError::Internal("sink down".into())));
        let service = EngagementService::new(store.clone(), Arc::new(notifier));

        service.add_follow(alice.id, bob.id).await.unwrap();
        assert!(service.is_present(EdgeKind::Follow, alice.id, bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_follow_unknown_user() {
        let (store, service) = service();
        let alice = create_user(&store, "alice").await;

        let err = service.add_follow(alice.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = service.remove_follow(alice.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listings_follow_insertion_order() {
        let (store, service) = service();
        let star = create_user(&store, "star").await;
        let mut fans = Vec::new();
        for i in 0..12 {
            let fan = create_user(&store, &format!("fan{}", i)).await;
            service.add_follow(fan.id, star.id).await.unwrap();
            fans.push(fan);
        }

        let first = service.followers(star.id, PageRequest::first()).await.unwrap();
        assert!(first.has_next_page);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.items[0].id, fans[0].id);

        let second = service
            .followers(star.id, PageRequest::new(2).unwrap())
            .await
            .unwrap();
        assert!(!second.has_next_page);
        let ids: Vec<Uuid> = second.items.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![fans[10].id, fans[11].id]);

        let following = service.following(fans[0].id, PageRequest::first()).await.unwrap();
        assert_eq!(following.items.len(), 1);
        assert_eq!(following.items[0].id, star.id);
    }

    #[tokio::test]
    async fn test_likers_and_favorites_listings() {
        let (store, service) = service();
        let author = create_user(&store, "author").await;
        let fan = create_user(&store, "fan").await;
        let first = create_post(&store, author.id).await;
        let second = create_post(&store, author.id).await;

        service.add_like(fan.id, first.id).await.unwrap();
        service.add_like(author.id, first.id).await.unwrap();
        service.add_favorite(fan.id, second.id).await.unwrap();
        service.add_favorite(fan.id, first.id).await.unwrap();

        let likers = service.post_likers(first.id, PageRequest::first()).await.unwrap();
        let ids: Vec<Uuid> = likers.items.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![fan.id, author.id]);

        let favorites = service.favorites(fan.id, PageRequest::first()).await.unwrap();
        let ids: Vec<Uuid> = favorites.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(!favorites.has_next_page);

        let empty = service
            .favorites(fan.id, PageRequest::new(2).unwrap())
            .await
            .unwrap();
        assert!(empty.items.is_empty());
        assert!(!empty.has_next_page);
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_toggle_retries_transient_store_failures() {
        let flaky = Arc::new(FlakyStore::new());
        let store: Arc<dyn EngagementStore> = flaky.clone();
        let author = create_user(&store, "author").await;
        let post = create_post(&store, author.id).await;
        let service = EngagementService::new(store.clone(), Arc::new(LogNotifier))
            .with_retry(fast_retry());

        flaky.failures.store(2, Ordering::SeqCst);
        let before = flaky.begins.load(Ordering::SeqCst);
        assert_eq!(service.add_like(author.id, post.id).await.unwrap(), 1);
        assert_eq!(flaky.begins.load(Ordering::SeqCst) - before, 3);

        // Business outcomes are returned on the first attempt
        let before = flaky.begins.load(Ordering::SeqCst);
        let err = service.add_like(author.id, post.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(flaky.begins.load(Ordering::SeqCst) - before, 1);
    }

    #[tokio::test]
    async fn test_toggle_without_retry_surfaces_unavailable() {
        let flaky = Arc::new(FlakyStore::new());
        flaky.failures.store(1, Ordering::SeqCst);
        let store: Arc<dyn EngagementStore> = flaky.clone();
        let service = EngagementService::new(store, Arc::new(LogNotifier));

        let err = service
            .add_like(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(flaky.begins.load(Ordering::SeqCst), 1);
    }
}
