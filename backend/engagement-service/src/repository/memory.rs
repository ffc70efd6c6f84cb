use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use super::store::{EngagementStore, StoreTx};
use crate::domain::{Comment, Edge, EdgeKind, NewPost, NewUser, Post, PostCounters, User};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: Vec<User>,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    edges: Vec<Edge>,
    views: HashSet<(Uuid, Uuid)>,
}

impl MemoryState {
    fn user(&self, user_id: Uuid) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    fn post(&self, post_id: Uuid) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == post_id)
    }

    fn edge_exists(&self, kind: EdgeKind, subject_id: Uuid, object_id: Uuid) -> bool {
        self.edges
            .iter()
            .any(|e| e.matches(kind, subject_id, object_id))
    }
}

/// In-process store for local development and tests.
///
/// Each unit of work holds the write lock for its whole lifetime and works on
/// a staged copy of the state, which replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngagementStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().write_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.user(user_id).cloned())
    }

    async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self.state.read().await.user(user_id).is_some())
    }

    async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.user(*id).cloned()).collect())
    }

    async fn get_post(&self, post_id: Uuid) -> StoreResult<Option<Post>> {
        Ok(self.state.read().await.post(post_id).cloned())
    }

    async fn get_posts(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.post(*id).cloned()).collect())
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        Ok(self.state.read().await.posts.clone())
    }

    async fn list_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>> {
        let state = self.state.read().await;
        Ok(state
            .posts
            .iter()
            .filter(|p| p.author_id == author_id)
            .cloned()
            .collect())
    }

    async fn list_post_ids(&self) -> StoreResult<Vec<Uuid>> {
        Ok(self.state.read().await.posts.iter().map(|p| p.id).collect())
    }

    async fn list_comments(&self, post_id: Uuid) -> StoreResult<Vec<Comment>> {
        let state = self.state.read().await;
        Ok(state
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn edge_exists(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .edge_exists(kind, subject_id, object_id))
    }

    async fn list_by_subject(&self, kind: EdgeKind, subject_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.kind == kind && e.subject_id == subject_id)
            .map(|e| e.object_id)
            .collect())
    }

    async fn list_by_object(&self, kind: EdgeKind, object_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.kind == kind && e.object_id == object_id)
            .map(|e| e.subject_id)
            .collect())
    }

    async fn has_viewed(&self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<bool> {
        Ok(self.state.read().await.views.contains(&(viewer_id, post_id)))
    }

    async fn viewed_posts(
        &self,
        viewer_id: Uuid,
        post_ids: &[Uuid],
    ) -> StoreResult<HashSet<Uuid>> {
        let state = self.state.read().await;
        Ok(post_ids
            .iter()
            .copied()
            .filter(|post_id| state.views.contains(&(viewer_id, *post_id)))
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        if self
            .staged
            .users
            .iter()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Conflict(format!(
                "username or email already registered: {}",
                user.username
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            is_active: true,
            name: user.name,
            avatar: user.avatar,
            created_at: Utc::now(),
        };
        self.staged.users.push(user.clone());
        Ok(user)
    }

    async fn user_exists(&mut self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self.staged.user(user_id).is_some())
    }

    async fn get_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.staged.user(user_id).cloned())
    }

    async fn insert_post(&mut self, author_id: Uuid, post: NewPost) -> StoreResult<Post> {
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            author_id,
            title: post.title,
            description: post.description,
            main_image: post.main_image,
            ingredients: post.ingredients,
            steps: post.steps,
            like_count: 0,
            comment_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.staged.posts.push(post.clone());
        Ok(post)
    }

    async fn lock_post(&mut self, post_id: Uuid) -> StoreResult<Option<Post>> {
        Ok(self.staged.post(post_id).cloned())
    }

    async fn delete_post(&mut self, post_id: Uuid) -> StoreResult<()> {
        let before = self.staged.posts.len();
        self.staged.posts.retain(|p| p.id != post_id);
        if self.staged.posts.len() == before {
            return Err(StoreError::NotFound(format!("post {}", post_id)));
        }

        self.staged.comments.retain(|c| c.post_id != post_id);
        self.staged
            .edges
            .retain(|e| e.kind.targets_user() || e.object_id != post_id);
        self.staged.views.retain(|(_, viewed)| *viewed != post_id);
        Ok(())
    }

    async fn write_counters(&mut self, counters: &PostCounters) -> StoreResult<()> {
        let post = self
            .staged
            .posts
            .iter_mut()
            .find(|p| p.id == counters.post_id)
            .ok_or_else(|| StoreError::NotFound(format!("post {}", counters.post_id)))?;

        post.like_count = counters.like_count;
        post.comment_count = counters.comment_count;
        post.view_count = counters.view_count;
        Ok(())
    }

    async fn insert_edge(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<Edge> {
        if kind.targets_user() && subject_id == object_id {
            return Err(StoreError::SelfReference(kind, subject_id));
        }
        if self.staged.edge_exists(kind, subject_id, object_id) {
            return Err(StoreError::DuplicateEdge {
                kind,
                subject_id,
                object_id,
            });
        }

        let edge = Edge::new(kind, subject_id, object_id);
        self.staged.edges.push(edge.clone());
        Ok(edge)
    }

    async fn delete_edge(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<()> {
        let before = self.staged.edges.len();
        self.staged
            .edges
            .retain(|e| !e.matches(kind, subject_id, object_id));
        if self.staged.edges.len() == before {
            return Err(StoreError::EdgeNotFound {
                kind,
                subject_id,
                object_id,
            });
        }
        Ok(())
    }

    async fn edge_exists(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<bool> {
        Ok(self.staged.edge_exists(kind, subject_id, object_id))
    }

    async fn count_by_object(&mut self, kind: EdgeKind, object_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .staged
            .edges
            .iter()
            .filter(|e| e.kind == kind && e.object_id == object_id)
            .count() as i64)
    }

    async fn insert_comment(
        &mut self,
        post_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> StoreResult<Comment> {
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id,
            user_id,
            content,
            created_at: Utc::now(),
        };
        self.staged.comments.push(comment.clone());
        Ok(comment)
    }

    async fn get_comment(&mut self, comment_id: Uuid) -> StoreResult<Option<Comment>> {
        Ok(self
            .staged
            .comments
            .iter()
            .find(|c| c.id == comment_id)
            .cloned())
    }

    async fn delete_comment(&mut self, comment_id: Uuid) -> StoreResult<()> {
        let before = self.staged.comments.len();
        self.staged.comments.retain(|c| c.id != comment_id);
        if self.staged.comments.len() == before {
            return Err(StoreError::NotFound(format!("comment {}", comment_id)));
        }
        Ok(())
    }

    async fn count_comments(&mut self, post_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .staged
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .count() as i64)
    }

    async fn record_view(&mut self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<()> {
        self.staged.views.insert((viewer_id, post_id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_user(store: &MemoryStore, username: &str) -> User {
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

    #[tokio::test]
    async fn test_duplicate_edge_rejected() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        tx.insert_edge(EdgeKind::Follow, a, b).await.unwrap();
        let err = tx.insert_edge(EdgeKind::Follow, a, b).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEdge { .. }));

        // Same pair under another kind is a different tuple
        tx.insert_edge(EdgeKind::Like, a, b).await.unwrap();
    }

    #[tokio::test]
    async fn test_self_follow_rejected_but_not_other_kinds() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_edge(EdgeKind::Follow, a, a).await.unwrap_err();
        assert!(matches!(err, StoreError::SelfReference(EdgeKind::Follow, _)));
        assert!(tx.insert_edge(EdgeKind::Favorite, a, a).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_edge() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .delete_edge(EdgeKind::Like, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EdgeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_listing_keeps_insertion_order() {
        let store = MemoryStore::new();
        let target = Uuid::new_v4();
        let followers: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        let mut tx = store.begin().await.unwrap();
        for follower in &followers {
            tx.insert_edge(EdgeKind::Follow, *follower, target)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let listed = store
            .list_by_object(EdgeKind::Follow, target)
            .await
            .unwrap();
        assert_eq!(listed, followers);
        assert_eq!(
            store
                .list_by_subject(EdgeKind::Follow, followers[2])
                .await
                .unwrap(),
            vec![target]
        );
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_discards_changes() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_edge(EdgeKind::Favorite, a, b).await.unwrap();
        }

        assert!(!store.edge_exists(EdgeKind::Favorite, a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_unique_username() {
        let store = MemoryStore::new();
        seed_user(&store, "chef").await;

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_user(NewUser {
                username: "chef".to_string(),
                email: "other@example.com".to_string(),
                name: "Other".to_string(),
                avatar: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_post_cascades() {
        let store = MemoryStore::new();
        let author = seed_user(&store, "author").await;
        let fan = seed_user(&store, "fan").await;

        let mut tx = store.begin().await.unwrap();
        let post = tx.insert_post(author.id, NewPost::default()).await.unwrap();
        tx.insert_edge(EdgeKind::Like, fan.id, post.id).await.unwrap();
        tx.insert_edge(EdgeKind::Favorite, fan.id, post.id)
            .await
            .unwrap();
        tx.insert_edge(EdgeKind::Follow, fan.id, author.id)
            .await
            .unwrap();
        tx.insert_comment(post.id, fan.id, "yum".to_string())
            .await
            .unwrap();
        tx.record_view(fan.id, post.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_post(post.id).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.get_post(post.id).await.unwrap().is_none());
        assert!(store.list_comments(post.id).await.unwrap().is_empty());
        assert!(!store.edge_exists(EdgeKind::Like, fan.id, post.id).await.unwrap());
        assert!(!store
            .edge_exists(EdgeKind::Favorite, fan.id, post.id)
            .await
            .unwrap());
        assert!(!store.has_viewed(fan.id, post.id).await.unwrap());
        // Follow edges are untouched
        assert!(store
            .edge_exists(EdgeKind::Follow, fan.id, author.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_viewed_posts_returns_only_seen_subset() {
        let store = MemoryStore::new();
        let author = seed_user(&store, "author").await;
        let reader = seed_user(&store, "reader").await;

        let mut tx = store.begin().await.unwrap();
        let seen = tx.insert_post(author.id, NewPost::default()).await.unwrap();
        let unseen = tx.insert_post(author.id, NewPost::default()).await.unwrap();
        tx.record_view(reader.id, seen.id).await.unwrap();
        tx.commit().await.unwrap();

        let viewed = store
            .viewed_posts(reader.id, &[seen.id, unseen.id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(viewed, HashSet::from([seen.id]));
        assert!(store
            .viewed_posts(author.id, &[seen.id, unseen.id])
            .await
            .unwrap()
            .is_empty());
    }
}
