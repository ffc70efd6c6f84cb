use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::{Comment, Edge, EdgeKind, NewPost, NewUser, Post, PostCounters, User};
use crate::error::StoreResult;

/// Read surface of the relational store plus the entry point for units of work.
///
/// Reads here are plain (lock-free) reads and may observe a slightly stale
/// snapshot. Every mutation goes through a [`StoreTx`] obtained from
/// [`EngagementStore::begin`], so an edge change and the counter update it
/// triggers commit or roll back together.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Open a unit of work. Dropping the returned handle without calling
    /// [`StoreTx::commit`] discards every change made through it.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Connectivity probe used by readiness checks
    async fn ping(&self) -> StoreResult<()>;

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool>;

    /// Fetch users preserving the order of `ids`; unknown ids are skipped
    async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;

    async fn get_post(&self, post_id: Uuid) -> StoreResult<Option<Post>>;

    /// Fetch posts preserving the order of `ids`; unknown ids are skipped
    async fn get_posts(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>>;

    /// Every post (feed candidate set)
    async fn list_posts(&self) -> StoreResult<Vec<Post>>;

    async fn list_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>>;

    async fn list_post_ids(&self) -> StoreResult<Vec<Uuid>>;

    /// Comments of a post in creation order
    async fn list_comments(&self, post_id: Uuid) -> StoreResult<Vec<Comment>>;

    async fn edge_exists(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<bool>;

    /// Object ids of `kind` edges from `subject_id`, insertion order
    async fn list_by_subject(&self, kind: EdgeKind, subject_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Subject ids of `kind` edges into `object_id`, insertion order
    async fn list_by_object(&self, kind: EdgeKind, object_id: Uuid) -> StoreResult<Vec<Uuid>>;

    async fn has_viewed(&self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<bool>;

    /// The subset of `post_ids` that `viewer_id` has viewed
    async fn viewed_posts(
        &self,
        viewer_id: Uuid,
        post_ids: &[Uuid],
    ) -> StoreResult<HashSet<Uuid>>;
}

/// A single unit of work against the store.
///
/// Implementations serialize conflicting units of work: the PostgreSQL
/// backend through row locks and unique constraints, the in-memory backend
/// through an exclusive lock held for the lifetime of the handle.
#[async_trait]
pub trait StoreTx: Send {
    /// Fails with `Conflict` when the username or email is taken
    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User>;

    /// Existence check that also keeps the user row from being deleted
    /// until this unit of work ends
    async fn user_exists(&mut self, user_id: Uuid) -> StoreResult<bool>;

    async fn get_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn insert_post(&mut self, author_id: Uuid, post: NewPost) -> StoreResult<Post>;

    /// Lock the post row for update and return it, `None` if it does not exist
    async fn lock_post(&mut self, post_id: Uuid) -> StoreResult<Option<Post>>;

    /// Delete a post with its comments, incoming like/favorite edges and view records
    async fn delete_post(&mut self, post_id: Uuid) -> StoreResult<()>;

    async fn write_counters(&mut self, counters: &PostCounters) -> StoreResult<()>;

    /// Fails with `DuplicateEdge` or `SelfReference`
    async fn insert_edge(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<Edge>;

    /// Fails with `EdgeNotFound`
    async fn delete_edge(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<()>;

    async fn edge_exists(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<bool>;

    async fn count_by_object(&mut self, kind: EdgeKind, object_id: Uuid) -> StoreResult<i64>;

    async fn insert_comment(
        &mut self,
        post_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> StoreResult<Comment>;

    async fn get_comment(&mut self, comment_id: Uuid) -> StoreResult<Option<Comment>>;

    async fn delete_comment(&mut self, comment_id: Uuid) -> StoreResult<()>;

    async fn count_comments(&mut self, post_id: Uuid) -> StoreResult<i64>;

    /// Remember that `viewer_id` has seen `post_id` (set semantics)
    async fn record_view(&mut self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
