use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resilience::{with_timeout_result, TimeoutError};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::store::{EngagementStore, StoreTx};
use crate::domain::{Comment, Edge, EdgeKind, NewPost, NewUser, Post, PostCounters, User};
use crate::error::{StoreError, StoreResult};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_check_violation())
}

/// Reorder rows fetched with `= ANY($1)` to follow the requested id order
fn order_by_ids<T, F>(ids: &[Uuid], rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> Uuid,
{
    let mut by_id: HashMap<Uuid, T> = rows.into_iter().map(|r| (key(&r), r)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// PostgreSQL store (source of truth)
#[derive(Clone)]
pub struct PgEngagementStore {
    pool: PgPool,
    begin_timeout: Duration,
}

impl PgEngagementStore {
    pub fn new(pool: PgPool, begin_timeout: Duration) -> Self {
        Self {
            pool,
            begin_timeout,
        }
    }
}

#[async_trait]
impl EngagementStore for PgEngagementStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = with_timeout_result(self.begin_timeout, self.pool.begin())
            .await
            .map_err(|err| match err {
                TimeoutError::Elapsed(after) => {
                    StoreError::Unavailable(format!("opening transaction timed out after {:?}", after))
                }
                TimeoutError::OperationFailed(e) => StoreError::from_sqlx(e),
            })?;

        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, is_active, name, avatar, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn user_exists(&self, user_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn get_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, is_active, name, avatar, created_at
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(order_by_ids(ids, rows, |u| u.id))
    }

    async fn get_post(&self, post_id: Uuid) -> StoreResult<Option<Post>> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, title, description, main_image, ingredients, steps,
                   like_count, comment_count, view_count, created_at, updated_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn get_posts(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, title, description, main_image, ingredients, steps,
                   like_count, comment_count, view_count, created_at, updated_at
            FROM posts
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(order_by_ids(ids, rows, |p| p.id))
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, title, description, main_image, ingredients, steps,
                   like_count, comment_count, view_count, created_at, updated_at
            FROM posts
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn list_posts_by_author(&self, author_id: Uuid) -> StoreResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, title, description, main_image, ingredients, steps,
                   like_count, comment_count, view_count, created_at, updated_at
            FROM posts
            WHERE author_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn list_post_ids(&self) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar("SELECT id FROM posts ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn list_comments(&self, post_id: Uuid) -> StoreResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(
            r#"
            SELECT id, post_id, user_id, content, created_at
            FROM comments
            WHERE post_id = $1
            ORDER BY seq
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn edge_exists(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM engagement_edges
                WHERE kind = $1 AND subject_id = $2 AND object_id = $3
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(subject_id)
        .bind(object_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn list_by_subject(&self, kind: EdgeKind, subject_id: Uuid) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
            SELECT object_id FROM engagement_edges
            WHERE kind = $1 AND subject_id = $2
            ORDER BY seq
            "#,
        )
        .bind(kind.as_str())
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn list_by_object(&self, kind: EdgeKind, object_id: Uuid) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
            SELECT subject_id FROM engagement_edges
            WHERE kind = $1 AND object_id = $2
            ORDER BY seq
            "#,
        )
        .bind(kind.as_str())
        .bind(object_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn has_viewed(&self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM post_views WHERE viewer_id = $1 AND post_id = $2)",
        )
        .bind(viewer_id)
        .bind(post_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn viewed_posts(
        &self,
        viewer_id: Uuid,
        post_ids: &[Uuid],
    ) -> StoreResult<HashSet<Uuid>> {
        if post_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<Uuid> = sqlx::query_scalar(
            "SELECT post_id FROM post_views WHERE viewer_id = $1 AND post_id = ANY($2)",
        )
        .bind(viewer_id)
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(rows.into_iter().collect())
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        let username = user.username.clone();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, is_active, name, avatar, created_at)
            VALUES ($1, $2, $3, TRUE, $4, $5, NOW())
            RETURNING id, username, email, is_active, name, avatar, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.username)
        .bind(user.email)
        .bind(user.name)
        .bind(user.avatar)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("username or email already registered: {}", username))
            } else {
                StoreError::from_sqlx(e)
            }
        })
    }

    async fn user_exists(&mut self, user_id: Uuid) -> StoreResult<bool> {
        let row: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR KEY SHARE")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(row.is_some())
    }

    async fn get_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, is_active, name, avatar, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn insert_post(&mut self, author_id: Uuid, post: NewPost) -> StoreResult<Post> {
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, author_id, title, description, main_image, ingredients, steps,
                               like_count, comment_count, view_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, 0, NOW(), NOW())
            RETURNING id, author_id, title, description, main_image, ingredients, steps,
                      like_count, comment_count, view_count, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(author_id)
        .bind(post.title)
        .bind(post.description)
        .bind(post.main_image)
        .bind(post.ingredients)
        .bind(post.steps)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn lock_post(&mut self, post_id: Uuid) -> StoreResult<Option<Post>> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, title, description, main_image, ingredients, steps,
                   like_count, comment_count, view_count, created_at, updated_at
            FROM posts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn delete_post(&mut self, post_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;

        sqlx::query(
            "DELETE FROM engagement_edges WHERE kind IN ('like', 'favorite') AND object_id = $1",
        )
        .bind(post_id)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        sqlx::query("DELETE FROM post_views WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;

        let affected = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("post {}", post_id)));
        }

        debug!(post_id = %post_id, "Deleted post with dependent rows");
        Ok(())
    }

    async fn write_counters(&mut self, counters: &PostCounters) -> StoreResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE posts
            SET like_count = $2, comment_count = $3, view_count = $4
            WHERE id = $1
            "#,
        )
        .bind(counters.post_id)
        .bind(counters.like_count)
        .bind(counters.comment_count)
        .bind(counters.view_count)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("post {}", counters.post_id)));
        }
        Ok(())
    }

    async fn insert_edge(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<Edge> {
        let inserted = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            INSERT INTO engagement_edges (id, kind, subject_id, object_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (kind, subject_id, object_id) DO NOTHING
            RETURNING id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind.as_str())
        .bind(subject_id)
        .bind(object_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                StoreError::SelfReference(kind, subject_id)
            } else {
                StoreError::from_sqlx(e)
            }
        })?;

        match inserted {
            Some((id, created_at)) => Ok(Edge {
                id,
                kind,
                subject_id,
                object_id,
                created_at,
            }),
            None => Err(StoreError::DuplicateEdge {
                kind,
                subject_id,
                object_id,
            }),
        }
    }

    async fn delete_edge(
        &mut self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<()> {
        let affected = sqlx::query(
            r#"
            DELETE FROM engagement_edges
            WHERE kind = $1 AND subject_id = $2 AND object_id = $3
            "#,
        )
        .bind(kind.as_str())
        .bind(subject_id)
        .bind(object_id)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .rows_affected();

        if affected == 0 {
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
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM engagement_edges
                WHERE kind = $1 AND subject_id = $2 AND object_id = $3
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(subject_id)
        .bind(object_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn count_by_object(&mut self, kind: EdgeKind, object_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM engagement_edges WHERE kind = $1 AND object_id = $2")
            .bind(kind.as_str())
            .bind(object_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn insert_comment(
        &mut self,
        post_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> StoreResult<Comment> {
        sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (id, post_id, user_id, content, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, post_id, user_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn get_comment(&mut self, comment_id: Uuid) -> StoreResult<Option<Comment>> {
        sqlx::query_as::<_, Comment>(
            "SELECT id, post_id, user_id, content, created_at FROM comments WHERE id = $1",
        )
        .bind(comment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn delete_comment(&mut self, comment_id: Uuid) -> StoreResult<()> {
        let affected = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?
            .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("comment {}", comment_id)));
        }
        Ok(())
    }

    async fn count_comments(&mut self, post_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn record_view(&mut self, viewer_id: Uuid, post_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO post_views (viewer_id, post_id, first_viewed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (viewer_id, post_id) DO NOTHING
            "#,
        )
        .bind(viewer_id)
        .bind(post_id)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(StoreError::from_sqlx)
    }
}
