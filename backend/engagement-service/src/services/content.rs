use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Comment, NewPost, NewUser, Post, User};
use crate::error::{ServiceError, ServiceResult};
use crate::pagination::{paginate, Page, PageRequest};
use crate::repository::EngagementStore;
use crate::services::counters::CounterMaintainer;

/// Column widths of the users table
const MAX_USERNAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 255;
const MAX_NAME_LEN: usize = 30;

/// Non-blank and at most `max` characters
fn require_text(field: &str, value: &str, max: usize) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidInput(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(ServiceError::InvalidInput(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

/// Users, posts, comments and views
///
/// Comment writes and views drive the post counters through the
/// [`CounterMaintainer`] in the same unit of work.
#[derive(Clone)]
pub struct ContentService {
    store: Arc<dyn EngagementStore>,
    counters: CounterMaintainer,
}

impl ContentService {
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self {
            counters: CounterMaintainer::new(store.clone()),
            store,
        }
    }

    pub async fn register_user(&self, user: NewUser) -> ServiceResult<User> {
        require_text("username", &user.username, MAX_USERNAME_LEN)?;
        require_text("email", &user.email, MAX_EMAIL_LEN)?;
        require_text("name", &user.name, MAX_NAME_LEN)?;

        let mut tx = self.store.begin().await?;
        let user = tx.insert_user(user).await?;
        tx.commit().await?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> ServiceResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))
    }

    pub async fn create_post(&self, author_id: Uuid, post: NewPost) -> ServiceResult<Post> {
        if post.title.trim().is_empty() {
            return Err(ServiceError::InvalidInput("title is required".to_string()));
        }

        let mut tx = self.store.begin().await?;
        if !tx.user_exists(author_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", author_id)));
        }
        let post = tx.insert_post(author_id, post).await?;
        tx.commit().await?;

        info!(post_id = %post.id, author_id = %author_id, "Post created");
        Ok(post)
    }

    /// Read a post without counting a view
    pub async fn get_post(&self, post_id: Uuid) -> ServiceResult<Post> {
        self.store
            .get_post(post_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))
    }

    /// Read a post as a viewer: bumps `view_count` on every call and, for an
    /// identified viewer, remembers that they have seen it
    pub async fn view_post(&self, post_id: Uuid, viewer_id: Option<Uuid>) -> ServiceResult<Post> {
        let mut tx = self.store.begin().await?;

        let mut post = tx
            .lock_post(post_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))?;

        if let Some(viewer_id) = viewer_id {
            if !tx.user_exists(viewer_id).await? {
                return Err(ServiceError::NotFound(format!("user {}", viewer_id)));
            }
            tx.record_view(viewer_id, post_id).await?;
        }
        post.view_count = self.counters.on_viewed(tx.as_mut(), post_id).await?;
        tx.commit().await?;

        Ok(post)
    }

    pub async fn posts_by_author(&self, author_id: Uuid) -> ServiceResult<Vec<Post>> {
        if !self.store.user_exists(author_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", author_id)));
        }
        Ok(self.store.list_posts_by_author(author_id).await?)
    }

    /// Delete a post with its comments, likes, favorites and view records
    pub async fn delete_post(&self, post_id: Uuid, requester_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;

        let post = tx
            .lock_post(post_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("post {}", post_id)))?;
        if post.author_id != requester_id {
            return Err(ServiceError::Forbidden(
                "only the author can delete a post".to_string(),
            ));
        }

        tx.delete_post(post_id).await?;
        tx.commit().await?;

        info!(post_id = %post_id, "Post deleted");
        Ok(())
    }

    // ========== Comments ==========

    pub async fn add_comment(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> ServiceResult<Comment> {
        if content.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "comment content cannot be empty".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        if tx.lock_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }
        if !tx.user_exists(user_id).await? {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }

        let comment = tx.insert_comment(post_id, user_id, content).await?;
        let comment_count = self.counters.on_comment_added(tx.as_mut(), post_id).await?;
        tx.commit().await?;

        info!(
            comment_id = %comment.id,
            post_id = %post_id,
            comment_count,
            "Comment added"
        );
        Ok(comment)
    }

    pub async fn delete_comment(&self, comment_id: Uuid, requester_id: Uuid) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;

        let comment = tx
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("comment {}", comment_id)))?;
        if comment.user_id != requester_id {
            return Err(ServiceError::Forbidden(
                "only the commenter can delete a comment".to_string(),
            ));
        }

        // Post lock first, then the delete; a concurrent delete of the same
        // comment finds it gone and fails with NotFound
        tx.lock_post(comment.post_id).await?;
        tx.delete_comment(comment_id).await?;
        let comment_count = self
            .counters
            .on_comment_removed(tx.as_mut(), comment.post_id)
            .await?;
        tx.commit().await?;

        info!(
            comment_id = %comment_id,
            post_id = %comment.post_id,
            comment_count,
            "Comment deleted"
        );
        Ok(())
    }

    /// Comments of a post in creation order
    pub async fn list_comments(
        &self,
        post_id: Uuid,
        page: PageRequest,
    ) -> ServiceResult<Page<Comment>> {
        if self.store.get_post(post_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("post {}", post_id)));
        }
        let comments = self.store.list_comments(post_id).await?;
        Ok(paginate(comments, page))
    }
}
