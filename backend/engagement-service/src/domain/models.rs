use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub name: String,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// Post entity - recipe content with denormalized engagement counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub description: String,
    pub main_image: Option<String>,
    pub ingredients: serde_json::Value,
    pub steps: serde_json::Value,
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn counters(&self) -> PostCounters {
        PostCounters {
            post_id: self.id,
            like_count: self.like_count,
            comment_count: self.comment_count,
            view_count: self.view_count,
        }
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub main_image: Option<String>,
    pub ingredients: serde_json::Value,
    pub steps: serde_json::Value,
}

/// Comment entity - represents a comment on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Denormalized counters owned by a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostCounters {
    pub post_id: Uuid,
    pub like_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
}

impl PostCounters {
    pub fn get(&self, kind: CounterKind) -> i64 {
        match kind {
            CounterKind::Likes => self.like_count,
            CounterKind::Comments => self.comment_count,
            CounterKind::Views => self.view_count,
        }
    }

    pub fn set(&mut self, kind: CounterKind, value: i64) {
        match kind {
            CounterKind::Likes => self.like_count = value,
            CounterKind::Comments => self.comment_count = value,
            CounterKind::Views => self.view_count = value,
        }
    }
}

/// Which denormalized counter an event touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Likes,
    Comments,
    Views,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Likes => "likes",
            CounterKind::Comments => "comments",
            CounterKind::Views => "views",
        }
    }
}

/// Notification kinds emitted by the engagement core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewFollower,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewFollower => "NEW_FOLLOWER",
        }
    }
}

/// Trigger handed to the notification collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub target_user_id: Uuid,
    pub kind: NotificationKind,
    pub actor_id: Uuid,
    pub payload: serde_json::Value,
}
