use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{NotificationEvent, NotificationKind, User};
use crate::error::{ServiceError, ServiceResult};

/// Sink for notification triggers raised by engagement toggles
///
/// `notify` must not block the caller. It is invoked after the triggering
/// unit of work has committed; a returned error is logged by the caller and
/// never rolls the toggle back.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotificationEvent) -> ServiceResult<()>;
}

/// Build the NEW_FOLLOWER trigger for `followee`
///
/// `follower_count` is read in the follow's unit of work after the edge is
/// written, so it includes the new follower.
pub fn new_follower_event(followee_id: Uuid, actor: &User, follower_count: i64) -> NotificationEvent {
    NotificationEvent {
        target_user_id: followee_id,
        kind: NotificationKind::NewFollower,
        actor_id: actor.id,
        payload: json!({
            "follower_count": follower_count,
            "actor_name": actor.name,
            "actor_avatar": actor.avatar,
        }),
    }
}

/// Notifier that only logs, used with the in-memory store
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: NotificationEvent) -> ServiceResult<()> {
        info!(
            target_user_id = %event.target_user_id,
            actor_id = %event.actor_id,
            kind = event.kind.as_str(),
            payload = %event.payload,
            "Notification triggered"
        );
        Ok(())
    }
}

/// Notifier that persists triggers to the notifications table
///
/// The insert runs on a spawned task so the toggle that raised the trigger
/// returns without waiting on it.
#[derive(Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Notifier for PgNotifier {
    fn notify(&self, event: NotificationEvent) -> ServiceResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ServiceError::Internal(format!("No runtime for notification: {}", e)))?;
        let pool = self.pool.clone();

        handle.spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO notifications (id, user_id, kind, actor_id, payload)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(event.target_user_id)
            .bind(event.kind.as_str())
            .bind(event.actor_id)
            .bind(&event.payload)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(
                    target_user_id = %event.target_user_id,
                    kind = event.kind.as_str(),
                    error = %e,
                    "Failed to persist notification"
                );
            }
        });

        Ok(())
    }
}
