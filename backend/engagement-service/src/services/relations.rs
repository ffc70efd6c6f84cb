use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Edge, EdgeKind};
use crate::error::{ServiceResult, StoreError, StoreResult};
use crate::repository::{EngagementStore, StoreTx};

/// Directed engagement edges (like, favorite, follow).
///
/// Owns the uniqueness invariant: at most one edge per (kind, subject, object),
/// and no follow edge from a user to itself. Writes come in two forms: a
/// standalone form that runs in its own unit of work, and an `_in` form that
/// joins the caller's unit of work so dependent counter updates commit with it.
#[derive(Clone)]
pub struct RelationStore {
    store: Arc<dyn EngagementStore>,
}

impl RelationStore {
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self { store }
    }

    pub async fn exists(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> ServiceResult<bool> {
        Ok(self.store.edge_exists(kind, subject_id, object_id).await?)
    }

    /// Create an edge in its own unit of work
    pub async fn create(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> ServiceResult<Edge> {
        let mut tx = self.store.begin().await?;
        let edge = self
            .create_in(tx.as_mut(), kind, subject_id, object_id)
            .await?;
        tx.commit().await?;
        Ok(edge)
    }

    /// Remove an edge in its own unit of work
    pub async fn remove(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        self.remove_in(tx.as_mut(), kind, subject_id, object_id)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn create_in(
        &self,
        tx: &mut dyn StoreTx,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<Edge> {
        if kind.targets_user() && subject_id == object_id {
            return Err(StoreError::SelfReference(kind, subject_id));
        }

        let edge = tx.insert_edge(kind, subject_id, object_id).await?;
        debug!(
            kind = %kind,
            subject_id = %subject_id,
            object_id = %object_id,
            edge_id = %edge.id,
            "Created engagement edge"
        );
        Ok(edge)
    }

    pub(crate) async fn remove_in(
        &self,
        tx: &mut dyn StoreTx,
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    ) -> StoreResult<()> {
        tx.delete_edge(kind, subject_id, object_id).await?;
        debug!(
            kind = %kind,
            subject_id = %subject_id,
            object_id = %object_id,
            "Removed engagement edge"
        );
        Ok(())
    }

    /// Object ids reachable from `subject_id`, insertion order
    pub async fn list_by_subject(
        &self,
        kind: EdgeKind,
        subject_id: Uuid,
    ) -> ServiceResult<Vec<Uuid>> {
        Ok(self.store.list_by_subject(kind, subject_id).await?)
    }

    /// Subject ids pointing at `object_id`, insertion order
    pub async fn list_by_object(
        &self,
        kind: EdgeKind,
        object_id: Uuid,
    ) -> ServiceResult<Vec<Uuid>> {
        Ok(self.store.list_by_object(kind, object_id).await?)
    }
}
