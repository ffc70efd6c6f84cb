use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of engagement edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// User -> Post
    Like,
    /// User -> Post
    Favorite,
    /// User -> User
    Follow,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Like => "like",
            EdgeKind::Favorite => "favorite",
            EdgeKind::Follow => "follow",
        }
    }

    /// Whether the object of this edge is a user (otherwise a post)
    pub fn targets_user(&self) -> bool {
        matches!(self, EdgeKind::Follow)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed engagement edge (subject -> object)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub kind: EdgeKind,
    pub subject_id: Uuid,
    pub object_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(kind: EdgeKind, subject_id: Uuid, object_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            subject_id,
            object_id,
            created_at: Utc::now(),
        }
    }

    pub fn matches(&self, kind: EdgeKind, subject_id: Uuid, object_id: Uuid) -> bool {
        self.kind == kind && self.subject_id == subject_id && self.object_id == object_id
    }
}
