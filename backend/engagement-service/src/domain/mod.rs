pub mod edge;
pub mod models;

pub use edge::{Edge, EdgeKind};
pub use models::{
    Comment, CounterKind, NewPost, NewUser, NotificationEvent, NotificationKind, Post,
    PostCounters, User,
};
