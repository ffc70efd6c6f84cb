pub mod content;
pub mod counters;
pub mod engagement;
pub mod feed;
pub mod notifications;
pub mod relations;

pub use content::ContentService;
pub use counters::{CounterMaintainer, ReconcileReport};
pub use engagement::EngagementService;
pub use feed::{FeedRankingEngine, RankedPost, StoreViewHistory, ViewHistory};
pub use notifications::{LogNotifier, Notifier, PgNotifier};
pub use relations::RelationStore;
