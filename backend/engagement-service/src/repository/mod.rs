pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgEngagementStore;
pub use store::{EngagementStore, StoreTx};
