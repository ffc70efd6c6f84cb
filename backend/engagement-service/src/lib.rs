pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod pagination;
pub(crate) mod repository;
pub mod services;
pub mod state;
pub mod workers;
