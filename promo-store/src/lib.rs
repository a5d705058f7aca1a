pub mod app_config;
pub mod database;
pub mod memory;
pub mod offer_repo;
pub mod redis_repo;

pub use database::DbClient;
pub use memory::{InMemoryOfferStore, InMemoryTransitionQueue};
pub use offer_repo::PostgresOfferStore;
pub use redis_repo::{RedisClient, RedisTransitionQueue};
