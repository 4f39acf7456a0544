pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod query_runner;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{NurtureSeedDataset, SeedResult, VerificationResult};
pub use query_runner::{QueryError, SqlDataStore};
