pub mod contract;
pub mod database;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use contract::ThreadStore;
pub use database::Database;
pub use error::StoreError;
pub use sqlite::SqliteStore;
