// SQLite storage layer with sqlx

pub mod models;
pub mod repositories;
pub mod schema;

pub use models::*;
pub use repositories::*;
