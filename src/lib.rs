// src/lib.rs

pub mod cache;
pub mod config;
pub mod email;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod routes;
pub mod state;
pub mod threading;
pub mod utils;

/// Embedded migrations, shared by the binary and the test suite.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

// Re-export specific items for convenience if needed
pub use routes::create_router;
