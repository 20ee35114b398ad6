//! Football data ingestion: rate-limited fetch of competitions, standings
//! and team documents, normalization into six relational tables and an
//! idempotent load into SQLite.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod store;

pub use config::Config;
pub use pipeline::{run, run_with, RunReport};
