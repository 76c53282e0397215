//! motorscout - car listing scraper.
//!
//! Turns paginated, rate-limited listing sites into a stream of
//! normalized records: proxy-rotated fetching with retry and block
//! detection, a pagination walk feeding a worker pool, declarative field
//! extraction, and pure normalization with run-scoped deduplication.

pub mod clean;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod scrape;
