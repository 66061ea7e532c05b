//! Database repositories for each table.

pub mod cache;

pub use cache::CacheRepo;
