pub mod cache;
pub mod config;

pub use cache::{CacheEntry, CacheError, EventCache, LocalCache, TodoCache};
pub use config::Config;
