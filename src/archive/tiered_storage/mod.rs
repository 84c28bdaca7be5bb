//! Store adapters for the hot, cold, and cache tiers.
//!
//! The archival core only ever sees the traits in [`traits`]; the
//! sibling modules are reference backends (in-memory hot store for
//! tests, file-backed hot/cold stores for the CLI, moka cache).

mod cache_store;
mod cold_store;
mod file_hot_store;
mod hot_store;
mod traits;

pub use cache_store::MokaRecordCache;
pub use cold_store::FileColdStore;
pub use file_hot_store::FileHotStore;
pub use hot_store::MemoryHotStore;
pub use traits::{ColdStore, HotStore, RecordCache, ScanPage};
