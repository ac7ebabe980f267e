//! Fetch-compute-cache pipeline.
//!
//! [`Coordinator`] deduplicates concurrent lookups per rsID, serves fresh
//! cache hits and falls back to stale reports when a refresh fails.
//! [`HistoryLedger`] journals every resolved request off the hot path.
//! [`VariantService`] ties validation, quotas, resolution and history together.

pub mod cache;
pub mod coordinator;
pub mod history;
pub mod quota;
pub mod service;

pub use cache::{CacheEntry, CacheStore, MemoryCacheStore};
pub use coordinator::Coordinator;
pub use history::{HistoryLedger, HistoryStore, JsonlHistoryStore, MemoryHistoryStore};
pub use quota::RequesterQuota;
pub use service::VariantService;
