//! Local caching module for offline catalog access.
//!
//! `CacheManager` stores catalog data as JSON files that are considered
//! stale after 60 minutes. `Storefront` layers fetch-and-cache behaviour on
//! top of it.

pub mod manager;
pub mod storefront;

pub use manager::{CacheAges, CacheManager, CachedData};
pub use storefront::{RefreshSummary, Storefront};
