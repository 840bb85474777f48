//! Cache module - tiered caching with tag-based invalidation.
//!
//! ## Architecture
//!
//! Two tiers sit behind one manager:
//!
//! - `MemoryTier` - in-process, strict LRU, microsecond lookups
//! - `RemoteTier` - Redis, TTL-based, shared across instances
//!
//! Lookups go memory → remote → caller compute; remote hits are promoted
//! into memory. Every entry carries invalidation tags, indexed by
//! `TagIndex`, so writers elsewhere can purge exactly the entries that
//! depend on what they changed. `SingleFlightGuard` collapses concurrent
//! recomputation of the same cold key, and a Redis pub/sub channel fans tag
//! invalidations out to other instances.
//!
//! ## Graceful degradation
//!
//! If the remote tier fails repeatedly the manager drops to memory-only
//! operation and recovers on the next successful health probe. Remote
//! trouble is never visible to callers as an error - only as a miss.

mod config;
mod entry;
mod flight;
mod manager;
mod memory;
mod pubsub;
mod remote;
mod stats;
mod tags;

pub use config::{MemoryConfig, TtlProfile};
pub use manager::CacheManager;
pub use stats::{CacheStats, HealthReport, TierStats};
