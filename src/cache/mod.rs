//! Cache replica of the card directory
//!
//! Advisory only. Ingestion reads through it; the transfer worker never
//! trusts it for a debit decision.

pub mod replica;
pub mod sweeper;

pub use replica::{
    CacheConfig, CacheStats, CardCache, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_TTL, ReplicationReport,
    entry_size,
};
pub use sweeper::spawn_expiry_sweeper;
