//! Memory-bounded card replica
//!
//! Entries carry a per-entry deadline (default TTL 48h) and count toward one
//! global byte budget. When an insert pushes usage past the budget, entries
//! are evicted in insertion order, oldest first. A refresh counts as a new
//! insertion. All state sits behind one short-held mutex so insert, refresh,
//! eviction and lookup are atomic with respect to each other.
//!
//! Every invalidation bumps a per-card epoch. A cache-aside reader takes the
//! epoch before its directory read and writes back with
//! [`CardCache::populate_if_epoch`], which drops the write if the card was
//! invalidated in between.
//!
//! Time comes from `tokio::time::Instant`, so tests can pause the clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::directory::Card;

/// 48 hours
pub const DEFAULT_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// 8 GiB
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 8 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_memory_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Result of a bulk replication pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationReport {
    pub cached: usize,
    /// Cards left out because the budget was reached
    pub skipped: usize,
}

struct CacheEntry {
    card: Card,
    expires_at: Instant,
    seq: u64,
    size: usize,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion sequence -> card number
    order: BTreeMap<u64, String>,
    used_bytes: usize,
    next_seq: u64,
    /// Card number -> invalidation count
    epochs: HashMap<String, u64>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl Inner {
    fn remove(&mut self, card_number: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(card_number)?;
        self.order.remove(&entry.seq);
        self.used_bytes -= entry.size;
        Some(entry)
    }

    fn evict_oldest(&mut self) -> bool {
        let Some((_, card_number)) = self.order.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&card_number) {
            self.used_bytes -= entry.size;
            self.evictions += 1;
            debug!(card_number = %card_number, size = entry.size, "Evicted cache entry");
        }
        true
    }

    fn insert(&mut self, card: Card, size: usize, expires_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, card.card_number.clone());
        self.used_bytes += size;
        self.entries.insert(
            card.card_number.clone(),
            CacheEntry {
                card,
                expires_at,
                seq,
                size,
            },
        );
    }
}

/// Bytes an entry counts against the budget: key plus serialized card
pub fn entry_size(card: &Card) -> usize {
    let value_len = serde_json::to_vec(card).map(|v| v.len()).unwrap_or(0);
    card.card_number.len() + value_len
}

pub struct CardCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl CardCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    // The guarded state is always left consistent, so a poisoned lock is
    // safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached snapshot if present and unexpired
    pub fn lookup(&self, card_number: &str) -> Option<Card> {
        let mut inner = self.lock();
        let now = Instant::now();

        let expired = match inner.entries.get(card_number) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.expires_at <= now,
        };

        if expired {
            inner.remove(card_number);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.entries.get(card_number).map(|e| e.card.clone())
    }

    /// Insert or refresh with the configured TTL. Returns false if the card
    /// alone is larger than the budget and was not cached.
    pub fn populate(&self, card: &Card) -> bool {
        self.populate_with_ttl(card, self.config.ttl)
    }

    pub fn populate_with_ttl(&self, card: &Card, ttl: Duration) -> bool {
        let mut inner = self.lock();
        self.insert_locked(&mut inner, card, ttl)
    }

    /// Invalidation epoch of a card; pass it to [`Self::populate_if_epoch`]
    pub fn epoch(&self, card_number: &str) -> u64 {
        self.lock().epochs.get(card_number).copied().unwrap_or(0)
    }

    /// Populate only if the card has not been invalidated since `epoch` was
    /// read. Returns false if the write was dropped or the card is oversized.
    pub fn populate_if_epoch(&self, card: &Card, epoch: u64) -> bool {
        let mut inner = self.lock();
        let current = inner.epochs.get(&card.card_number).copied().unwrap_or(0);
        if current != epoch {
            debug!(
                card_number = %card.card_number,
                read_epoch = epoch,
                current_epoch = current,
                "Stale write-back dropped"
            );
            return false;
        }
        self.insert_locked(&mut inner, card, self.config.ttl)
    }

    fn insert_locked(&self, inner: &mut Inner, card: &Card, ttl: Duration) -> bool {
        let size = entry_size(card);
        inner.remove(&card.card_number);

        if size > self.config.max_memory_bytes {
            warn!(
                card_number = %card.card_number,
                size,
                budget = self.config.max_memory_bytes,
                "Card larger than cache budget, not cached"
            );
            return false;
        }

        while inner.used_bytes + size > self.config.max_memory_bytes {
            if !inner.evict_oldest() {
                break;
            }
        }
        inner.insert(card.clone(), size, Instant::now() + ttl);
        true
    }

    /// Returns true if an entry was removed. Always bumps the card's epoch.
    pub fn invalidate(&self, card_number: &str) -> bool {
        let mut inner = self.lock();
        *inner.epochs.entry(card_number.to_string()).or_insert(0) += 1;
        inner.remove(card_number).is_some()
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for card_number in &expired {
            inner.remove(card_number);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    /// Copy cards into the replica in order until the next one would exceed
    /// the budget. Replication never evicts.
    pub fn replicate(&self, cards: &[Card]) -> ReplicationReport {
        let mut inner = self.lock();
        let expires_at = Instant::now() + self.config.ttl;
        let mut report = ReplicationReport::default();

        for (i, card) in cards.iter().enumerate() {
            let size = entry_size(card);
            let reclaimed = inner
                .entries
                .get(&card.card_number)
                .map(|e| e.size)
                .unwrap_or(0);
            if inner.used_bytes - reclaimed + size > self.config.max_memory_bytes {
                report.skipped = cards.len() - i;
                break;
            }
            inner.remove(&card.card_number);
            inner.insert(card.clone(), size, expires_at);
            report.cached += 1;
        }

        info!(
            cached = report.cached,
            skipped = report.skipped,
            used_bytes = inner.used_bytes,
            "Cache replication finished"
        );
        report
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            used_bytes: inner.used_bytes,
            max_memory_bytes: self.config.max_memory_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}

impl Default for CardCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::CardType;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn card(number: &str) -> Card {
        Card {
            card_id: 1,
            user_id: 1,
            username: "alice".into(),
            card_number: number.into(),
            card_type: CardType::Debit,
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            availability: true,
            balance: dec!(100),
        }
    }

    fn cache_for(entries: usize, ttl: Duration) -> CardCache {
        // All test cards have 4-digit numbers, so they are the same size
        let size = entry_size(&card("0000"));
        CardCache::new(CacheConfig {
            ttl,
            max_memory_bytes: size * entries,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_hit_and_miss() {
        let cache = CardCache::default();
        assert!(cache.lookup("1111").is_none());

        cache.populate(&card("1111"));
        assert_eq!(cache.lookup("1111").unwrap().card_number, "1111");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = CardCache::default();
        cache.populate(&card("1111"));

        tokio::time::advance(DEFAULT_TTL - Duration::from_secs(1)).await;
        assert!(cache.lookup("1111").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.lookup("1111").is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_oldest_first() {
        let cache = cache_for(3, DEFAULT_TTL);
        for number in ["0001", "0002", "0003"] {
            assert!(cache.populate(&card(number)));
        }
        let cap = cache.config().max_memory_bytes;
        assert_eq!(cache.used_bytes(), cap);

        cache.populate(&card("0004"));

        assert!(cache.lookup("0001").is_none());
        assert!(cache.lookup("0002").is_some());
        assert!(cache.lookup("0004").is_some());
        assert!(cache.used_bytes() <= cap);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_moves_entry_to_newest() {
        let cache = cache_for(2, DEFAULT_TTL);
        cache.populate(&card("0001"));
        cache.populate(&card("0002"));
        cache.populate(&card("0001"));

        cache.populate(&card("0003"));

        assert!(cache.lookup("0002").is_none());
        assert!(cache.lookup("0001").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_card_is_not_cached() {
        let cache = CardCache::new(CacheConfig {
            ttl: DEFAULT_TTL,
            max_memory_bytes: 8,
        });
        assert!(!cache.populate(&card("1111")));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate() {
        let cache = CardCache::default();
        cache.populate(&card("1111"));
        assert!(cache.invalidate("1111"));
        assert!(!cache.invalidate("1111"));
        assert!(cache.lookup("1111").is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_populate_if_epoch_drops_write_after_invalidate() {
        let cache = CardCache::default();
        let epoch = cache.epoch("1111");

        // A mutation lands between the reader's epoch read and its write-back
        cache.invalidate("1111");
        assert!(!cache.populate_if_epoch(&card("1111"), epoch));
        assert!(cache.lookup("1111").is_none());

        let epoch = cache.epoch("1111");
        assert!(cache.populate_if_epoch(&card("1111"), epoch));
        assert!(cache.lookup("1111").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = CardCache::default();
        cache.populate_with_ttl(&card("0001"), Duration::from_secs(10));
        cache.populate(&card("0002"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicate_stops_at_budget() {
        let cache = cache_for(2, DEFAULT_TTL);
        let cards: Vec<Card> = ["0001", "0002", "0003", "0004"]
            .into_iter()
            .map(card)
            .collect();

        let report = cache.replicate(&cards);

        assert_eq!(report, ReplicationReport { cached: 2, skipped: 2 });
        assert!(cache.lookup("0001").is_some());
        assert!(cache.lookup("0003").is_none());
        assert_eq!(cache.stats().evictions, 0);
    }
}
