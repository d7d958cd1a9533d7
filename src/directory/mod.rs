//! Card Directory
//!
//! Source of truth for cards and balances. `CardDirectory` wraps a
//! [`CardStore`] backend with:
//! - a bounded timeout on every backend call (elapsed maps to `Timeout`)
//! - cache-aside reads through the [`CardCache`] for advisory lookups
//! - cache population on create and invalidation on every write

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Months, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::cache::{CardCache, ReplicationReport};

pub use error::DirectoryError;
pub use memory::MemoryCardStore;
pub use models::{Card, CardAvailability, CardType, NewCard};
pub use postgres::PgCardStore;
pub use store::{ApplyOutcome, CardStore, TransferCommand};

/// Digits in a generated card number
pub const CARD_NUMBER_LEN: usize = 16;

/// Cards expire five years after creation
pub const CARD_VALIDITY_MONTHS: u32 = 60;

/// Balance of a freshly created card (100.00)
pub const OPENING_BALANCE: Decimal = Decimal::from_parts(10_000, 0, 0, false, 2);

const MAX_NUMBER_ATTEMPTS: usize = 8;

/// Random 16-digit card number without a leading zero
pub fn generate_card_number() -> String {
    let mut rng = rand::thread_rng();
    let mut number = String::with_capacity(CARD_NUMBER_LEN);
    number.push(char::from(b'0' + rng.gen_range(1..10u8)));
    for _ in 1..CARD_NUMBER_LEN {
        number.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    number
}

pub struct CardDirectory {
    store: Arc<dyn CardStore>,
    cache: Arc<CardCache>,
    call_timeout: Duration,
}

impl CardDirectory {
    pub fn new(store: Arc<dyn CardStore>, cache: Arc<CardCache>, call_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            call_timeout,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    pub fn cache(&self) -> &Arc<CardCache> {
        &self.cache
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout = ?self.call_timeout, "Directory call timed out");
                Err(DirectoryError::Timeout(self.call_timeout))
            }
        }
    }

    /// Authoritative read, bypassing the cache
    pub async fn get_card(&self, card_number: &str) -> Result<Option<Card>, DirectoryError> {
        self.call("get_card", self.store.get_card(card_number)).await
    }

    pub async fn check_availability(
        &self,
        card_number: &str,
    ) -> Result<CardAvailability, DirectoryError> {
        self.get_card(card_number)
            .await?
            .map(|card| card.availability_view())
            .ok_or_else(|| DirectoryError::CardNotFound(card_number.to_string()))
    }

    /// Cache-aside read: replica first, directory on miss, result written back.
    ///
    /// Advisory only. Never use the result to authorize a balance mutation.
    pub async fn lookup_cached(&self, card_number: &str) -> Result<Option<Card>, DirectoryError> {
        if let Some(card) = self.cache.lookup(card_number) {
            debug!(card_number = %card_number, "Cache hit");
            return Ok(Some(card));
        }

        // A mutation that lands during the read bumps the epoch and the
        // stale snapshot is not written back
        let epoch = self.cache.epoch(card_number);
        let card = self.get_card(card_number).await?;
        if let Some(card) = &card {
            self.cache.populate_if_epoch(card, epoch);
        }
        Ok(card)
    }

    pub async fn create_card(&self, new_card: NewCard) -> Result<Card, DirectoryError> {
        let username = new_card.username.trim();
        if username.is_empty() {
            return Err(DirectoryError::InvalidCard("username is required".into()));
        }
        let expiry_date = Utc::now()
            .date_naive()
            .checked_add_months(Months::new(CARD_VALIDITY_MONTHS))
            .ok_or_else(|| DirectoryError::InvalidCard("expiry date out of range".into()))?;

        for _ in 0..MAX_NUMBER_ATTEMPTS {
            let card = Card {
                card_id: 0,
                user_id: new_card.user_id,
                username: username.to_string(),
                card_number: generate_card_number(),
                card_type: new_card.card_type,
                expiry_date,
                availability: true,
                balance: OPENING_BALANCE,
            };
            let epoch = self.cache.epoch(&card.card_number);
            match self.call("insert_card", self.store.insert_card(card)).await {
                Ok(card) => {
                    info!(
                        card_id = card.card_id,
                        user_id = card.user_id,
                        card_type = %card.card_type,
                        "Card created"
                    );
                    self.cache.populate_if_epoch(&card, epoch);
                    return Ok(card);
                }
                Err(DirectoryError::DuplicateCardNumber(number)) => {
                    debug!(card_number = %number, "Card number collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(DirectoryError::Unavailable(
            "could not allocate a unique card number".into(),
        ))
    }

    pub async fn list_cards(&self, user_id: i64) -> Result<Vec<Card>, DirectoryError> {
        self.call("list_cards", self.store.list_cards(user_id)).await
    }

    /// Cards are never deleted, only marked unavailable
    pub async fn set_availability(
        &self,
        card_number: &str,
        available: bool,
    ) -> Result<(), DirectoryError> {
        let found = self
            .call(
                "set_availability",
                self.store.set_availability(card_number, available),
            )
            .await?;
        self.cache.invalidate(card_number);
        if !found {
            return Err(DirectoryError::CardNotFound(card_number.to_string()));
        }
        info!(card_number = %card_number, available, "Card availability changed");
        Ok(())
    }

    /// Atomic debit/credit plus ledger write.
    ///
    /// Both cache entries are invalidated after every attempt, since a timed
    /// out call may still have committed.
    pub async fn apply_transfer(
        &self,
        command: &TransferCommand,
    ) -> Result<ApplyOutcome, DirectoryError> {
        let result = self
            .call("apply_transfer", self.store.apply_transfer(command))
            .await;
        self.cache.invalidate(&command.sender_card_number);
        self.cache.invalidate(&command.recipient_card_number);
        result
    }

    /// Bulk-copy the directory into the replica until its budget is reached
    pub async fn replicate_to_cache(&self) -> Result<ReplicationReport, DirectoryError> {
        let cards = self.call("all_cards", self.store.all_cards()).await?;
        Ok(self.cache.replicate(&cards))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::ledger::{IdempotencyKey, MemoryLedger};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Reads return after a pause, holding the snapshot taken before it
    struct SlowReadStore {
        inner: Arc<MemoryCardStore>,
        pause: Duration,
    }

    #[async_trait]
    impl CardStore for SlowReadStore {
        fn name(&self) -> &'static str {
            "slow-read"
        }

        async fn get_card(&self, card_number: &str) -> Result<Option<Card>, DirectoryError> {
            let card = self.inner.get_card(card_number).await?;
            tokio::time::sleep(self.pause).await;
            Ok(card)
        }

        async fn list_cards(&self, user_id: i64) -> Result<Vec<Card>, DirectoryError> {
            self.inner.list_cards(user_id).await
        }

        async fn all_cards(&self) -> Result<Vec<Card>, DirectoryError> {
            self.inner.all_cards().await
        }

        async fn insert_card(&self, card: Card) -> Result<Card, DirectoryError> {
            self.inner.insert_card(card).await
        }

        async fn set_availability(
            &self,
            card_number: &str,
            available: bool,
        ) -> Result<bool, DirectoryError> {
            self.inner.set_availability(card_number, available).await
        }

        async fn apply_transfer(
            &self,
            command: &TransferCommand,
        ) -> Result<ApplyOutcome, DirectoryError> {
            self.inner.apply_transfer(command).await
        }
    }

    fn directory() -> (CardDirectory, Arc<MemoryCardStore>) {
        let store = Arc::new(MemoryCardStore::new(Arc::new(MemoryLedger::new())));
        let cache = Arc::new(CardCache::new(CacheConfig::default()));
        (
            CardDirectory::new(store.clone(), cache, Duration::from_millis(200)),
            store,
        )
    }

    fn new_card(user_id: i64) -> NewCard {
        NewCard {
            user_id,
            username: "alice".into(),
            card_type: CardType::Debit,
        }
    }

    #[test]
    fn test_generate_card_number() {
        for _ in 0..100 {
            let number = generate_card_number();
            assert_eq!(number.len(), CARD_NUMBER_LEN);
            assert!(number.chars().all(|c| c.is_ascii_digit()));
            assert!(!number.starts_with('0'));
        }
    }

    #[test]
    fn test_opening_balance() {
        assert_eq!(OPENING_BALANCE, dec!(100.00));
    }

    #[tokio::test]
    async fn test_create_card_defaults() {
        let (directory, _) = directory();
        let card = directory.create_card(new_card(7)).await.unwrap();

        assert_eq!(card.balance, dec!(100));
        assert!(card.availability);
        assert!(card.expiry_date > Utc::now().date_naive());
        assert_eq!(card.card_number.len(), CARD_NUMBER_LEN);
        // Populated on write
        assert!(directory.cache().lookup(&card.card_number).is_some());

        let cards = directory.list_cards(7).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert!(directory.list_cards(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_availability() {
        let (directory, _) = directory();
        let card = directory.create_card(new_card(7)).await.unwrap();

        let view = directory.check_availability(&card.card_number).await.unwrap();
        assert!(view.availability);
        assert_eq!(view.owner_name, "alice");

        directory
            .set_availability(&card.card_number, false)
            .await
            .unwrap();
        let view = directory.check_availability(&card.card_number).await.unwrap();
        assert!(!view.availability);

        assert!(matches!(
            directory.check_availability("0000").await,
            Err(DirectoryError::CardNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_cached_populates_on_miss() {
        let (directory, _) = directory();
        let card = directory.create_card(new_card(7)).await.unwrap();
        directory.cache().invalidate(&card.card_number);

        let found = directory.lookup_cached(&card.card_number).await.unwrap();
        assert!(found.is_some());
        assert!(directory.cache().lookup(&card.card_number).is_some());
        assert!(directory.lookup_cached("0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_invalidates_both_cards() {
        let (directory, _) = directory();
        let sender = directory.create_card(new_card(1)).await.unwrap();
        let recipient = directory.create_card(new_card(2)).await.unwrap();

        let command = TransferCommand {
            idempotency_key: IdempotencyKey::parse("t1").unwrap(),
            sender_card_number: sender.card_number.clone(),
            recipient_card_number: recipient.card_number.clone(),
            amount: dec!(40),
        };
        directory.apply_transfer(&command).await.unwrap();

        assert!(directory.cache().lookup(&sender.card_number).is_none());
        assert!(directory.cache().lookup(&recipient.card_number).is_none());
        let fresh = directory.lookup_cached(&sender.card_number).await.unwrap().unwrap();
        assert_eq!(fresh.balance, dec!(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_back_racing_a_transfer_never_caches_stale_balance() {
        let inner = Arc::new(MemoryCardStore::new(Arc::new(MemoryLedger::new())));
        let store = Arc::new(SlowReadStore {
            inner,
            pause: Duration::from_millis(100),
        });
        let cache = Arc::new(CardCache::new(CacheConfig::default()));
        let directory = Arc::new(CardDirectory::new(store, cache, Duration::from_secs(1)));

        let sender = directory.create_card(new_card(1)).await.unwrap();
        let recipient = directory.create_card(new_card(2)).await.unwrap();
        directory.cache().invalidate(&sender.card_number);

        // Miss: reads 100.00, then pauses before writing back
        let reader = {
            let directory = directory.clone();
            let number = sender.card_number.clone();
            tokio::spawn(async move { directory.lookup_cached(&number).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let command = TransferCommand {
            idempotency_key: IdempotencyKey::parse("race-1").unwrap(),
            sender_card_number: sender.card_number.clone(),
            recipient_card_number: recipient.card_number.clone(),
            amount: dec!(40),
        };
        assert!(matches!(
            directory.apply_transfer(&command).await.unwrap(),
            ApplyOutcome::Committed(_)
        ));

        let seen = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(seen.balance, dec!(100));

        let authoritative = directory.get_card(&sender.card_number).await.unwrap().unwrap();
        assert_eq!(authoritative.balance, dec!(60));
        match directory.cache().lookup(&sender.card_number) {
            None => {}
            Some(cached) => assert_eq!(cached.balance, authoritative.balance),
        }

        let refreshed = directory.lookup_cached(&sender.card_number).await.unwrap().unwrap();
        assert_eq!(refreshed.balance, dec!(60));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let (directory, store) = directory();
        store.set_latency(Duration::from_secs(1));

        let result = directory.get_card("1111").await;
        match result {
            Err(e @ DirectoryError::Timeout(_)) => assert!(e.is_transient()),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replicate_to_cache() {
        let (directory, _) = directory();
        for user in 0..3 {
            directory.create_card(new_card(user)).await.unwrap();
        }
        for card in directory.list_cards(0).await.unwrap() {
            directory.cache().invalidate(&card.card_number);
        }

        let report = directory.replicate_to_cache().await.unwrap();
        assert_eq!(report.cached, 3);
        assert_eq!(directory.cache().len(), 3);
    }
}
