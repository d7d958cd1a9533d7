//! In-memory ledger
//!
//! Backed by a `DashMap`; check-and-insert for one key happens under that
//! key's shard lock, so concurrent appends of the same key cannot both win.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{AppendResult, IdempotencyKey, LedgerError, TransactionLedger, TransactionRecord};

#[derive(Default)]
pub struct MemoryLedger {
    records: DashMap<IdempotencyKey, TransactionRecord>,
    unreachable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: make every call fail as if the backend were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Synchronous insert used by the in-memory card store while it holds
    /// the card locks. Returns the existing record if the key was taken.
    pub(crate) fn try_insert(
        &self,
        record: TransactionRecord,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        self.check_reachable()?;
        match self.records.entry(record.idempotency_key.clone()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(None)
            }
        }
    }

    pub(crate) fn get_sync(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        self.check_reachable()?;
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn check_reachable(&self) -> Result<(), LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLedger for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, key: &IdempotencyKey) -> Result<Option<TransactionRecord>, LedgerError> {
        self.get_sync(key)
    }

    async fn append(&self, record: &TransactionRecord) -> Result<AppendResult, LedgerError> {
        match self.try_insert(record.clone())? {
            Some(existing) => Ok(AppendResult::Existing(existing)),
            None => Ok(AppendResult::Inserted),
        }
    }

    async fn list_for_card(
        &self,
        card_number: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.check_reachable()?;
        let mut records: Vec<TransactionRecord> = self
            .records
            .iter()
            .filter(|r| r.touches(card_number))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransferOutcome;
    use rust_decimal_macros::dec;

    fn record(key: &str, outcome: TransferOutcome) -> TransactionRecord {
        TransactionRecord::new(
            IdempotencyKey::parse(key).unwrap(),
            "1111",
            "2222",
            dec!(40),
            outcome,
        )
    }

    #[tokio::test]
    async fn test_append_is_write_once() {
        let ledger = MemoryLedger::new();
        let first = record("k1", TransferOutcome::InsufficientFunds);

        assert_eq!(ledger.append(&first).await.unwrap(), AppendResult::Inserted);

        // Different outcome, same key: the original survives
        let second = record("k1", TransferOutcome::Committed);
        match ledger.append(&second).await.unwrap() {
            AppendResult::Existing(existing) => {
                assert_eq!(existing.outcome, TransferOutcome::InsufficientFunds)
            }
            other => panic!("expected Existing, got {:?}", other),
        }
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_find_and_list() {
        let ledger = MemoryLedger::new();
        ledger
            .append(&record("a", TransferOutcome::Committed))
            .await
            .unwrap();
        let mut other = record("b", TransferOutcome::Committed);
        other.sender_card_number = "3333".into();
        other.recipient_card_number = "4444".into();
        ledger.append(&other).await.unwrap();

        let key = IdempotencyKey::parse("a").unwrap();
        assert!(ledger.find(&key).await.unwrap().is_some());
        assert_eq!(ledger.list_for_card("2222", 10).await.unwrap().len(), 1);
        assert_eq!(ledger.list_for_card("4444", 10).await.unwrap().len(), 1);
        assert!(ledger.list_for_card("9999", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let ledger = MemoryLedger::new();
        ledger.set_unreachable(true);
        let key = IdempotencyKey::parse("a").unwrap();
        assert!(matches!(
            ledger.find(&key).await,
            Err(LedgerError::Unavailable(_))
        ));
    }
}
