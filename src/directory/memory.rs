//! In-memory card store
//!
//! Every card sits behind its own mutex. A transfer locks its two cards in
//! card-number order, so transfers over disjoint pairs run in parallel and
//! overlapping pairs cannot deadlock. The mutation path holds the locks
//! without any `.await`, which makes it impossible to cancel halfway.
//!
//! Fault injection hooks (`set_unreachable`, `set_latency`,
//! `fail_next_apply`) let tests drive the worker's failure paths.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, error};

use super::error::DirectoryError;
use super::models::Card;
use super::store::{ApplyOutcome, CardStore, TransferCommand, check_transfer};
use crate::ledger::MemoryLedger;

pub struct MemoryCardStore {
    cards: DashMap<String, Arc<Mutex<Card>>>,
    next_id: AtomicI64,
    ledger: Arc<MemoryLedger>,
    unreachable: AtomicBool,
    latency_ms: AtomicU64,
    fail_next_apply: AtomicBool,
    mutations: AtomicUsize,
}

impl MemoryCardStore {
    /// Committed records are written into `ledger` atomically with the balances
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self {
            cards: DashMap::new(),
            next_id: AtomicI64::new(1),
            ledger,
            unreachable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            fail_next_apply: AtomicBool::new(false),
            mutations: AtomicUsize::new(0),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every call, e.g. to trip the caller's timeout
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `apply_transfer` fail after the new balances are staged
    /// but before anything is written (simulated crash mid-mutation)
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Number of committed balance mutations
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self) -> Result<(), DirectoryError> {
        let latency_ms = self.latency_ms.load(Ordering::SeqCst);
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "memory directory offline".into(),
            ));
        }
        Ok(())
    }

    fn card_handle(&self, card_number: &str) -> Option<Arc<Mutex<Card>>> {
        self.cards.get(card_number).map(|c| Arc::clone(c.value()))
    }

    fn apply_locked(&self, command: &TransferCommand) -> Result<ApplyOutcome, DirectoryError> {
        let sender = self.card_handle(&command.sender_card_number);
        let recipient = self.card_handle(&command.recipient_card_number);

        let (Some(sender), Some(recipient)) = (sender, recipient) else {
            if let Some(existing) = self.ledger.get_sync(&command.idempotency_key)? {
                return Ok(ApplyOutcome::AlreadyRecorded(existing));
            }
            return Ok(ApplyOutcome::Rejected(
                crate::ledger::TransferOutcome::CardNotFound,
            ));
        };

        if Arc::ptr_eq(&sender, &recipient) {
            let card = lock_card(&sender)?;
            return self.commit_self_transfer(command, &card);
        }

        // Lock order: ascending card number
        let (mut sender_card, mut recipient_card) =
            if command.sender_card_number < command.recipient_card_number {
                let s = lock_card(&sender)?;
                let r = lock_card(&recipient)?;
                (s, r)
            } else {
                let r = lock_card(&recipient)?;
                let s = lock_card(&sender)?;
                (s, r)
            };

        // Checked under lock: a concurrent redelivery may have committed first
        if let Some(existing) = self.ledger.get_sync(&command.idempotency_key)? {
            return Ok(ApplyOutcome::AlreadyRecorded(existing));
        }

        if let Err(outcome) = check_transfer(Some(&sender_card), Some(&recipient_card), command.amount)
        {
            return Ok(ApplyOutcome::Rejected(outcome));
        }

        let new_sender_balance = sender_card.balance - command.amount;
        if new_sender_balance.is_sign_negative() {
            error!(
                card_number = %sender_card.card_number,
                balance = %sender_card.balance,
                amount = %command.amount,
                "Refusing mutation that would make a balance negative"
            );
            return Err(DirectoryError::InvariantViolation(format!(
                "card {} would go to {}",
                sender_card.card_number, new_sender_balance
            )));
        }
        let new_recipient_balance = recipient_card
            .balance
            .checked_add(command.amount)
            .ok_or_else(|| {
                DirectoryError::InvariantViolation(format!(
                    "card {} balance overflow",
                    recipient_card.card_number
                ))
            })?;

        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "injected failure mid-mutation".into(),
            ));
        }

        let record = command.committed_record();
        if let Some(existing) = self.ledger.try_insert(record.clone())? {
            return Ok(ApplyOutcome::AlreadyRecorded(existing));
        }

        sender_card.balance = new_sender_balance;
        recipient_card.balance = new_recipient_balance;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        debug!(
            idempotency_key = %command.idempotency_key,
            sender_balance = %sender_card.balance,
            recipient_balance = %recipient_card.balance,
            "Balances updated"
        );
        Ok(ApplyOutcome::Committed(record))
    }

    fn commit_self_transfer(
        &self,
        command: &TransferCommand,
        card: &Card,
    ) -> Result<ApplyOutcome, DirectoryError> {
        if let Some(existing) = self.ledger.get_sync(&command.idempotency_key)? {
            return Ok(ApplyOutcome::AlreadyRecorded(existing));
        }
        if let Err(outcome) = check_transfer(Some(card), Some(card), command.amount) {
            return Ok(ApplyOutcome::Rejected(outcome));
        }
        let record = command.committed_record();
        match self.ledger.try_insert(record.clone())? {
            Some(existing) => Ok(ApplyOutcome::AlreadyRecorded(existing)),
            None => Ok(ApplyOutcome::Committed(record)),
        }
    }
}

fn lock_card(card: &Mutex<Card>) -> Result<MutexGuard<'_, Card>, DirectoryError> {
    card.lock()
        .map_err(|_| DirectoryError::Unavailable("card lock poisoned".into()))
}

#[async_trait]
impl CardStore for MemoryCardStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_card(&self, card_number: &str) -> Result<Option<Card>, DirectoryError> {
        self.simulate_network().await?;
        match self.card_handle(card_number) {
            Some(card) => Ok(Some(lock_card(&card)?.clone())),
            None => Ok(None),
        }
    }

    async fn list_cards(&self, user_id: i64) -> Result<Vec<Card>, DirectoryError> {
        let mut cards: Vec<Card> = self
            .all_cards()
            .await?
            .into_iter()
            .filter(|c| c.user_id == user_id)
            .collect();
        cards.sort_by_key(|c| c.card_id);
        Ok(cards)
    }

    async fn all_cards(&self) -> Result<Vec<Card>, DirectoryError> {
        self.simulate_network().await?;
        let handles: Vec<Arc<Mutex<Card>>> =
            self.cards.iter().map(|c| Arc::clone(c.value())).collect();
        let mut cards = handles
            .iter()
            .map(|h| lock_card(h).map(|c| c.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        cards.sort_by_key(|c| c.card_id);
        Ok(cards)
    }

    async fn insert_card(&self, mut card: Card) -> Result<Card, DirectoryError> {
        self.simulate_network().await?;
        if card.balance.is_sign_negative() {
            return Err(DirectoryError::InvalidCard(
                "opening balance cannot be negative".into(),
            ));
        }
        match self.cards.entry(card.card_number.clone()) {
            Entry::Occupied(_) => Err(DirectoryError::DuplicateCardNumber(card.card_number)),
            Entry::Vacant(slot) => {
                card.card_id = self.next_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(Arc::new(Mutex::new(card.clone())));
                Ok(card)
            }
        }
    }

    async fn set_availability(
        &self,
        card_number: &str,
        available: bool,
    ) -> Result<bool, DirectoryError> {
        self.simulate_network().await?;
        match self.card_handle(card_number) {
            Some(card) => {
                lock_card(&card)?.availability = available;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_transfer(
        &self,
        command: &TransferCommand,
    ) -> Result<ApplyOutcome, DirectoryError> {
        self.simulate_network().await?;
        // No await from here on
        self.apply_locked(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::models::CardType;
    use crate::ledger::{IdempotencyKey, TransactionLedger, TransferOutcome};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn card(number: &str, balance: Decimal) -> Card {
        Card {
            card_id: 0,
            user_id: 1,
            username: "alice".into(),
            card_number: number.into(),
            card_type: CardType::Debit,
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            availability: true,
            balance,
        }
    }

    fn command(key: &str, from: &str, to: &str, amount: Decimal) -> TransferCommand {
        TransferCommand {
            idempotency_key: IdempotencyKey::parse(key).unwrap(),
            sender_card_number: from.into(),
            recipient_card_number: to.into(),
            amount,
        }
    }

    async fn store_with(cards: &[(&str, Decimal)]) -> (MemoryCardStore, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let store = MemoryCardStore::new(ledger.clone());
        for (number, balance) in cards {
            store.insert_card(card(number, *balance)).await.unwrap();
        }
        (store, ledger)
    }

    async fn balance(store: &MemoryCardStore, number: &str) -> Decimal {
        store.get_card(number).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_apply_commits_both_sides_and_record() {
        let (store, ledger) = store_with(&[("S", dec!(100)), ("R", dec!(5))]).await;

        let outcome = store
            .apply_transfer(&command("k1", "S", "R", dec!(40)))
            .await
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::Committed(_)));
        assert_eq!(balance(&store, "S").await, dec!(60));
        assert_eq!(balance(&store, "R").await, dec!(45));
        let record = ledger
            .find(&IdempotencyKey::parse("k1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.outcome, TransferOutcome::Committed);
    }

    #[tokio::test]
    async fn test_apply_same_key_twice_mutates_once() {
        let (store, _) = store_with(&[("S", dec!(100)), ("R", dec!(0))]).await;
        let cmd = command("k1", "S", "R", dec!(40));

        store.apply_transfer(&cmd).await.unwrap();
        let second = store.apply_transfer(&cmd).await.unwrap();

        assert!(matches!(second, ApplyOutcome::AlreadyRecorded(_)));
        assert_eq!(balance(&store, "S").await, dec!(60));
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_rejections_leave_balances() {
        let (store, ledger) = store_with(&[("S", dec!(10)), ("R", dec!(0))]).await;

        let outcome = store
            .apply_transfer(&command("k1", "S", "R", dec!(40)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Rejected(TransferOutcome::InsufficientFunds)
        );

        let outcome = store
            .apply_transfer(&command("k2", "S", "missing", dec!(1)))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Rejected(TransferOutcome::CardNotFound));

        store.set_availability("R", false).await.unwrap();
        let outcome = store
            .apply_transfer(&command("k3", "S", "R", dec!(1)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Rejected(TransferOutcome::RecipientUnavailable)
        );

        assert_eq!(balance(&store, "S").await, dec!(10));
        assert_eq!(balance(&store, "R").await, dec!(0));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_no_partial_state() {
        let (store, ledger) = store_with(&[("S", dec!(100)), ("R", dec!(0))]).await;
        store.fail_next_apply();

        let result = store
            .apply_transfer(&command("k1", "S", "R", dec!(40)))
            .await;

        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
        assert_eq!(balance(&store, "S").await, dec!(100));
        assert_eq!(balance(&store, "R").await, dec!(0));
        assert!(ledger.is_empty());

        // Retry succeeds
        let outcome = store
            .apply_transfer(&command("k1", "S", "R", dec!(40)))
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Committed(_)));
    }

    #[tokio::test]
    async fn test_ledger_down_blocks_mutation() {
        let (store, ledger) = store_with(&[("S", dec!(100)), ("R", dec!(0))]).await;
        ledger.set_unreachable(true);

        let result = store
            .apply_transfer(&command("k1", "S", "R", dec!(40)))
            .await;

        assert!(matches!(result, Err(DirectoryError::Ledger(_))));
        ledger.set_unreachable(false);
        assert_eq!(balance(&store, "S").await, dec!(100));
    }

    #[tokio::test]
    async fn test_duplicate_card_number() {
        let (store, _) = store_with(&[("S", dec!(1))]).await;
        let result = store.insert_card(card("S", dec!(1))).await;
        assert!(matches!(result, Err(DirectoryError::DuplicateCardNumber(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_keep_totals() {
        let (store, _) = store_with(&[("A", dec!(1000)), ("B", dec!(1000)), ("C", dec!(1000))]).await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..300 {
            let store = store.clone();
            let (from, to) = match i % 3 {
                0 => ("A", "B"),
                1 => ("B", "C"),
                _ => ("C", "A"),
            };
            handles.push(tokio::spawn(async move {
                store
                    .apply_transfer(&command(&format!("k{}", i), from, to, dec!(7)))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total = balance(&store, "A").await + balance(&store, "B").await + balance(&store, "C").await;
        assert_eq!(total, dec!(3000));
        for number in ["A", "B", "C"] {
            assert!(!balance(&store, number).await.is_sign_negative());
        }
    }
}
