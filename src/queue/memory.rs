//! In-memory queue with at-least-once semantics
//!
//! Messages are held as encoded bytes, the same way a broker would hold
//! them, so every delivery goes through the JSON codec.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Delivery, QueueError, QueuedMessage, Receipt, TransferQueue};

/// A message removed from the active queue
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// None if the payload could not be decoded
    pub message: Option<QueuedMessage>,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

struct StoredMessage {
    tag: i64,
    payload: Vec<u8>,
    attempts: u32,
    visible_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<i64, StoredMessage>,
    dead_letters: Vec<DeadLetter>,
    next_tag: i64,
}

pub struct MemoryQueue {
    name: String,
    retry_delay: Duration,
    visibility_timeout: Duration,
    state: Mutex<State>,
    unreachable: AtomicBool,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, retry_delay: Duration, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            retry_delay,
            visibility_timeout,
            state: Mutex::new(State::default()),
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Put every unsettled delivery back on the queue, as a broker does when
    /// a consumer connection drops
    pub fn redeliver_unacked(&self) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let mut tags: Vec<i64> = state.in_flight.keys().copied().collect();
        tags.sort_unstable();
        for tag in &tags {
            if let Some(mut stored) = state.in_flight.remove(tag) {
                stored.visible_at = now;
                state.ready.push_back(stored);
            }
        }
        Ok(tags.len())
    }

    pub fn ready_len(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    /// Nothing ready, nothing in flight
    pub fn is_drained(&self) -> bool {
        self.lock()
            .map(|s| s.ready.is_empty() && s.in_flight.is_empty())
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue state poisoned".into()))
    }

    fn check_reachable(&self) -> Result<(), QueueError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(format!(
                "queue '{}' offline",
                self.name
            )));
        }
        Ok(())
    }

    /// Only the delivery the receipt was issued for can be settled
    fn take_in_flight(state: &mut State, receipt: Receipt) -> Result<StoredMessage, QueueError> {
        let current = state.in_flight.get(&receipt.delivery_tag).map(|m| m.attempts);
        if current != Some(receipt.attempt) {
            return Err(QueueError::UnknownDelivery(receipt));
        }
        state
            .in_flight
            .remove(&receipt.delivery_tag)
            .ok_or(QueueError::UnknownDelivery(receipt))
    }

    fn park(state: &mut State, stored: StoredMessage, reason: &str) {
        let message = QueuedMessage::decode(&stored.payload).ok();
        state.dead_letters.push(DeadLetter {
            message,
            payload: stored.payload,
            attempts: stored.attempts,
            reason: reason.to_string(),
        });
    }
}

#[async_trait]
impl TransferQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        self.check_reachable()?;
        let payload = message.encode()?;
        let mut state = self.lock()?;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.ready.push_back(StoredMessage {
            tag,
            payload,
            attempts: 0,
            visible_at: Instant::now(),
        });
        debug!(queue = %self.name, message_id = %message.message_id, tag, "Published");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        self.check_reachable()?;
        let mut state = self.lock()?;
        let now = Instant::now();

        // Reclaim deliveries whose consumer went silent
        let mut expired: Vec<i64> = state
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_at <= now)
            .map(|(tag, _)| *tag)
            .collect();
        expired.sort_unstable();
        for tag in expired {
            if let Some(stored) = state.in_flight.remove(&tag) {
                warn!(queue = %self.name, tag, "Visibility timeout elapsed, redelivering");
                state.ready.push_back(stored);
            }
        }

        loop {
            let Some(index) = state.ready.iter().position(|m| m.visible_at <= now) else {
                return Ok(None);
            };
            let Some(mut stored) = state.ready.remove(index) else {
                return Ok(None);
            };
            stored.attempts += 1;

            match QueuedMessage::decode(&stored.payload) {
                Ok(message) => {
                    let delivery = Delivery {
                        message,
                        delivery_tag: stored.tag,
                        attempt: stored.attempts,
                    };
                    stored.visible_at = now + self.visibility_timeout;
                    state.in_flight.insert(stored.tag, stored);
                    return Ok(Some(delivery));
                }
                Err(e) => {
                    // Undecodable on every attempt
                    warn!(
                        queue = %self.name,
                        tag = stored.tag,
                        error = %e,
                        "Dead-lettering undecodable message"
                    );
                    Self::park(&mut state, stored, &e.to_string());
                }
            }
        }
    }

    async fn ack(&self, receipt: Receipt) -> Result<(), QueueError> {
        self.check_reachable()?;
        let mut state = self.lock()?;
        Self::take_in_flight(&mut state, receipt)?;
        Ok(())
    }

    async fn nack(&self, receipt: Receipt, reason: &str) -> Result<(), QueueError> {
        self.check_reachable()?;
        let mut state = self.lock()?;
        let mut stored = Self::take_in_flight(&mut state, receipt)?;
        debug!(queue = %self.name, receipt = %receipt, reason, "Requeued");
        stored.visible_at = Instant::now() + self.retry_delay;
        state.ready.push_back(stored);
        Ok(())
    }

    async fn dead_letter(&self, receipt: Receipt, reason: &str) -> Result<(), QueueError> {
        self.check_reachable()?;
        let mut state = self.lock()?;
        let stored = Self::take_in_flight(&mut state, receipt)?;
        Self::park(&mut state, stored, reason);
        Ok(())
    }
}
