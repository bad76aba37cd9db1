//! Actor-addressed message bus with at-least-once delivery.
//!
//! Each registered actor owns a mailbox holding messages until they are
//! acknowledged or expire. `receive` is a non-destructive peek; `consume`
//! acknowledges what it returns. A periodic sweep drops expired messages
//! (emitting one expiration event per drop) and bounds the acknowledged-id
//! set.

mod message;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use message::{BROADCAST_ACTOR, BusMessage, MessageKind};

use crate::error::{Result, WardenError};
use crate::events::{DaemonEvent, EventBus};

pub const DEFAULT_ACK_CAP: usize = 5_000;
pub const DEFAULT_ACK_KEEP: usize = 2_500;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Insertion-ordered set of acknowledged message ids, truncated to the most
/// recent `keep` entries once `cap` is exceeded.
struct AckSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    cap: usize,
    keep: usize,
}

impl AckSet {
    fn new(cap: usize, keep: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            cap,
            keep,
        }
    }

    fn insert(&mut self, id: String) {
        if self.ids.insert(id.clone()) {
            self.order.push_back(id);
        }
        if self.order.len() > self.cap {
            self.truncate();
        }
    }

    fn truncate(&mut self) {
        while self.order.len() > self.keep {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn shrink(&mut self) -> usize {
        if self.order.len() <= self.cap {
            return 0;
        }
        let before = self.order.len();
        self.truncate();
        before - self.order.len()
    }
}

pub struct MessageBus {
    mailboxes: RwLock<HashMap<String, Vec<BusMessage>>>,
    acknowledged: Mutex<AckSet>,
    events: EventBus,
}

impl MessageBus {
    pub fn new(events: EventBus) -> Self {
        Self::with_ack_bounds(events, DEFAULT_ACK_CAP, DEFAULT_ACK_KEEP)
    }

    pub fn with_ack_bounds(events: EventBus, cap: usize, keep: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            acknowledged: Mutex::new(AckSet::new(cap, keep)),
            events,
        }
    }

    /// Ensure a mailbox exists for the actor.
    pub fn register_actor(&self, name: impl Into<String>) {
        self.mailboxes.write().entry(name.into()).or_default();
    }

    pub fn actors(&self) -> Vec<String> {
        let mut names: Vec<_> = self.mailboxes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Enqueue a directed message into the recipient's mailbox. The mailbox
    /// is created on demand.
    pub fn send(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Value,
        ttl_ms: u64,
    ) -> BusMessage {
        let msg = BusMessage::new(from, to, payload, ttl_ms);
        self.deliver(msg.clone());
        msg
    }

    fn deliver(&self, msg: BusMessage) {
        let mut mailboxes = self.mailboxes.write();
        mailboxes.entry(msg.to_actor.clone()).or_default().push(msg);
    }

    /// Reply to a previously delivered message. The reply is annotated with
    /// `in_reply_to` and sent to the original sender; the original message
    /// is acknowledged.
    pub fn respond(
        &self,
        original_id: &str,
        from: impl Into<String>,
        payload: Value,
        ttl_ms: u64,
    ) -> Result<BusMessage> {
        let original = {
            let mailboxes = self.mailboxes.read();
            mailboxes
                .values()
                .flat_map(|mailbox| mailbox.iter())
                .find(|m| m.id == original_id)
                .cloned()
        }
        .ok_or_else(|| WardenError::MessageNotFound(original_id.to_string()))?;

        let reply = BusMessage::new(from, original.from_actor.clone(), payload, ttl_ms)
            .response_to(original_id);
        self.deliver(reply.clone());
        self.acknowledge(original_id);
        Ok(reply)
    }

    /// Enqueue into every known mailbox except the sender's.
    pub fn broadcast(&self, from: impl Into<String>, payload: Value, ttl_ms: u64) -> usize {
        let from = from.into();
        let template = BusMessage::broadcast(from.clone(), payload, ttl_ms);

        let mut mailboxes = self.mailboxes.write();
        let mut recipients = 0;
        for (actor, mailbox) in mailboxes.iter_mut() {
            if *actor == from {
                continue;
            }
            let mut msg = template.clone();
            msg.id = uuid::Uuid::new_v4().to_string();
            msg.to_actor = actor.clone();
            mailbox.push(msg);
            recipients += 1;
        }
        drop(mailboxes);

        self.events.emit(DaemonEvent::BusBroadcast {
            from_actor: from,
            recipients,
        });
        recipients
    }

    /// Non-destructive peek at unacknowledged, unexpired messages.
    pub fn receive(&self, actor: &str, limit: usize) -> Vec<BusMessage> {
        let now = Utc::now();
        let acked = self.acknowledged.lock();
        let mailboxes = self.mailboxes.read();

        mailboxes
            .get(actor)
            .map(|mailbox| {
                mailbox
                    .iter()
                    .filter(|m| !acked.contains(&m.id) && !m.is_expired(now))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Peek and acknowledge everything returned.
    pub fn consume(&self, actor: &str, limit: usize) -> Vec<BusMessage> {
        let messages = self.receive(actor, limit);
        for msg in &messages {
            self.acknowledge(&msg.id);
        }
        messages
    }

    /// Mark a message as delivered.
    pub fn acknowledge(&self, id: &str) {
        self.acknowledged.lock().insert(id.to_string());
    }

    /// Unacknowledged, unexpired message count for an actor.
    pub fn queue_depth(&self, actor: &str) -> usize {
        let now = Utc::now();
        let acked = self.acknowledged.lock();
        let mailboxes = self.mailboxes.read();

        mailboxes
            .get(actor)
            .map(|mailbox| {
                mailbox
                    .iter()
                    .filter(|m| !acked.contains(&m.id) && !m.is_expired(now))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop expired and acknowledged messages from every mailbox, emitting
    /// one expiration event per expired drop, then bound the ack set.
    /// Returns the number of expired messages dropped.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut expired = Vec::new();

        {
            let acked = self.acknowledged.lock();
            let mut mailboxes = self.mailboxes.write();
            for (actor, mailbox) in mailboxes.iter_mut() {
                mailbox.retain(|m| {
                    if acked.contains(&m.id) {
                        return false;
                    }
                    if m.is_expired(now) {
                        expired.push((m.id.clone(), actor.clone()));
                        return false;
                    }
                    true
                });
            }
        }

        for (message_id, actor) in &expired {
            debug!(message_id = %message_id, actor = %actor, "Bus message expired");
            self.events.emit(DaemonEvent::BusExpired {
                message_id: message_id.clone(),
                actor: actor.clone(),
            });
        }

        let shrunk = self.acknowledged.lock().shrink();
        if shrunk > 0 {
            debug!(dropped = shrunk, "Acknowledged-id set truncated");
        }

        expired.len()
    }

    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.lock().len()
    }

    /// Drop the oldest half of the acknowledged-id set. Used by memory
    /// recovery.
    pub fn trim_acknowledged(&self) -> usize {
        let mut acked = self.acknowledged.lock();
        let target = acked.len() / 2;
        let mut dropped = 0;
        while acked.order.len() > target {
            if let Some(old) = acked.order.pop_front() {
                acked.ids.remove(&old);
                dropped += 1;
            }
        }
        dropped
    }

    /// Background maintenance loop running `sweep` on an interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = bus.sweep();
                if dropped > 0 {
                    warn!(dropped, "Expired bus messages swept");
                }
            }
        })
    }
}
