//! Per-operation circuit breakers.
//!
//! State machine per operation name:
//!
//! ```text
//! closed ──(failure_count >= threshold)──► open
//! open ──(cooldown elapsed, canExecute query)──► half-open
//! half-open ──(record_success)──► closed
//! half-open ──(record_failure)──► open
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::events::{DaemonEvent, EventBus};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
    pub cooldown_ms: u64,
}

#[derive(Debug)]
struct Breaker {
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    opened_instant: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            failure_count: 0,
            last_failure_at: None,
            state: BreakerState::Closed,
            opened_at: None,
            opened_instant: None,
        }
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Utc::now());
        self.opened_instant = Some(Instant::now());
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.opened_instant = None;
    }

    fn cooldown_elapsed(&self, cooldown: Duration) -> bool {
        self.opened_instant
            .map(|at| at.elapsed() >= cooldown)
            .unwrap_or(false)
    }

    fn snapshot(&self, operation: &str, cooldown: Duration) -> BreakerSnapshot {
        BreakerSnapshot {
            operation: operation.to_string(),
            failure_count: self.failure_count,
            last_failure_at: self.last_failure_at,
            state: self.state,
            opened_at: self.opened_at,
            cooldown_ms: cooldown.as_millis() as u64,
        }
    }
}

pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Breaker>>,
    threshold: u32,
    cooldown: Duration,
    events: EventBus,
}

impl BreakerRegistry {
    pub fn new(events: EventBus) -> Self {
        Self::with_settings(events, DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }

    pub fn with_settings(events: EventBus, threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            threshold,
            cooldown,
            events,
        }
    }

    /// Whether the operation may run. Unknown operations are implicitly
    /// closed. An open breaker whose cooldown has elapsed transitions to
    /// half-open as part of this query and is allowed through.
    pub fn can_execute(&self, operation: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(operation) else {
            return true;
        };

        match breaker.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if breaker.cooldown_elapsed(self.cooldown) {
                    breaker.state = BreakerState::HalfOpen;
                    debug!(operation, "Breaker half-open after cooldown");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, operation: &str) {
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(operation) else {
            return;
        };

        if breaker.state == BreakerState::HalfOpen {
            debug!(operation, "Breaker closed after half-open success");
        }
        breaker.close();
    }

    pub fn record_failure(&self, operation: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(operation.to_string())
            .or_insert_with(Breaker::new);

        breaker.failure_count += 1;
        breaker.last_failure_at = Some(Utc::now());

        let opened = match breaker.state {
            BreakerState::Closed if breaker.failure_count >= self.threshold => {
                breaker.open();
                true
            }
            BreakerState::HalfOpen => {
                breaker.open();
                true
            }
            _ => false,
        };

        if opened {
            warn!(
                operation,
                failures = breaker.failure_count,
                "Circuit breaker opened"
            );
            self.events.emit(DaemonEvent::CircuitBreak {
                operation: operation.to_string(),
                state: BreakerState::Open.as_str().to_string(),
            });
        }
    }

    /// Unconditional reset to closed with zero counters.
    pub fn reset(&self, operation: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(operation.to_string())
            .or_insert_with(Breaker::new);
        breaker.close();
        breaker.last_failure_at = None;
    }

    /// Walk all breakers, promote elapsed-cooldown open ones to half-open,
    /// and return the set that changed.
    pub fn evaluate(&self) -> Vec<BreakerSnapshot> {
        let mut breakers = self.breakers.lock();
        let mut changed = Vec::new();

        for (operation, breaker) in breakers.iter_mut() {
            if breaker.state == BreakerState::Open && breaker.cooldown_elapsed(self.cooldown) {
                breaker.state = BreakerState::HalfOpen;
                debug!(operation, "Breaker promoted to half-open by evaluation");
                changed.push(breaker.snapshot(operation, self.cooldown));
            }
        }

        changed
    }

    pub fn get_state(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock();
        let mut snapshots: Vec<_> = breakers
            .iter()
            .map(|(op, b)| b.snapshot(op, self.cooldown))
            .collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }

    pub fn state_of(&self, operation: &str) -> Option<BreakerSnapshot> {
        let breakers = self.breakers.lock();
        breakers
            .get(operation)
            .map(|b| b.snapshot(operation, self.cooldown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, cooldown_ms: u64) -> BreakerRegistry {
        BreakerRegistry::with_settings(
            EventBus::default(),
            threshold,
            Duration::from_millis(cooldown_ms),
        )
    }

    #[test]
    fn test_unknown_operation_is_closed() {
        let registry = registry(3, 1000);
        assert!(registry.can_execute("never-seen"));
        assert!(registry.state_of("never-seen").is_none());
    }

    #[test]
    fn test_opens_at_threshold() {
        let registry = registry(3, 1000);

        registry.record_failure("x");
        registry.record_failure("x");
        assert!(registry.can_execute("x"));

        registry.record_failure("x");
        assert!(!registry.can_execute("x"));

        let state = registry.state_of("x").unwrap();
        assert_eq!(state.state, BreakerState::Open);
        assert!(state.opened_at.is_some());
    }

    #[tokio::test]
    async fn test_lifecycle_open_halfopen_closed() {
        let registry = registry(3, 50);

        for _ in 0..3 {
            registry.record_failure("x");
        }
        assert!(!registry.can_execute("x"));

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(registry.can_execute("x"));
        assert_eq!(registry.state_of("x").unwrap().state, BreakerState::HalfOpen);

        registry.record_success("x");
        let state = registry.state_of("x").unwrap();
        assert_eq!(state.state, BreakerState::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(state.opened_at.is_none());
    }

    #[tokio::test]
    async fn test_halfopen_failure_reopens() {
        let registry = registry(2, 30);

        registry.record_failure("y");
        registry.record_failure("y");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(registry.can_execute("y"));

        registry.record_failure("y");
        assert_eq!(registry.state_of("y").unwrap().state, BreakerState::Open);
        assert!(!registry.can_execute("y"));
    }

    #[test]
    fn test_reset_yields_closed_zero() {
        let registry = registry(2, 1000);

        registry.record_failure("z");
        registry.record_failure("z");
        assert!(!registry.can_execute("z"));

        registry.reset("z");
        let state = registry.state_of("z").unwrap();
        assert_eq!(state.state, BreakerState::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(state.last_failure_at.is_none());
        assert!(registry.can_execute("z"));
    }

    #[tokio::test]
    async fn test_evaluate_returns_changed() {
        let registry = registry(1, 20);

        registry.record_failure("a");
        registry.record_failure("b");
        registry.record_failure("c");
        registry.record_success("c");

        assert!(registry.evaluate().is_empty());
        tokio::time::sleep(Duration::from_millis(30)).await;

        let changed = registry.evaluate();
        let mut names: Vec<_> = changed.iter().map(|s| s.operation.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert!(changed.iter().all(|s| s.state == BreakerState::HalfOpen));

        // Second evaluation sees no further transitions.
        assert!(registry.evaluate().is_empty());
    }

    #[test]
    fn test_open_emits_circuit_break_event() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let registry = BreakerRegistry::with_settings(events, 1, Duration::from_secs(1));

        registry.record_failure("payments");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), "healing:circuit_break");
    }
}
