//! In-memory rendezvous between suspended nodes and inbound external events.
//!
//! A handler that must wait for, say, a reply message calls
//! [`WaiterTable::register`] with its `(run_id, node_id)` key and awaits the
//! returned [`Waiter`]. Whoever receives the inbound signal calls
//! [`WaiterTable::deliver`] with the same key.
//!
//! Each registration is a single-slot mailbox with one producer and one
//! consumer. Delivery and the optional timeout race to fill the slot; the
//! race is decided by removing the entry from the table. Only the side that
//! removes the entry holds the `oneshot::Sender`, so the slot is written at
//! most once and the loser observes an empty table.
//!
//! At most one waiter exists per key. Registering the same key again drops
//! the previous sender (last writer wins); the pre-empted receiver gets
//! [`WaitError::Superseded`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::NodeError;

// ---------------------------------------------------------------------------
// Keys and errors
// ---------------------------------------------------------------------------

/// `(run_id, node_id)` pair identifying one waiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaiterKey {
    pub run_id: String,
    pub node_id: String,
}

impl WaiterKey {
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Case-insensitive substring match against already-lowercased text.
    fn mentioned_in(&self, lowered: &str) -> bool {
        let run = self.run_id.to_lowercase();
        let node = self.node_id.to_lowercase();
        (!run.is_empty() && lowered.contains(&run)) || (!node.is_empty() && lowered.contains(&node))
    }
}

impl std::fmt::Display for WaiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.run_id, self.node_id)
    }
}

/// Why a [`Waiter`] resolved without a payload.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for external event")]
    TimedOut,

    #[error("waiter was replaced by a newer registration for the same key")]
    Superseded,
}

impl WaitError {
    pub fn into_node_error(self, key: &WaiterKey) -> NodeError {
        match self {
            Self::TimedOut => NodeError::WaitTimeout {
                run_id: key.run_id.clone(),
                node_id: key.node_id.clone(),
            },
            Self::Superseded => NodeError::Superseded {
                run_id: key.run_id.clone(),
                node_id: key.node_id.clone(),
            },
        }
    }
}

/// What ended up in the slot.
#[derive(Debug)]
enum Signal {
    Delivered(Value),
    TimedOut,
}

struct Slot {
    id: u64,
    tx: oneshot::Sender<Signal>,
    timer: Option<AbortHandle>,
}

impl Slot {
    fn settle(self, signal: Signal) -> bool {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.tx.send(signal).is_ok()
    }
}

type Slots = Arc<DashMap<WaiterKey, Slot>>;

// ---------------------------------------------------------------------------
// Waiter
// ---------------------------------------------------------------------------

/// Receiving half of one registration.
///
/// Dropping an unsettled waiter removes its registration, so an attempt that
/// is cancelled or hits its deadline does not leave a stale entry behind.
pub struct Waiter {
    key: WaiterKey,
    id: u64,
    rx: oneshot::Receiver<Signal>,
    slots: Slots,
}

impl Waiter {
    pub fn key(&self) -> &WaiterKey {
        &self.key
    }

    /// Suspend until a payload is delivered, the timeout fires, or a newer
    /// registration pre-empts this one.
    pub async fn recv(mut self) -> Result<Value, WaitError> {
        match (&mut self.rx).await {
            Ok(Signal::Delivered(payload)) => Ok(payload),
            Ok(Signal::TimedOut) => Err(WaitError::TimedOut),
            Err(_) => Err(WaitError::Superseded),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let id = self.id;
        if let Some((_, slot)) = self.slots.remove_if(&self.key, |_, s| s.id == id) {
            debug!(key = %self.key, "dropping unsettled waiter");
            if let Some(timer) = slot.timer {
                timer.abort();
            }
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Delivery outcome
// ---------------------------------------------------------------------------

/// Result of routing a free-text inbound signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered through an explicit `run:` / `node:` correlation.
    Exact(WaiterKey),
    /// Delivered by the substring fallback.
    Fuzzy(WaiterKey),
    Undelivered,
}

// ---------------------------------------------------------------------------
// WaiterTable
// ---------------------------------------------------------------------------

/// Process-scoped table of pending waiters.
///
/// Construct one per process (or per test) and share it via `Arc` between
/// the handlers that suspend and the collaborators that deliver.
#[derive(Default)]
pub struct WaiterTable {
    slots: Slots,
    next_id: AtomicU64,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `(run_id, node_id)`.
    ///
    /// With `timeout = Some(d)` a background timer settles the slot with a
    /// timeout after `d` unless a delivery wins first. `None` waits
    /// indefinitely; bounding that is the caller's job.
    ///
    /// Must be called from within a tokio runtime when a timeout is given.
    pub fn register(&self, run_id: &str, node_id: &str, timeout: Option<Duration>) -> Waiter {
        let key = WaiterKey::new(run_id, node_id);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let slot = Slot { id, tx, timer: None };
        if let Some(previous) = self.slots.insert(key.clone(), slot) {
            warn!(key = %key, "replacing pending waiter; the earlier registration is pre-empted");
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }

        if let Some(after) = timeout {
            let slots = Arc::clone(&self.slots);
            let timer_key = key.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some((_, slot)) = slots.remove_if(&timer_key, |_, s| s.id == id) {
                    info!(key = %timer_key, ?after, "waiter timed out");
                    let _ = slot.tx.send(Signal::TimedOut);
                }
            });
            // The timer may already have settled the slot; then there is
            // nothing left to attach the handle to.
            match self.slots.get_mut(&key) {
                Some(mut slot) if slot.id == id => slot.timer = Some(handle.abort_handle()),
                _ => {}
            }
        }

        debug!(key = %key, ?timeout, "waiter registered");
        Waiter {
            key,
            id,
            rx,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Deliver `payload` to the waiter registered under `(run_id, node_id)`.
    ///
    /// Removes the registration. Returns `false` when no waiter is pending
    /// for that exact key (never registered, already delivered, or already
    /// timed out).
    pub fn deliver(&self, run_id: &str, node_id: &str, payload: Value) -> bool {
        let key = WaiterKey::new(run_id, node_id);
        match self.slots.remove(&key) {
            Some((_, slot)) => {
                let delivered = slot.settle(Signal::Delivered(payload));
                debug!(key = %key, delivered, "delivery");
                delivered
            }
            None => {
                debug!(key = %key, "no pending waiter");
                false
            }
        }
    }

    /// Degraded fallback for signals that carry no explicit correlation:
    /// deliver to the first pending waiter whose run id or node id appears
    /// (case-insensitively) in `text`.
    ///
    /// This is racy by nature. Iteration order is unspecified, so when
    /// several waiters have ids that occur in the text, or ids that are
    /// substrings of each other, any one of them may receive the signal.
    /// Prefer [`WaiterTable::deliver`] whenever the sender can correlate.
    pub fn deliver_fuzzy(&self, text: &str, payload: Value) -> Option<WaiterKey> {
        let lowered = text.to_lowercase();
        let candidates: Vec<WaiterKey> = self
            .slots
            .iter()
            .filter(|entry| entry.key().mentioned_in(&lowered))
            .map(|entry| entry.key().clone())
            .collect();

        for key in candidates {
            // Another delivery or the timer may have won in the meantime.
            if let Some((_, slot)) = self.slots.remove(&key) {
                if slot.settle(Signal::Delivered(payload.clone())) {
                    warn!(key = %key, "delivered inbound signal by fuzzy match");
                    return Some(key);
                }
            }
        }
        None
    }

    /// Route a free-text inbound signal (e.g. the body of a reply message).
    ///
    /// Explicit `run:<id> node:<id>` tokens take precedence and are delivered
    /// exactly; a correlated signal whose waiter is gone is *not* re-routed by
    /// the fuzzy fallback. Uncorrelated text falls back to
    /// [`WaiterTable::deliver_fuzzy`]. The delivered payload is the text itself.
    pub fn deliver_text(&self, text: &str) -> Delivery {
        let payload = Value::String(text.to_owned());
        if let Some(key) = Correlation::parse(text) {
            return if self.deliver(&key.run_id, &key.node_id, payload) {
                Delivery::Exact(key)
            } else {
                Delivery::Undelivered
            };
        }
        match self.deliver_fuzzy(text, payload) {
            Some(key) => Delivery::Fuzzy(key),
            None => Delivery::Undelivered,
        }
    }

    pub fn is_waiting(&self, run_id: &str, node_id: &str) -> bool {
        self.slots.contains_key(&WaiterKey::new(run_id, node_id))
    }

    /// Number of outstanding registrations.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Debug for WaiterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterTable")
            .field("pending", &self.slots.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Correlation tokens
// ---------------------------------------------------------------------------

// Ids are word characters and hyphens, optionally dot-separated; trailing
// punctuation is not part of an id.
static RUN_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\brun\s*[:=]\s*([\w-]+(?:\.[\w-]+)*)").expect("valid run token regex"));
static NODE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bnode\s*[:=]\s*([\w-]+(?:\.[\w-]+)*)").expect("valid node token regex"));

/// Explicit correlation carried inside free text, e.g.
/// `"run:8f1c node:approve-step yes please"`.
pub struct Correlation;

impl Correlation {
    /// Extract a waiter key when both `run:` and `node:` tokens are present.
    /// Markers match case-insensitively; the ids keep their case.
    pub fn parse(text: &str) -> Option<WaiterKey> {
        let run = RUN_TOKEN.captures(text)?.get(1)?.as_str();
        let node = NODE_TOKEN.captures(text)?.get(1)?.as_str();
        Some(WaiterKey::new(run, node))
    }
}
