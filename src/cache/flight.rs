//! Single-Flight Loading
//!
//! At most one load per key is in progress at a time. The first caller to
//! miss becomes the leader and runs the loader; every later caller for the
//! same key subscribes to the leader's `watch` channel and receives the same
//! outcome, success or failure.
//!
//! The leader holds a [`FlightGuard`]. Dropping the guard without completing
//! it (panic, cancellation) wakes the followers with
//! [`FlightFailure::Cancelled`], and dropping it always releases the key so
//! the next miss can start a fresh load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

/// Why a shared load produced no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightFailure {
    /// The loader returned an error
    Load(String),
    /// The loader did not finish in time
    Timeout(Duration),
    /// The leader went away before finishing
    Cancelled,
}

/// Outcome shared with every waiter: encoded value, or absent
pub type FlightResult = std::result::Result<Option<Bytes>, FlightFailure>;

type Slot = Option<FlightResult>;

struct InFlight {
    id: u64,
    rx: watch::Receiver<Slot>,
}

/// Role assigned to a caller joining a flight
#[derive(Debug)]
pub enum Role {
    /// Run the loader and complete the guard
    Leader(FlightGuard),
    /// Wait for the leader's outcome
    Follower(watch::Receiver<Slot>),
}

/// In-flight loads keyed by full store key
#[derive(Default)]
pub struct SingleFlight {
    in_flight: Arc<DashMap<String, InFlight>>,
    next_id: AtomicU64,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, starting one if none is in progress
    pub fn join(&self, key: &str) -> Role {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().rx.clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entry.insert(InFlight { id, rx });
                Role::Leader(FlightGuard {
                    key: key.to_string(),
                    id,
                    in_flight: Arc::clone(&self.in_flight),
                    tx: Some(tx),
                })
            }
        }
    }

    /// Number of loads currently in progress
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Wait for the leader of a flight to publish its outcome
pub async fn wait(mut rx: watch::Receiver<Slot>) -> FlightResult {
    loop {
        if let Some(result) = rx.borrow_and_update().as_ref() {
            return result.clone();
        }
        if rx.changed().await.is_err() {
            // Sender dropped; it may still have published a final value
            return (*rx.borrow())
                .clone()
                .unwrap_or(Err(FlightFailure::Cancelled));
        }
    }
}

/// Leadership of one flight
pub struct FlightGuard {
    key: String,
    id: u64,
    in_flight: Arc<DashMap<String, InFlight>>,
    tx: Option<watch::Sender<Slot>>,
}

impl FlightGuard {
    /// Publish the outcome to every follower, consuming the guard
    pub fn complete(mut self, result: FlightResult) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(result));
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for FlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGuard")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(Err(FlightFailure::Cancelled)));
        }
        let id = self.id;
        self.in_flight.remove_if(&self.key, |_, flight| flight.id == id);
    }
}

// =============================================================================
// Tests
// =============================================================================
