//! Link statistics.
//!
//! Counters are plain atomics so the receive interrupt can bump them without
//! taking a lock. [`StatsServer`] publishes them over HTTP on host runs.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 42,
//!   "node": "ap",
//!   "rx": { "frames": 12, "fragments": 70, "rejected": 1, "ignored": 3, "incomplete": 0, "discarded": 0 },
//!   "tx": { "frames": 12, "fragments": 70, "errors": 0 },
//!   "clients": { "joins": 1, "joins_rejected": 0, "negotiation_timeouts": 0, "evicted": 0, "active": 1 }
//! }
//! ```

mod server;

pub use server::{StatsServer, DEFAULT_STATS_PORT};

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Receive path counters.
#[derive(Debug, Default)]
pub struct RxStats {
    /// Frames completed in the reassembly buffer.
    pub frames: AtomicUsize,
    /// Fragments stored.
    pub fragments: AtomicUsize,
    /// Fragments refused as malformed or overrunning.
    pub rejected: AtomicUsize,
    /// Radio frames that arrived outside an accepting state.
    pub ignored: AtomicUsize,
    /// Frames completed with fragment gaps below the terminal index.
    pub incomplete: AtomicUsize,
    /// Partial frames dropped when a fragment started a new one.
    pub discarded: AtomicUsize,
}

/// Transmit path counters.
#[derive(Debug, Default)]
pub struct TxStats {
    /// Frames handed to `send`.
    pub frames: AtomicUsize,
    /// Radio fragments transmitted.
    pub fragments: AtomicUsize,
    /// Radio transmit failures.
    pub errors: AtomicUsize,
}

/// Join and liveness counters.
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Successful negotiations.
    pub joins: AtomicUsize,
    /// Negotiations refused because the client table was full.
    pub joins_rejected: AtomicUsize,
    /// Negotiations whose tick came too late.
    pub negotiation_timeouts: AtomicUsize,
    /// Clients evicted for inactivity.
    pub evicted: AtomicUsize,
    /// Currently registered clients.
    pub active: AtomicUsize,
}

/// All counters of one link endpoint.
#[derive(Debug)]
pub struct LinkStats {
    start_time: Instant,
    /// Name shown in reports.
    pub node: String,
    /// Receive path.
    pub rx: RxStats,
    /// Transmit path.
    pub tx: TxStats,
    /// Joins and liveness.
    pub clients: ClientStats,
}

/// Bump a counter.
#[inline]
pub(crate) fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl LinkStats {
    /// Create zeroed counters.
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            start_time: Instant::now(),
            node: node.into(),
            rx: RxStats::default(),
            tx: TxStats::default(),
            clients: ClientStats::default(),
        }
    }

    /// Uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            node: self.node.clone(),
            rx: RxSnapshot {
                frames: load(&self.rx.frames),
                fragments: load(&self.rx.fragments),
                rejected: load(&self.rx.rejected),
                ignored: load(&self.rx.ignored),
                incomplete: load(&self.rx.incomplete),
                discarded: load(&self.rx.discarded),
            },
            tx: TxSnapshot {
                frames: load(&self.tx.frames),
                fragments: load(&self.tx.fragments),
                errors: load(&self.tx.errors),
            },
            clients: ClientSnapshot {
                joins: load(&self.clients.joins),
                joins_rejected: load(&self.clients.joins_rejected),
                negotiation_timeouts: load(&self.clients.negotiation_timeouts),
                evicted: load(&self.clients.evicted),
                active: load(&self.clients.active),
            },
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        // Plain integers and a string cannot fail to serialize.
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new("winot")
    }
}

/// Serializable copy of [`LinkStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub node: String,
    pub rx: RxSnapshot,
    pub tx: TxSnapshot,
    pub clients: ClientSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RxSnapshot {
    pub frames: usize,
    pub fragments: usize,
    pub rejected: usize,
    pub ignored: usize,
    pub incomplete: usize,
    pub discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxSnapshot {
    pub frames: usize,
    pub fragments: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    pub joins: usize,
    pub joins_rejected: usize,
    pub negotiation_timeouts: usize,
    pub evicted: usize,
    pub active: usize,
}
