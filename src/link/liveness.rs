//! Client liveness table (access point only).
//!
//! One slot per client, each remembering when the client was last heard.
//! The tick driver periodically evicts clients that have gone quiet.

use super::frame::ClientId;
use crate::config::WINOT_AP_CLIENTS_MAX;
use std::fmt;

/// A registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSlot {
    /// Client identifier from its join request.
    pub id: ClientId,
    /// Payload length the client declared when joining.
    pub declared_len: u8,
    /// Tick counter at last contact.
    pub last_contact_tick: u32,
    /// Link time (ms) at last contact.
    pub last_contact_ms: u64,
}

/// The table has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

impl fmt::Display for TableFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client table full ({} clients)", WINOT_AP_CLIENTS_MAX)
    }
}

impl std::error::Error for TableFull {}

/// Fixed-size table of clients known to an access point.
#[derive(Debug, Clone)]
pub struct ClientLivenessTable {
    slots: [Option<ClientSlot>; WINOT_AP_CLIENTS_MAX],
}

impl ClientLivenessTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: [None; WINOT_AP_CLIENTS_MAX],
        }
    }

    /// Register a client, or refresh it if already known.
    ///
    /// Returns the slot index.
    pub fn register(
        &mut self,
        id: ClientId,
        declared_len: u8,
        tick: u32,
        now_ms: u64,
    ) -> Result<usize, TableFull> {
        let slot_index = match self.position(id) {
            Some(i) => i,
            None => self
                .slots
                .iter()
                .position(Option::is_none)
                .ok_or(TableFull)?,
        };
        self.slots[slot_index] = Some(ClientSlot {
            id,
            declared_len,
            last_contact_tick: tick,
            last_contact_ms: now_ms,
        });
        Ok(slot_index)
    }

    /// Record contact with a known client. Returns false if unknown.
    pub fn touch(&mut self, id: ClientId, tick: u32, now_ms: u64) -> bool {
        match self.position(id).and_then(|i| self.slots[i].as_mut()) {
            Some(slot) => {
                slot.last_contact_tick = tick;
                slot.last_contact_ms = now_ms;
                true
            }
            None => false,
        }
    }

    /// Evict every client silent for longer than `timeout_ms`.
    ///
    /// `on_evict` is called once per evicted client. Returns the count.
    pub fn evict_silent(
        &mut self,
        now_ms: u64,
        timeout_ms: u64,
        mut on_evict: impl FnMut(&ClientSlot),
    ) -> usize {
        let mut evicted = 0;
        for entry in self.slots.iter_mut() {
            let expired = matches!(
                entry,
                Some(slot) if now_ms.saturating_sub(slot.last_contact_ms) > timeout_ms
            );
            if expired {
                if let Some(slot) = entry.take() {
                    on_evict(&slot);
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Look up a client.
    pub fn get(&self, id: ClientId) -> Option<&ClientSlot> {
        self.position(id).and_then(|i| self.slots[i].as_ref())
    }

    /// Whether a client is registered.
    pub fn contains(&self, id: ClientId) -> bool {
        self.position(id).is_some()
    }

    /// Registered clients.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSlot> {
        self.slots.iter().flatten()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn position(&self, id: ClientId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.id == id))
    }
}

impl Default for ClientLivenessTable {
    fn default() -> Self {
        Self::new()
    }
}
