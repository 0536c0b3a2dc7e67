//! Bounded recency sets for transport-level de-duplication.
//!
//! Chat transports redeliver: a message can arrive wrapped in more than one
//! event, and an event can be delivered again after a reconnect. Each
//! transport owns one [`DedupGate`] per identifier granularity and consults
//! them before anything reaches the router. The sets live for the process
//! lifetime and are not persisted.

use parking_lot::Mutex;
use std::collections::HashSet;

/// Default capacity for the transport event-id gate.
pub const EVENT_GATE_CAPACITY: usize = 5_000;
/// Default capacity for the transport message-id gate.
pub const MESSAGE_GATE_CAPACITY: usize = 10_000;

/// Insert-on-first-sight recency set with a hard capacity.
///
/// When an insert pushes the set past its capacity the whole set is cleared
/// rather than evicting one entry. After a clear a previously-seen id can be
/// reported unseen once more; that is an accepted, low-harm tradeoff for not
/// tracking recency order.
pub struct DedupGate {
    capacity: usize,
    seen: Mutex<HashSet<String>>,
}

impl DedupGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn event_gate() -> Self {
        Self::new(EVENT_GATE_CAPACITY)
    }

    pub fn message_gate() -> Self {
        Self::new(MESSAGE_GATE_CAPACITY)
    }

    /// Record `id` and report whether it was already seen since the last
    /// clear. First sighting returns `false`, repeats return `true`.
    pub fn seen(&self, id: &str) -> bool {
        let mut set = self.seen.lock();
        if set.contains(id) {
            return true;
        }
        set.insert(id.to_string());
        if set.len() > self.capacity {
            set.clear();
        }
        false
    }
}

/// The two gates a transport loop consults, sized per identifier granularity.
pub struct DedupGates {
    pub events: DedupGate,
    pub messages: DedupGate,
}

impl Default for DedupGates {
    fn default() -> Self {
        Self {
            events: DedupGate::event_gate(),
            messages: DedupGate::message_gate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_then_duplicate() {
        let gate = DedupGate::new(16);
        assert!(!gate.seen("evt-1"));
        assert!(gate.seen("evt-1"));
        assert!(gate.seen("evt-1"));
        assert!(!gate.seen("evt-2"));
    }

    #[test]
    fn coarse_reset_forgets_everything() {
        let gate = DedupGate::new(3);
        assert!(!gate.seen("a"));
        assert!(!gate.seen("b"));
        assert!(!gate.seen("c"));
        // Fourth insert exceeds capacity and clears the whole set.
        assert!(!gate.seen("d"));
        // Previously-seen ids are forgotten after the reset.
        assert!(!gate.seen("a"));
    }

    #[test]
    fn default_gates_have_documented_capacities() {
        let gates = DedupGates::default();
        assert_eq!(gates.events.capacity, EVENT_GATE_CAPACITY);
        assert_eq!(gates.messages.capacity, MESSAGE_GATE_CAPACITY);
    }
}
