//! Packet identifier allocation for client-originated QoS>0 exchanges.

use std::collections::BTreeSet;

/// Allocates the 16 bit identifiers carried by SUBSCRIBE, UNSUBSCRIBE and
/// QoS 1/2 PUBLISH packets.
///
/// Allocation is monotonic with wraparound: a released identifier is not
/// handed out again before the counter has gone once around the whole space.
/// Zero is never allocated.
#[derive(Debug)]
pub struct PacketIdRegistry {
    last: u16,
    in_use: BTreeSet<u16>,
}

impl Default for PacketIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: 0,
            in_use: BTreeSet::new(),
        }
    }

    /// Returns a fresh identifier, or `None` when all 65535 are held.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.in_use.len() >= u16::MAX as usize {
            return None;
        }
        let mut candidate = self.last;
        loop {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if self.in_use.insert(candidate) {
                self.last = candidate;
                return Some(candidate);
            }
        }
    }

    /// Returns `id` to the pool. Unknown identifiers are ignored.
    pub fn release(&mut self, id: u16) -> bool {
        self.in_use.remove(&id)
    }

    #[must_use]
    pub fn is_in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Forgets every identifier, used when the session is discarded.
    pub fn reset(&mut self) {
        self.last = 0;
        self.in_use.clear();
    }
}
