//! Virtual timers driven by externally supplied elapsed time.
//!
//! The engine never reads a clock. The embedding program reports elapsed
//! milliseconds, the manager counts every armed timer down, and the timers
//! that ran out are handed back for the engine to dispatch to their owners.

/// Handle to a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

#[derive(Debug)]
struct TimerSlot<O> {
    owner: Option<O>,
    remaining_ms: Option<u32>,
    suspended: bool,
    // bumped on every arm, cancel and free so stale expiries are recognised
    seq: u64,
}

/// A timer that ran out during [`TimerMgr::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired<O> {
    pub id: TimerId,
    pub owner: O,
    seq: u64,
}

/// Pool of virtual timers, each tagged with an owner token `O`.
#[derive(Debug)]
pub struct TimerMgr<O> {
    slots: Vec<TimerSlot<O>>,
    limit: Option<usize>,
    allocated: usize,
}

impl<O: Copy> TimerMgr<O> {
    /// Creates a manager; `limit` bounds the number of allocated timers.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            limit,
            allocated: 0,
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Allocates an idle timer owned by `owner`.
    pub fn alloc(&mut self, owner: O) -> Option<TimerId> {
        if self.limit.is_some_and(|limit| self.allocated >= limit) {
            return None;
        }
        self.allocated += 1;
        if let Some(idx) = self.slots.iter().position(|s| s.owner.is_none()) {
            let slot = &mut self.slots[idx];
            slot.owner = Some(owner);
            slot.remaining_ms = None;
            slot.suspended = false;
            slot.seq += 1;
            return Some(TimerId(idx));
        }
        self.slots.push(TimerSlot {
            owner: Some(owner),
            remaining_ms: None,
            suspended: false,
            seq: 0,
        });
        Some(TimerId(self.slots.len() - 1))
    }

    pub fn free(&mut self, id: TimerId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.owner = None;
            slot.remaining_ms = None;
            slot.suspended = false;
            slot.seq += 1;
            self.allocated -= 1;
        }
    }

    /// Arms (or re-arms) the timer to expire after `timeout_ms`.
    pub fn wait(&mut self, id: TimerId, timeout_ms: u32) {
        if let Some(slot) = self.slot_mut(id) {
            slot.remaining_ms = Some(timeout_ms);
            slot.seq += 1;
        }
    }

    pub fn cancel(&mut self, id: TimerId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.remaining_ms = None;
            slot.seq += 1;
        }
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.slot(id).is_some_and(|s| s.remaining_ms.is_some())
    }

    /// A suspended timer keeps its remaining time but neither counts down
    /// nor contributes to [`TimerMgr::min_wait`].
    pub fn set_suspended(&mut self, id: TimerId, suspended: bool) {
        if let Some(slot) = self.slot_mut(id) {
            slot.suspended = suspended;
        }
    }

    pub fn is_suspended(&self, id: TimerId) -> bool {
        self.slot(id).is_some_and(|s| s.suspended)
    }

    pub fn remaining(&self, id: TimerId) -> Option<u32> {
        self.slot(id).and_then(|s| s.remaining_ms)
    }

    /// Shortest remaining time among running timers.
    pub fn min_wait(&self) -> Option<u32> {
        self.running().map(|(_, s)| s.remaining_ms.unwrap_or(0)).min()
    }

    /// Counts running timers down by `elapsed_ms` and disarms the ones that ran out.
    ///
    /// Expired timers are returned earliest deadline first. Before acting on
    /// one, check [`TimerMgr::is_current`]: handling an earlier expiry may have
    /// re-armed or cancelled it.
    pub fn tick(&mut self, elapsed_ms: u32) -> Vec<Expired<O>> {
        let mut expired: Vec<(u32, Expired<O>)> = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let (Some(owner), Some(remaining)) = (slot.owner, slot.remaining_ms) else {
                continue;
            };
            if slot.suspended {
                continue;
            }
            if remaining <= elapsed_ms {
                slot.remaining_ms = None;
                expired.push((
                    remaining,
                    Expired {
                        id: TimerId(idx),
                        owner,
                        seq: slot.seq,
                    },
                ));
            } else {
                slot.remaining_ms = Some(remaining - elapsed_ms);
            }
        }
        expired.sort_by_key(|(remaining, e)| (*remaining, e.id.0));
        expired.into_iter().map(|(_, e)| e).collect()
    }

    /// True if nothing touched the timer since it expired and it was not
    /// suspended in the meantime.
    pub fn is_current(&self, expired: &Expired<O>) -> bool {
        self.slot(expired.id).is_some_and(|s| {
            s.owner.is_some() && s.seq == expired.seq && s.remaining_ms.is_none() && !s.suspended
        })
    }

    fn running(&self) -> impl Iterator<Item = (usize, &TimerSlot<O>)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.owner.is_some() && s.remaining_ms.is_some() && !s.suspended)
    }

    fn slot(&self, id: TimerId) -> Option<&TimerSlot<O>> {
        self.slots.get(id.0).filter(|s| s.owner.is_some())
    }

    fn slot_mut(&mut self, id: TimerId) -> Option<&mut TimerSlot<O>> {
        self.slots.get_mut(id.0).filter(|s| s.owner.is_some())
    }
}
