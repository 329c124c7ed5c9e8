//! The seven operation state machines and the arena that owns them.
//!
//! Operations never reach each other directly. A handler gets its own state
//! plus the shared [`SessionCtx`], returns a [`Step`], and queues any
//! session-wide consequence as an [`Effect`](crate::mqtt_client::context::Effect)
//! for the engine to apply.

pub(crate) mod connect;
pub(crate) mod disconnect;
pub(crate) mod keep_alive;
pub(crate) mod recv;
pub(crate) mod send;
pub(crate) mod subscribe;
pub(crate) mod unsubscribe;

use crate::mqtt_client::context::SessionCtx;
use crate::mqtt_client::error::OpStatus;
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_serde::MqttPacket;

pub(crate) use connect::ConnectOp;
pub(crate) use disconnect::DisconnectOp;
pub(crate) use keep_alive::KeepAliveOp;
pub(crate) use recv::RecvOp;
pub(crate) use send::SendOp;
pub(crate) use subscribe::SubscribeOp;
pub(crate) use unsubscribe::UnsubscribeOp;

/// Stable, generation-checked identity of a live operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId {
    index: usize,
    generation: u32,
}

#[cfg(test)]
impl OpId {
    pub(crate) fn for_test(index: usize) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OpKind {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Send,
    Recv,
    KeepAlive,
}

impl OpKind {
    const COUNT: usize = 7;

    fn slot(self) -> usize {
        self as usize
    }

    /// Send and Receive operations outlive a disconnect.
    pub fn survives_disconnect(self) -> bool {
        matches!(self, OpKind::Send | OpKind::Recv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Response,
    Ping,
    RecvWatchdog,
    PingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerOwner {
    pub op: OpId,
    pub kind: TimerKind,
}

/// Outcome of running an operation handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Complete(OpStatus),
}

pub(crate) enum Op {
    Connect(ConnectOp),
    Disconnect(DisconnectOp),
    Subscribe(SubscribeOp),
    Unsubscribe(UnsubscribeOp),
    Send(SendOp),
    Recv(RecvOp),
    KeepAlive(KeepAliveOp),
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Connect(_) => OpKind::Connect,
            Op::Disconnect(_) => OpKind::Disconnect,
            Op::Subscribe(_) => OpKind::Subscribe,
            Op::Unsubscribe(_) => OpKind::Unsubscribe,
            Op::Send(_) => OpKind::Send,
            Op::Recv(_) => OpKind::Recv,
            Op::KeepAlive(_) => OpKind::KeepAlive,
        }
    }

    pub fn timers(&self) -> Vec<TimerId> {
        match self {
            Op::Connect(op) => vec![op.timer],
            Op::Disconnect(_) => Vec::new(),
            Op::Subscribe(op) => vec![op.timer],
            Op::Unsubscribe(op) => vec![op.timer],
            Op::Send(op) => vec![op.timer],
            Op::Recv(op) => vec![op.timer],
            Op::KeepAlive(op) => vec![op.ping_timer, op.recv_timer, op.resp_timer],
        }
    }

    /// Client-allocated packet identifier held by the operation.
    pub fn owned_packet_id(&self) -> Option<u16> {
        match self {
            Op::Subscribe(op) => op.packet_id,
            Op::Unsubscribe(op) => op.packet_id,
            Op::Send(op) => op.packet_id(),
            _ => None,
        }
    }

    pub fn response_timeout(&self) -> Option<u32> {
        match self {
            Op::Connect(op) => Some(op.response_timeout_ms),
            Op::Subscribe(op) => Some(op.response_timeout_ms),
            Op::Unsubscribe(op) => Some(op.response_timeout_ms),
            Op::Send(op) => Some(op.response_timeout_ms),
            Op::Recv(op) => Some(op.response_timeout_ms),
            Op::Disconnect(_) | Op::KeepAlive(_) => None,
        }
    }

    pub fn set_response_timeout(&mut self, ms: u32) -> bool {
        let slot = match self {
            Op::Connect(op) => &mut op.response_timeout_ms,
            Op::Subscribe(op) => &mut op.response_timeout_ms,
            Op::Unsubscribe(op) => &mut op.response_timeout_ms,
            Op::Send(op) => &mut op.response_timeout_ms,
            Op::Recv(op) => &mut op.response_timeout_ms,
            Op::Disconnect(_) | Op::KeepAlive(_) => return false,
        };
        *slot = ms;
        true
    }

    /// Handles a CONNACK, SUBACK or UNSUBACK offered to every live operation.
    pub fn handle_broadcast(&mut self, ctx: &mut SessionCtx, packet: &MqttPacket) -> Option<Step> {
        match (self, packet) {
            (Op::Connect(op), MqttPacket::ConnAck(ack)) => op.handle_connack(ctx, ack),
            (Op::Subscribe(op), MqttPacket::SubAck(ack)) => op.handle_suback(ctx, ack),
            (Op::Unsubscribe(op), MqttPacket::UnsubAck(ack)) => op.handle_unsuback(ctx, ack),
            _ => None,
        }
    }

    pub fn on_timer(&mut self, ctx: &mut SessionCtx, kind: TimerKind) -> Step {
        match self {
            Op::Connect(op) => op.on_timeout(),
            Op::Subscribe(op) => op.on_timeout(),
            Op::Unsubscribe(op) => op.on_timeout(),
            Op::Send(op) => op.on_timeout(ctx),
            Op::Recv(op) => op.on_timeout(ctx),
            Op::KeepAlive(op) => op.on_timer(ctx, kind),
            Op::Disconnect(_) => Step::Continue,
        }
    }

    /// Lets an operation that survived a disconnect react to it.
    pub fn connectivity_changed(&mut self, ctx: &mut SessionCtx) {
        match self {
            Op::Send(op) => op.connectivity_changed(ctx),
            Op::Recv(op) => op.connectivity_changed(ctx),
            _ => {}
        }
    }
}

/// Typed access to one variant of [`Op`].
pub(crate) trait OpVariant {
    fn downcast(op: &mut Op) -> Option<&mut Self>;
}

macro_rules! op_variant {
    ($ty:ty, $variant:ident) => {
        impl OpVariant for $ty {
            fn downcast(op: &mut Op) -> Option<&mut Self> {
                match op {
                    Op::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

op_variant!(ConnectOp, Connect);
op_variant!(DisconnectOp, Disconnect);
op_variant!(SubscribeOp, Subscribe);
op_variant!(UnsubscribeOp, Unsubscribe);
op_variant!(SendOp, Send);
op_variant!(RecvOp, Recv);
op_variant!(KeepAliveOp, KeepAlive);

struct ArenaSlot {
    generation: u32,
    op: Option<Op>,
}

/// Owner of every live operation.
///
/// Slots are generation checked, so a handle to a finished operation never
/// reaches a newer one stored in the same slot. Dispatch order is kept in a
/// separate list; removal only tombstones the entry, and tombstones are
/// dropped by [`OpArena::compact`] once no dispatch loop can be running.
#[derive(Default)]
pub(crate) struct OpArena {
    slots: Vec<ArenaSlot>,
    free: Vec<usize>,
    order: Vec<Option<OpId>>,
    counts: [usize; OpKind::COUNT],
}

impl OpArena {
    /// Id the next [`OpArena::insert`] will use.
    pub fn next_id(&self) -> OpId {
        match self.free.last() {
            Some(&index) => OpId {
                index,
                generation: self.slots[index].generation,
            },
            None => OpId {
                index: self.slots.len(),
                generation: 0,
            },
        }
    }

    pub fn insert(&mut self, op: Op) -> OpId {
        let id = self.next_id();
        if self.free.pop().is_none() {
            self.slots.push(ArenaSlot {
                generation: 0,
                op: None,
            });
        }
        self.counts[op.kind().slot()] += 1;
        self.slots[id.index].op = Some(op);
        self.order.push(Some(id));
        id
    }

    pub fn get(&self, id: OpId) -> Option<&Op> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.op.as_ref())
    }

    pub fn get_mut(&mut self, id: OpId) -> Option<&mut Op> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.op.as_mut())
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.get(id).is_some()
    }

    pub fn kind_of(&self, id: OpId) -> Option<OpKind> {
        self.get(id).map(Op::kind)
    }

    /// Detaches the operation. Its order entry becomes a tombstone.
    pub fn remove(&mut self, id: OpId) -> Option<Op> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let op = slot.op.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.counts[op.kind().slot()] -= 1;
        if let Some(entry) = self.order.iter_mut().find(|e| **e == Some(id)) {
            *entry = None;
        }
        Some(op)
    }

    /// Drops tombstones from the dispatch order.
    pub fn compact(&mut self) {
        self.order.retain(Option::is_some);
    }

    /// Length of the dispatch order, tombstones included.
    pub fn order_len(&self) -> usize {
        self.order.len()
    }

    /// Live operation at dispatch position `idx`.
    pub fn id_at(&self, idx: usize) -> Option<OpId> {
        self.order.get(idx).copied().flatten()
    }

    #[cfg(test)]
    pub fn position(&self, id: OpId) -> Option<usize> {
        self.order.iter().position(|e| *e == Some(id))
    }

    /// Live operations in dispatch order.
    pub fn ids(&self) -> Vec<OpId> {
        self.order.iter().flatten().copied().collect()
    }

    pub fn ids_of(&self, kind: OpKind) -> Vec<OpId> {
        self.order
            .iter()
            .flatten()
            .copied()
            .filter(|id| self.kind_of(*id) == Some(kind))
            .collect()
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.counts[kind.slot()]
    }

    pub fn len(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn disconnect_op() -> Op {
        Op::Disconnect(DisconnectOp::default())
    }

    #[test]
    fn test_arena_generation_check() {
        let mut arena = OpArena::default();
        let first = arena.insert(disconnect_op());
        assert!(arena.contains(first));
        assert!(arena.remove(first).is_some());
        assert!(!arena.contains(first));
        assert!(arena.remove(first).is_none());

        let second = arena.insert(disconnect_op());
        // same slot, new generation
        assert_eq!(second.index, first.index);
        assert_ne!(second, first);
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
    }

    #[test]
    fn test_arena_tombstones_until_compact() {
        let mut arena = OpArena::default();
        let a = arena.insert(disconnect_op());
        let b = arena.insert(disconnect_op());
        let c = arena.insert(disconnect_op());
        arena.remove(b);
        assert_eq!(arena.order_len(), 3);
        assert_eq!(arena.id_at(1), None);
        assert_eq!(arena.ids(), vec![a, c]);
        assert_eq!(arena.count(OpKind::Disconnect), 2);

        arena.compact();
        assert_eq!(arena.order_len(), 2);
        assert_eq!(arena.id_at(1), Some(c));
        assert_eq!(arena.position(c), Some(1));
    }

    #[test]
    fn test_next_id_predicts_insert() {
        let mut arena = OpArena::default();
        let predicted = arena.next_id();
        assert_eq!(arena.insert(disconnect_op()), predicted);
        arena.remove(predicted);
        let predicted = arena.next_id();
        assert_eq!(arena.insert(disconnect_op()), predicted);
        assert_eq!(arena.len(), 1);
    }
}
