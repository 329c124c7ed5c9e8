// SPDX-License-Identifier: MPL-2.0

use std::ops::{Deref, DerefMut};

use tracing::{debug, trace};

use super::commands::{
    ConnectConfig, ConnectResponse, MessageInfo, PublishConfig, QoS, SubscribeResponse, SubscribeTopicConfig,
    WillConfig,
};
use super::context::{Effect, SessionCtx};
use super::error::{BrokerDisconnectReason, MqttClientError, MqttClientResult, OpStatus};
use super::ops::{
    ConnectOp, DisconnectOp, KeepAliveOp, Op, OpArena, OpId, OpKind, OpVariant, RecvOp, SendOp, Step, SubscribeOp,
    TimerKind, TimerOwner, UnsubscribeOp,
};
use super::opts::{ClientConfig, OpLimits, PublishOrdering};
use super::timer::TimerId;
use crate::mqtt_serde::mqttv3::MqttPublish;
use crate::mqtt_serde::parser::ParseOk;
use crate::mqtt_serde::{ControlPacketType, FrameCodec, Mqtt311Codec, MqttPacket};
use crate::mqtt_session::{SessionState, SubscriptionFilters};

/// Connect completion: status and, with `OpStatus::Complete`, the CONNACK.
pub type ConnectCompleteFn = Box<dyn FnOnce(&mut MqttEngine, OpStatus, Option<&ConnectResponse>)>;
pub type SubscribeCompleteFn =
    Box<dyn FnOnce(&mut MqttEngine, SubscribeHandle, OpStatus, Option<&SubscribeResponse>)>;
pub type UnsubscribeCompleteFn = Box<dyn FnOnce(&mut MqttEngine, UnsubscribeHandle, OpStatus)>;
pub type PublishCompleteFn = Box<dyn FnOnce(&mut MqttEngine, PublishHandle, OpStatus)>;
pub type BrokerDisconnectReportFn = Box<dyn FnMut(&mut MqttEngine, BrokerDisconnectReason)>;
pub type MessageReceivedFn = Box<dyn FnMut(&mut MqttEngine, &MessageInfo<'_>)>;

/// Typed reference to a live operation.
pub trait OpHandle: Copy {
    fn op_id(self) -> OpId;
}

macro_rules! op_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(OpId);

        impl OpHandle for $name {
            fn op_id(self) -> OpId {
                self.0
            }
        }
    };
}

op_handle!(ConnectHandle);
op_handle!(DisconnectHandle);
op_handle!(SubscribeHandle);
op_handle!(UnsubscribeHandle);
op_handle!(
    /// Outgoing publish.
    PublishHandle
);

/// A "Sans-I/O" MQTT v3.1.1 client protocol engine.
///
/// The engine owns no socket and no clock. It is driven by three inputs and
/// answers through callbacks:
///
/// - **Input**:
///     - Bytes received from the network (`process_data`).
///     - Elapsed time (`tick`), with the next wake-up requested through the
///       next-tick-program callback.
///     - Operation requests: `*_prepare`, `*_config*`, `*_send`, `*_cancel`.
/// - **Output**:
///     - Bytes to write, handed to the send-output callback as soon as they
///       are produced.
///     - Completion callbacks of each operation, broker-disconnect reports
///       and received messages.
///
/// Only one operation may be prepared (created but not yet sent or
/// cancelled) at a time.
///
/// Every callback that receives `&mut MqttEngine` may issue new requests;
/// bookkeeping that must not run while a dispatch loop is active is
/// deferred to the outermost return.
pub struct MqttEngine {
    ops: OpArena,
    ctx: SessionCtx,
    prepared: Option<OpId>,
    api_depth: u32,
    resuming: bool,
    resume_again: bool,
    broker_disconnect_report: Option<BrokerDisconnectReportFn>,
    message_received: Option<MessageReceivedFn>,
}

/// Tracks public-API nesting. The outermost guard drops tombstoned
/// operations and reprograms the next wake-up on exit.
struct ApiGuard<'a> {
    engine: &'a mut MqttEngine,
}

impl<'a> ApiGuard<'a> {
    fn enter(engine: &'a mut MqttEngine) -> Self {
        engine.api_depth += 1;
        if engine.api_depth == 1 {
            engine.catch_up_elapsed();
        }
        Self { engine }
    }

    /// Entry for `tick`, which reports elapsed time itself.
    fn enter_tick(engine: &'a mut MqttEngine) -> Self {
        engine.api_depth += 1;
        Self { engine }
    }
}

impl Deref for ApiGuard<'_> {
    type Target = MqttEngine;

    fn deref(&self) -> &MqttEngine {
        self.engine
    }
}

impl DerefMut for ApiGuard<'_> {
    fn deref_mut(&mut self) -> &mut MqttEngine {
        self.engine
    }
}

impl Drop for ApiGuard<'_> {
    fn drop(&mut self) {
        self.engine.api_depth -= 1;
        if self.engine.api_depth == 0 {
            self.engine.ops.compact();
            self.engine.program_next_tick();
        }
    }
}

fn op_limit(limits: &OpLimits, kind: OpKind) -> Option<usize> {
    match kind {
        OpKind::Connect => limits.connect,
        OpKind::Disconnect => limits.disconnect,
        OpKind::Subscribe => limits.subscribe,
        OpKind::Unsubscribe => limits.unsubscribe,
        OpKind::Send => limits.send,
        OpKind::Recv => limits.recv,
        OpKind::KeepAlive => limits.keep_alive,
    }
}

impl MqttEngine {
    /// Creates an engine using the built-in v3.1.1 codec.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_codec(config, Box::new(Mqtt311Codec))
    }

    pub fn with_codec(config: ClientConfig, codec: Box<dyn FrameCodec>) -> Self {
        Self {
            ops: OpArena::default(),
            ctx: SessionCtx::new(config, codec),
            prepared: None,
            api_depth: 0,
            resuming: false,
            resume_again: false,
            broker_disconnect_report: None,
            message_received: None,
        }
    }

    // ---- callback registration ----

    pub fn set_send_output_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.ctx.sinks.send_output = Some(Box::new(cb));
    }

    /// Requests a call to [`MqttEngine::tick`] after the given milliseconds.
    pub fn set_next_tick_program_callback<F>(&mut self, cb: F)
    where
        F: FnMut(u32) + 'static,
    {
        self.ctx.sinks.next_tick_program = Some(Box::new(cb));
    }

    /// Cancels the programmed wait and reports the milliseconds that have
    /// elapsed since it was programmed.
    pub fn set_cancel_next_tick_wait_callback<F>(&mut self, cb: F)
    where
        F: FnMut() -> u32 + 'static,
    {
        self.ctx.sinks.cancel_next_tick_wait = Some(Box::new(cb));
    }

    pub fn set_broker_disconnect_report_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&mut MqttEngine, BrokerDisconnectReason) + 'static,
    {
        self.broker_disconnect_report = Some(Box::new(cb));
    }

    /// Receives every inbound application message. The borrowed data is
    /// only valid for the duration of the call.
    pub fn set_message_received_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&mut MqttEngine, &MessageInfo<'_>) + 'static,
    {
        self.message_received = Some(Box::new(cb));
    }

    pub fn set_error_log_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&str) + 'static,
    {
        self.ctx.sinks.error_log = Some(Box::new(cb));
    }

    // ---- driving inputs ----

    /// Reports `ms` milliseconds of elapsed time and fires expired timers.
    pub fn tick(&mut self, ms: u32) {
        let mut this = ApiGuard::enter_tick(self);
        this.advance_time(ms);
    }

    /// Consumes complete frames from `buf` and returns how many bytes were
    /// used. The caller keeps the rest and presents it again, with more
    /// data appended, on the next call.
    pub fn process_data(&mut self, buf: &[u8]) -> usize {
        let mut this = ApiGuard::enter(self);
        this.process_data_impl(buf)
    }

    /// Reports that the transport lost the link.
    pub fn notify_network_disconnected(&mut self) {
        let mut this = ApiGuard::enter(self);
        this.ctx.client.network_disconnected = true;
        if this.ctx.session.disconnecting {
            return;
        }
        this.broker_disconnected(None, OpStatus::BrokerDisconnected);
    }

    pub fn is_network_disconnected(&self) -> bool {
        self.ctx.client.network_disconnected
    }

    // ---- connect ----

    pub fn connect_prepare(&mut self) -> MqttClientResult<ConnectHandle> {
        let mut this = ApiGuard::enter(self);
        this.connect_prepare_impl()
    }

    pub fn connect_config(&mut self, handle: ConnectHandle, config: ConnectConfig) -> MqttClientResult<()> {
        let (op, ctx) = self.op_mut::<ConnectOp>(handle.0)?;
        op.configure(ctx, config)
    }

    pub fn connect_config_will(&mut self, handle: ConnectHandle, will: WillConfig) -> MqttClientResult<()> {
        let (op, ctx) = self.op_mut::<ConnectOp>(handle.0)?;
        op.configure_will(ctx, will)
    }

    pub fn connect_send<F>(&mut self, handle: ConnectHandle, cb: F) -> MqttClientResult<()>
    where
        F: FnOnce(&mut MqttEngine, OpStatus, Option<&ConnectResponse>) + 'static,
    {
        let mut this = ApiGuard::enter(self);
        let id = handle.0;
        this.release_prepared(id)?;
        let result = this.op_mut::<ConnectOp>(id).and_then(|(op, ctx)| {
            op.callback = Some(Box::new(cb));
            op.send(ctx)
        });
        this.settle_send(id, result.map(|()| Step::Continue))
    }

    pub fn connect_cancel(&mut self, handle: ConnectHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        this.cancel_op(handle.0, OpKind::Connect)
    }

    // ---- disconnect ----

    pub fn disconnect_prepare(&mut self) -> MqttClientResult<DisconnectHandle> {
        let mut this = ApiGuard::enter(self);
        if !this.ctx.session.connected {
            return this.refuse(MqttClientError::NotConnected, "Client must be connected to allow disconnection");
        }
        if this.ops.count(OpKind::Disconnect) > 0 {
            return this.refuse(MqttClientError::Busy, "Another disconnect operation is in progress");
        }
        this.check_session_usable()?;
        let id = this.prepare_common(OpKind::Disconnect, &[])?.0;
        this.ops.insert(Op::Disconnect(DisconnectOp));
        Ok(DisconnectHandle(id))
    }

    pub fn disconnect_send(&mut self, handle: DisconnectHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        let id = handle.0;
        this.release_prepared(id)?;
        let result = this.op_mut::<DisconnectOp>(id).and_then(|(op, ctx)| op.send(ctx));
        this.settle_send(id, result)
    }

    pub fn disconnect_cancel(&mut self, handle: DisconnectHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        this.cancel_op(handle.0, OpKind::Disconnect)
    }

    // ---- subscribe ----

    pub fn subscribe_prepare(&mut self) -> MqttClientResult<SubscribeHandle> {
        let mut this = ApiGuard::enter(self);
        this.check_connected_session("subscription")?;
        let (id, timers) = this.prepare_common(OpKind::Subscribe, &[TimerKind::Response])?;
        let timeout = this.ctx.config.response_timeout_ms;
        this.ops.insert(Op::Subscribe(SubscribeOp::new(timers[0], timeout)));
        Ok(SubscribeHandle(id))
    }

    pub fn subscribe_config_topic(
        &mut self,
        handle: SubscribeHandle,
        config: SubscribeTopicConfig,
    ) -> MqttClientResult<()> {
        let (op, ctx) = self.op_mut::<SubscribeOp>(handle.0)?;
        op.config_topic(ctx, config)
    }

    pub fn subscribe_send<F>(&mut self, handle: SubscribeHandle, cb: F) -> MqttClientResult<()>
    where
        F: FnOnce(&mut MqttEngine, SubscribeHandle, OpStatus, Option<&SubscribeResponse>) + 'static,
    {
        let mut this = ApiGuard::enter(self);
        let id = handle.0;
        this.release_prepared(id)?;
        let result = this.op_mut::<SubscribeOp>(id).and_then(|(op, ctx)| {
            op.callback = Some(Box::new(cb));
            op.send(ctx)
        });
        this.settle_send(id, result.map(|()| Step::Continue))
    }

    pub fn subscribe_cancel(&mut self, handle: SubscribeHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        this.cancel_op(handle.0, OpKind::Subscribe)
    }

    // ---- unsubscribe ----

    pub fn unsubscribe_prepare(&mut self) -> MqttClientResult<UnsubscribeHandle> {
        let mut this = ApiGuard::enter(self);
        this.check_connected_session("unsubscription")?;
        let (id, timers) = this.prepare_common(OpKind::Unsubscribe, &[TimerKind::Response])?;
        let timeout = this.ctx.config.response_timeout_ms;
        this.ops
            .insert(Op::Unsubscribe(UnsubscribeOp::new(timers[0], timeout)));
        Ok(UnsubscribeHandle(id))
    }

    pub fn unsubscribe_config_topic(&mut self, handle: UnsubscribeHandle, filter: &str) -> MqttClientResult<()> {
        let (op, ctx) = self.op_mut::<UnsubscribeOp>(handle.0)?;
        op.config_topic(ctx, filter)
    }

    pub fn unsubscribe_send<F>(&mut self, handle: UnsubscribeHandle, cb: F) -> MqttClientResult<()>
    where
        F: FnOnce(&mut MqttEngine, UnsubscribeHandle, OpStatus) + 'static,
    {
        let mut this = ApiGuard::enter(self);
        let id = handle.0;
        this.release_prepared(id)?;
        let result = this.op_mut::<UnsubscribeOp>(id).and_then(|(op, ctx)| {
            op.callback = Some(Box::new(cb));
            op.send(ctx)
        });
        this.settle_send(id, result.map(|()| Step::Continue))
    }

    pub fn unsubscribe_cancel(&mut self, handle: UnsubscribeHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        this.cancel_op(handle.0, OpKind::Unsubscribe)
    }

    // ---- publish ----

    pub fn publish_prepare(&mut self) -> MqttClientResult<PublishHandle> {
        let mut this = ApiGuard::enter(self);
        this.check_connected_session("publish")?;
        let (id, timers) = this.prepare_common(OpKind::Send, &[TimerKind::Response])?;
        let config = &this.ctx.config;
        let op = SendOp::new(timers[0], config.resend_attempts, config.response_timeout_ms);
        this.ops.insert(Op::Send(op));
        Ok(PublishHandle(id))
    }

    pub fn publish_config(&mut self, handle: PublishHandle, config: PublishConfig) -> MqttClientResult<()> {
        let (op, ctx) = self.op_mut::<SendOp>(handle.0)?;
        op.configure(ctx, config)
    }

    /// Sets how many times the publish may be retransmitted after a
    /// response timeout. Zero is rejected.
    pub fn publish_set_resend_attempts(&mut self, handle: PublishHandle, attempts: u32) -> MqttClientResult<()> {
        let (op, _) = self.op_mut::<SendOp>(handle.0)?;
        op.set_resend_attempts(attempts)
    }

    pub fn publish_resend_attempts(&self, handle: PublishHandle) -> MqttClientResult<u32> {
        match self.ops.get(handle.0) {
            Some(Op::Send(op)) => Ok(op.resend_attempts()),
            _ => Err(MqttClientError::BadParam),
        }
    }

    /// Sends without a completion callback.
    pub fn publish_send(&mut self, handle: PublishHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        this.publish_send_impl(handle.0, None)
    }

    pub fn publish_send_with_callback<F>(&mut self, handle: PublishHandle, cb: F) -> MqttClientResult<()>
    where
        F: FnOnce(&mut MqttEngine, PublishHandle, OpStatus) + 'static,
    {
        let mut this = ApiGuard::enter(self);
        this.publish_send_impl(handle.0, Some(Box::new(cb)))
    }

    pub fn publish_cancel(&mut self, handle: PublishHandle) -> MqttClientResult<()> {
        let mut this = ApiGuard::enter(self);
        this.cancel_op(handle.0, OpKind::Send)
    }

    /// True once the first PUBLISH went out; false while ordering keeps the
    /// publish paused and after it completed.
    pub fn publish_was_initiated(&self, handle: PublishHandle) -> bool {
        matches!(self.ops.get(handle.0), Some(Op::Send(op)) if op.is_published())
    }

    // ---- per-operation and session settings ----

    pub fn set_response_timeout<H: OpHandle>(&mut self, handle: H, ms: u32) -> MqttClientResult<()> {
        let applied = self
            .ops
            .get_mut(handle.op_id())
            .is_some_and(|op| op.set_response_timeout(ms));
        if applied {
            Ok(())
        } else {
            Err(MqttClientError::BadParam)
        }
    }

    pub fn response_timeout<H: OpHandle>(&self, handle: H) -> MqttClientResult<u32> {
        self.ops
            .get(handle.op_id())
            .and_then(Op::response_timeout)
            .ok_or(MqttClientError::BadParam)
    }

    /// Response timeout given to operations prepared from now on.
    pub fn set_default_response_timeout(&mut self, ms: u32) {
        self.ctx.config.response_timeout_ms = ms;
    }

    pub fn default_response_timeout(&self) -> u32 {
        self.ctx.config.response_timeout_ms
    }

    pub fn set_publish_ordering(&mut self, ordering: PublishOrdering) {
        self.ctx.config.publish_ordering = ordering;
    }

    pub fn publish_ordering(&self) -> PublishOrdering {
        self.ctx.config.publish_ordering
    }

    pub fn set_verify_outgoing_topic(&mut self, verify: bool) {
        self.ctx.config.verify_outgoing_topic = verify;
    }

    pub fn set_verify_incoming_topic(&mut self, verify: bool) {
        self.ctx.config.verify_incoming_topic = verify;
    }

    pub fn set_verify_subscription_filter(&mut self, verify: bool) {
        self.ctx.config.verify_subscription_filter = verify;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.session.connected
    }

    /// Live publish operations, paused ones included.
    pub fn sends_in_flight(&self) -> usize {
        self.ops.count(OpKind::Send)
    }

    pub fn has_keep_alive(&self) -> bool {
        self.ops.count(OpKind::KeepAlive) > 0
    }

    pub fn subscription_filters(&self) -> &SubscriptionFilters {
        &self.ctx.filters
    }

    // ---- request helpers ----

    fn refuse<T>(&mut self, error: MqttClientError, msg: &str) -> MqttClientResult<T> {
        self.ctx.log_error(msg);
        Err(error)
    }

    fn check_session_usable(&mut self) -> MqttClientResult<()> {
        if self.ctx.session.disconnecting {
            return self.refuse(MqttClientError::Disconnecting, "Session disconnection is in progress");
        }
        if self.ctx.client.network_disconnected {
            return self.refuse(MqttClientError::NetworkDisconnected, "Network is disconnected");
        }
        Ok(())
    }

    fn check_connected_session(&mut self, what: &str) -> MqttClientResult<()> {
        if !self.ctx.session.connected {
            return self.refuse(
                MqttClientError::NotConnected,
                &format!("Client must be connected to allow {what}"),
            );
        }
        self.check_session_usable()
    }

    /// Shared tail of every prepare: global cap, preparation lock, pool and
    /// timers. On success the returned id is locked as the prepared op and
    /// the caller must insert it.
    fn prepare_common(&mut self, kind: OpKind, timer_kinds: &[TimerKind]) -> MqttClientResult<(OpId, Vec<TimerId>)> {
        if self.ctx.config.max_ops.is_some_and(|max| self.ops.len() >= max) {
            return self.refuse(
                MqttClientError::RetryLater,
                &format!("Cannot start {kind:?} operation, retry in next event loop iteration"),
            );
        }
        if self.prepared.is_some() {
            return self.refuse(
                MqttClientError::PreparationLocked,
                &format!("Another operation is being prepared, cannot prepare {kind:?}"),
            );
        }
        if op_limit(&self.ctx.config.op_limits, kind).is_some_and(|max| self.ops.count(kind) >= max) {
            return self.refuse(
                MqttClientError::OutOfMemory,
                &format!("Cannot allocate new {kind:?} operation"),
            );
        }
        let id = self.ops.next_id();
        let timers = self.alloc_timers(id, timer_kinds)?;
        self.prepared = Some(id);
        Ok((id, timers))
    }

    fn alloc_timers(&mut self, op: OpId, kinds: &[TimerKind]) -> MqttClientResult<Vec<TimerId>> {
        let mut timers = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            match self.ctx.timers.alloc(TimerOwner { op, kind }) {
                Some(timer) => timers.push(timer),
                None => {
                    for timer in timers {
                        self.ctx.timers.free(timer);
                    }
                    return self.refuse(
                        MqttClientError::OutOfMemory,
                        "The library cannot allocate required number of timers",
                    );
                }
            }
        }
        Ok(timers)
    }

    fn op_mut<T: OpVariant>(&mut self, id: OpId) -> MqttClientResult<(&mut T, &mut SessionCtx)> {
        let op = self
            .ops
            .get_mut(id)
            .and_then(T::downcast)
            .ok_or(MqttClientError::BadParam)?;
        Ok((op, &mut self.ctx))
    }

    /// Releases the preparation lock held by `id`.
    fn release_prepared(&mut self, id: OpId) -> MqttClientResult<()> {
        if self.prepared != Some(id) {
            return self.refuse(MqttClientError::BadParam, "Operation is not the prepared one");
        }
        self.prepared = None;
        Ok(())
    }

    /// Outcome of a `*_send` request. A failed request destroys the
    /// operation without invoking its callback.
    fn settle_send(&mut self, id: OpId, result: MqttClientResult<Step>) -> MqttClientResult<()> {
        match result {
            Ok(step) => {
                self.after_step(id, step);
                Ok(())
            }
            Err(e) => {
                self.detach(id);
                Err(e)
            }
        }
    }

    fn cancel_op(&mut self, id: OpId, kind: OpKind) -> MqttClientResult<()> {
        if self.ops.kind_of(id) != Some(kind) {
            return Err(MqttClientError::BadParam);
        }
        debug!(?kind, "operation cancelled");
        self.detach(id);
        if kind == OpKind::Send {
            self.resume_paused_sends();
        }
        Ok(())
    }

    fn connect_prepare_impl(&mut self) -> MqttClientResult<ConnectHandle> {
        self.ctx.client.network_disconnected = false;
        if !self.ctx.client.initialized {
            if self.api_depth > 1 {
                return self.refuse(MqttClientError::RetryLater, "Cannot prepare connect from within callback");
            }
            self.init()?;
        }
        if self.ops.count(OpKind::Connect) > 0 {
            return self.refuse(MqttClientError::Busy, "Another connect operation is in progress");
        }
        if self.ctx.session.disconnecting {
            return self.refuse(
                MqttClientError::Disconnecting,
                "Session disconnection is in progress, cannot initiate connection",
            );
        }
        if self.ctx.session.connected {
            return self.refuse(MqttClientError::AlreadyConnected, "Client is already connected");
        }
        let (id, timers) = self.prepare_common(OpKind::Connect, &[TimerKind::Response])?;
        let timeout = self.ctx.config.response_timeout_ms;
        self.ops.insert(Op::Connect(ConnectOp::new(timers[0], timeout)));
        Ok(ConnectHandle(id))
    }

    fn init(&mut self) -> MqttClientResult<()> {
        let sinks = &self.ctx.sinks;
        let has_required =
            sinks.send_output.is_some() && self.broker_disconnect_report.is_some() && self.message_received.is_some();
        let timer_cbs_paired = sinks.next_tick_program.is_some() == sinks.cancel_next_tick_wait.is_some();
        if !has_required {
            return self.refuse(MqttClientError::NotInitialized, "Hasn't set all must have callbacks");
        }
        if !timer_cbs_paired {
            return self.refuse(MqttClientError::NotInitialized, "Hasn't set all timer management callbacks");
        }
        self.terminate_ops(OpStatus::Aborted, true);
        self.ctx.session = SessionState::default();
        self.ctx.client.initialized = true;
        debug!("client initialized");
        Ok(())
    }

    fn publish_send_impl(&mut self, id: OpId, cb: Option<PublishCompleteFn>) -> MqttClientResult<()> {
        self.release_prepared(id)?;
        let may_transmit = self.can_send(id);
        let result = self.op_mut::<SendOp>(id).and_then(|(op, ctx)| {
            op.callback = cb;
            op.send(ctx, may_transmit)
        });
        self.settle_send(id, result)
    }

    /// Publish ordering: with `Full`, a publish waits behind any earlier
    /// handed-over publish that is paused or has a higher QoS.
    fn can_send(&self, id: OpId) -> bool {
        if self.ctx.config.publish_ordering == PublishOrdering::SameQos {
            return true;
        }
        let qos = match self.ops.get(id) {
            Some(Op::Send(op)) => op.qos(),
            _ => return false,
        };
        self.ops
            .ids_of(OpKind::Send)
            .into_iter()
            .take_while(|other| *other != id)
            .all(|other| match self.ops.get(other) {
                Some(Op::Send(op)) => !op.is_sent() || (!op.is_paused() && op.qos() <= qos),
                _ => true,
            })
    }

    // ---- completion ----

    /// Detaches an operation without notifying anyone.
    fn detach(&mut self, id: OpId) -> Option<Op> {
        let op = self.ops.remove(id)?;
        for timer in op.timers() {
            self.ctx.timers.free(timer);
        }
        if let Some(packet_id) = op.owned_packet_id() {
            self.ctx.packet_ids.release(packet_id);
        }
        if op.kind() == OpKind::KeepAlive {
            self.ctx.ping_timer = None;
        }
        if self.prepared == Some(id) {
            self.prepared = None;
        }
        Some(op)
    }

    fn after_step(&mut self, id: OpId, step: Step) {
        match step {
            Step::Continue => self.apply_effects(),
            Step::Complete(status) => self.finish_op(id, status),
        }
    }

    /// Completes an operation: detach, apply its effects, then notify.
    fn finish_op(&mut self, id: OpId, status: OpStatus) {
        let Some(op) = self.detach(id) else {
            return;
        };
        let kind = op.kind();
        debug!(?kind, ?status, "operation complete");
        self.apply_effects();
        self.notify_complete(id, op, status);
        if kind == OpKind::Send {
            self.resume_paused_sends();
        }
    }

    fn notify_complete(&mut self, id: OpId, op: Op, status: OpStatus) {
        match op {
            Op::Connect(mut op) => {
                if let Some(cb) = op.callback.take() {
                    let response = op.response.take().filter(|_| status.is_complete());
                    cb(self, status, response.as_ref());
                }
            }
            Op::Subscribe(mut op) => {
                if let Some(cb) = op.callback.take() {
                    let response = op.response.take().filter(|_| status.is_complete());
                    cb(self, SubscribeHandle(id), status, response.as_ref());
                }
            }
            Op::Unsubscribe(mut op) => {
                if let Some(cb) = op.callback.take() {
                    cb(self, UnsubscribeHandle(id), status);
                }
            }
            Op::Send(mut op) => {
                if let Some(cb) = op.callback.take() {
                    cb(self, PublishHandle(id), status);
                }
            }
            Op::Disconnect(_) | Op::Recv(_) | Op::KeepAlive(_) => {}
        }
    }

    fn apply_effects(&mut self) {
        while let Some(effect) = self.ctx.pop_effect() {
            match effect {
                Effect::BrokerConnected { session_present } => self.broker_connected(session_present),
                Effect::BrokerDisconnected { reason, status } => {
                    if !self.ctx.session.disconnecting {
                        self.broker_disconnected(reason, status);
                    }
                }
            }
        }
    }

    fn terminate_ops(&mut self, status: OpStatus, keep_send_recv: bool) {
        for id in self.ops.ids() {
            match self.ops.kind_of(id) {
                Some(kind) if keep_send_recv && kind.survives_disconnect() => {}
                Some(_) => self.finish_op(id, status),
                None => {}
            }
        }
    }

    // ---- session transitions ----

    fn broker_connected(&mut self, session_present: bool) {
        debug!(session_present, "broker connected");
        self.ctx.client.first_connect = false;
        self.ctx.session.connected = true;

        if self.ops.count(OpKind::KeepAlive) == 0 {
            self.create_keep_alive();
        }

        if !session_present {
            for id in self.ops.ids() {
                if self.ops.kind_of(id).is_some_and(OpKind::survives_disconnect) {
                    self.finish_op(id, OpStatus::Aborted);
                }
            }
            return;
        }

        for id in self.ops.ids_of(OpKind::Send) {
            if !self.ctx.session.is_usable() {
                return;
            }
            let (op, ctx) = match self.op_mut::<SendOp>(id) {
                Ok(found) => found,
                Err(_) => continue,
            };
            let step = op.post_reconnection_resend(ctx);
            self.after_step(id, step);
        }
        for id in self.ops.ids_of(OpKind::Recv) {
            if let Ok((op, ctx)) = self.op_mut::<RecvOp>(id) {
                op.post_reconnection_resume(ctx);
            }
        }
        self.resume_paused_sends();
    }

    fn create_keep_alive(&mut self) {
        if op_limit(&self.ctx.config.op_limits, OpKind::KeepAlive) == Some(0) {
            self.ctx.log_error("Keep alive operation is disabled by the pool limits");
            return;
        }
        let id = self.ops.next_id();
        let kinds = [TimerKind::Ping, TimerKind::RecvWatchdog, TimerKind::PingResponse];
        let Ok(timers) = self.alloc_timers(id, &kinds) else {
            return;
        };
        let mut op = KeepAliveOp::new(timers[0], timers[1], timers[2]);
        op.start(&mut self.ctx);
        self.ops.insert(Op::KeepAlive(op));
    }

    /// Ends the session. Every operation other than send and receive is
    /// terminated with `status`; a present `reason` is reported.
    fn broker_disconnected(&mut self, reason: Option<BrokerDisconnectReason>, status: OpStatus) {
        debug!(?reason, ?status, "broker disconnected");
        self.ctx.client.initialized = false;
        self.ctx.session.connected = false;
        self.ctx.session.disconnecting = true;

        if let Some(id) = self.prepared.take() {
            self.detach(id);
        }
        self.terminate_ops(status, true);
        for id in self.ops.ids() {
            if let Some(op) = self.ops.get_mut(id) {
                op.connectivity_changed(&mut self.ctx);
            }
        }

        if let Some(reason) = reason {
            if let Some(mut report) = self.broker_disconnect_report.take() {
                report(self, reason);
                if self.broker_disconnect_report.is_none() {
                    self.broker_disconnect_report = Some(report);
                }
            }
        }
    }

    fn resume_paused_sends(&mut self) {
        if self.resuming {
            self.resume_again = true;
            return;
        }
        self.resuming = true;
        loop {
            self.resume_again = false;
            for id in self.ops.ids_of(OpKind::Send) {
                if !self.ctx.session.is_usable() || self.ctx.client.network_disconnected {
                    break;
                }
                let paused = matches!(self.ops.get(id), Some(Op::Send(op)) if op.is_paused());
                if !paused || !self.can_send(id) {
                    continue;
                }
                let step = match self.op_mut::<SendOp>(id) {
                    Ok((op, ctx)) => op.resume(ctx),
                    Err(_) => continue,
                };
                self.after_step(id, step);
            }
            if !self.resume_again {
                break;
            }
        }
        self.resuming = false;
    }

    // ---- time ----

    fn catch_up_elapsed(&mut self) {
        if self.ctx.timers.min_wait().is_none() {
            return;
        }
        let Some(cancel) = self.ctx.sinks.cancel_next_tick_wait.as_mut() else {
            return;
        };
        let elapsed = cancel();
        if elapsed > 0 {
            self.advance_time(elapsed);
        }
    }

    fn program_next_tick(&mut self) {
        let Some(ms) = self.ctx.timers.min_wait() else {
            return;
        };
        if let Some(program) = self.ctx.sinks.next_tick_program.as_mut() {
            program(ms);
        }
    }

    fn advance_time(&mut self, elapsed_ms: u32) {
        for expired in self.ctx.timers.tick(elapsed_ms) {
            if !self.ctx.timers.is_current(&expired) {
                continue;
            }
            let TimerOwner { op: id, kind } = expired.owner;
            let Some(op) = self.ops.get_mut(id) else {
                continue;
            };
            let is_send = op.kind() == OpKind::Send;
            trace!(?kind, "timer expired");
            let step = op.on_timer(&mut self.ctx, kind);
            self.after_step(id, step);
            if is_send && step == Step::Continue && self.ctx.config.publish_ordering == PublishOrdering::Full {
                self.force_resend_after(id);
            }
        }
    }

    /// Under full ordering a retransmission must be followed by every later
    /// in-flight publish again.
    fn force_resend_after(&mut self, id: OpId) {
        let later: Vec<OpId> = self
            .ops
            .ids_of(OpKind::Send)
            .into_iter()
            .skip_while(|other| *other != id)
            .skip(1)
            .collect();
        for other in later {
            if !self.ctx.session.is_usable() {
                return;
            }
            let step = match self.op_mut::<SendOp>(other) {
                Ok((op, ctx)) => op.force_resend(ctx),
                Err(_) => continue,
            };
            self.after_step(other, step);
        }
    }

    // ---- inbound ----

    fn process_data_impl(&mut self, buf: &[u8]) -> usize {
        if self.ctx.client.network_disconnected {
            self.ctx
                .log_error("Incoming data is reported when network is disconnected");
            return 0;
        }
        let mut consumed = 0;
        while consumed < buf.len() {
            let rest = &buf[consumed..];
            match self.ctx.codec_mut().decode(rest) {
                Ok(ParseOk::Packet(packet, used)) => {
                    consumed += used;
                    if self.ctx.session.disconnecting {
                        trace!(packet_type = ?packet.packet_type(), "dropped while disconnecting");
                        continue;
                    }
                    self.dispatch(packet);
                }
                Ok(ParseOk::Continue(..)) => break,
                Err(e) if e.is_incomplete() => break,
                Err(e) => {
                    let shown = &rest[..rest.len().min(32)];
                    self.ctx.log_error(&format!(
                        "Failed to decode inbound data ({e}): {}",
                        hex::encode(shown)
                    ));
                    if !self.ctx.session.disconnecting {
                        self.broker_disconnected(Some(BrokerDisconnectReason::ProtocolError), OpStatus::ProtocolError);
                    }
                    // the stream cannot be resynchronised past a malformed frame
                    return buf.len();
                }
            }
        }
        consumed
    }

    fn dispatch(&mut self, packet: MqttPacket) {
        let packet_type = packet.packet_type();
        trace!(?packet_type, "packet received");
        if !packet_type.is_server_to_client() {
            self.ctx
                .log_error(&format!("Unexpected {packet_type:?} from broker"));
            self.broker_disconnected(Some(BrokerDisconnectReason::ProtocolError), OpStatus::ProtocolError);
            return;
        }

        if let Some(id) = self.ops.ids_of(OpKind::KeepAlive).first().copied() {
            if let Ok((op, ctx)) = self.op_mut::<KeepAliveOp>(id) {
                op.message_received(ctx, &packet);
            }
        }

        match packet {
            MqttPacket::Publish(publish) => self.handle_publish(publish),
            MqttPacket::PubAck(ack) => self.dispatch_send_ack(ack.message_id, packet_type),
            MqttPacket::PubRec(ack) => self.dispatch_send_ack(ack.message_id, packet_type),
            MqttPacket::PubComp(ack) => self.dispatch_send_ack(ack.message_id, packet_type),
            MqttPacket::PubRel(rel) => self.dispatch_pubrel(rel.message_id),
            MqttPacket::PingResp(_) => {}
            other => self.dispatch_broadcast(&other),
        }
    }

    fn find_op(&self, kind: OpKind, pred: impl Fn(&Op) -> bool) -> Option<OpId> {
        self.ops
            .ids_of(kind)
            .into_iter()
            .find(|id| self.ops.get(*id).is_some_and(&pred))
    }

    fn dispatch_send_ack(&mut self, packet_id: u16, ack: ControlPacketType) {
        let target = self.find_op(OpKind::Send, |op| op.owned_packet_id() == Some(packet_id));
        let Some(id) = target else {
            self.ctx
                .log_warn(&format!("{ack:?} for unknown packet id {packet_id}, ignoring"));
            return;
        };
        let (op, ctx) = match self.op_mut::<SendOp>(id) {
            Ok((op, ctx)) if op.is_published() => (op, ctx),
            _ => {
                self.ctx
                    .log_warn(&format!("{ack:?} for unpublished packet id {packet_id}, ignoring"));
                return;
            }
        };
        let step = match ack {
            ControlPacketType::PUBACK => op.handle_puback(ctx),
            ControlPacketType::PUBREC => op.handle_pubrec(ctx),
            _ => op.handle_pubcomp(ctx),
        };
        self.after_step(id, step);
    }

    fn dispatch_pubrel(&mut self, packet_id: u16) {
        let target = self.find_op(OpKind::Recv, |op| matches!(op, Op::Recv(r) if r.packet_id == Some(packet_id)));
        let Some(id) = target else {
            self.ctx
                .log_warn(&format!("PUBREL for unknown packet id {packet_id}, ignoring"));
            return;
        };
        if let Ok((op, ctx)) = self.op_mut::<RecvOp>(id) {
            let step = op.handle_pubrel(ctx);
            self.after_step(id, step);
        }
    }

    /// Offers CONNACK, SUBACK or UNSUBACK to every operation present when the
    /// round started. Operations created during the round are not visited.
    fn dispatch_broadcast(&mut self, packet: &MqttPacket) {
        let count = self.ops.order_len();
        let mut handled = false;
        for idx in 0..count {
            if self.ctx.session.disconnecting {
                break;
            }
            let Some(id) = self.ops.id_at(idx) else {
                continue;
            };
            let ctx = &mut self.ctx;
            let Some(step) = self
                .ops
                .get_mut(id)
                .and_then(|op| op.handle_broadcast(ctx, packet))
            else {
                continue;
            };
            handled = true;
            self.after_step(id, step);
        }
        if !handled {
            self.ctx.log_warn(&format!(
                "Unexpected {:?} with no matching operation, ignoring",
                packet.packet_type()
            ));
        }
    }

    fn handle_publish(&mut self, publish: MqttPublish) {
        if self.ctx.session.disconnecting {
            return;
        }

        if publish.qos == QoS::ExactlyOnce.as_u8() {
            if let Some(packet_id) = publish.message_id {
                let existing =
                    self.find_op(OpKind::Recv, |op| matches!(op, Op::Recv(r) if r.packet_id == Some(packet_id)));
                if let Some(id) = existing {
                    if !publish.dup {
                        self.ctx.log_error(&format!(
                            "Non duplicate PUBLISH reuses packet id {packet_id} of an unfinished exchange"
                        ));
                        self.broker_disconnected(Some(BrokerDisconnectReason::ProtocolError), OpStatus::ProtocolError);
                        return;
                    }
                    if let Ok((op, ctx)) = self.op_mut::<RecvOp>(id) {
                        let step = op.handle_dup_publish(ctx);
                        self.after_step(id, step);
                    }
                    return;
                }
            }
        }

        let Some(id) = self.create_recv_op() else {
            return;
        };
        let rejected = match self.op_mut::<RecvOp>(id) {
            Ok((op, ctx)) => op.accept(ctx, &publish),
            Err(_) => return,
        };
        if let Some(step) = rejected {
            self.after_step(id, step);
            return;
        }

        self.report_message(&publish);

        if !self.ops.contains(id) {
            return;
        }
        if !self.ctx.session.is_usable() || self.ctx.client.network_disconnected {
            self.finish_op(id, OpStatus::Aborted);
            return;
        }
        if let Ok((op, ctx)) = self.op_mut::<RecvOp>(id) {
            let step = op.acknowledge(ctx, &publish);
            self.after_step(id, step);
        }
    }

    fn create_recv_op(&mut self) -> Option<OpId> {
        if op_limit(&self.ctx.config.op_limits, OpKind::Recv).is_some_and(|max| self.ops.count(OpKind::Recv) >= max) {
            self.ctx
                .log_error("Cannot allocate receive operation, ignoring PUBLISH");
            return None;
        }
        let id = self.ops.next_id();
        let timer = self.alloc_timers(id, &[TimerKind::Response]).ok()?[0];
        let timeout = self.ctx.config.response_timeout_ms;
        Some(self.ops.insert(Op::Recv(RecvOp::new(timer, timeout))))
    }

    fn report_message(&mut self, publish: &MqttPublish) {
        let Ok(qos) = QoS::try_from(publish.qos) else {
            return;
        };
        let info = MessageInfo {
            topic: &publish.topic_name,
            data: &publish.payload,
            qos,
            retained: publish.retain,
        };
        if let Some(mut report) = self.message_received.take() {
            report(self, &info);
            if self.message_received.is_none() {
                self.message_received = Some(report);
            }
        }
    }
}

impl Drop for MqttEngine {
    fn drop(&mut self) {
        self.ctx.session.connected = false;
        self.ctx.session.disconnecting = true;
        self.terminate_ops(OpStatus::Aborted, false);
    }
}
