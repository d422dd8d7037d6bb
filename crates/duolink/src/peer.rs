//! # Peer with Async Pump
//!
//! Owns one transport and multiplexes both directions of traffic over it.
//!
//! - **Writer**: drains a FIFO queue so frames leave in submission order.
//! - **Pump**: reads frames. Replies are routed to pending calls by sequence
//!   number. Calls are served on the blocking pool, so user code never stalls
//!   the pump and may itself issue nested outbound calls.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use duopack::Decoder;
use duorpc::CallDecoder;
use duorpc::CallEncoder;
use duorpc::CallKind;
use duorpc::CallResponse;
use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::ObjectRef;
use duorpc::ReplyDecoder;
use duorpc::ReplyErrEncoder;
use duorpc::ReplyOkEncoder;
use duorpc::RpcFrame;
use duorpc::Value;
use duorpc::decode_any_vals;
use duorpc::decode_seq;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::dispatch::Dispatcher;
use crate::dispatch::IncomingCall;
use crate::error::CallError;
use crate::result::CallResult;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Outcome delivered to a waiting `CallResult`.
pub(crate) type Outcome = Result<Vec<Value>, CallError>;

/// Calls awaiting a reply, by sequence number.
pub(crate) type PendingTable = DashMap<u64, oneshot::Sender<Outcome>>;

/// One outbound request.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub kind: CallKind,
    pub target: String,
    pub object: Option<ObjectRef>,
    pub args: Vec<Value>,
}

impl CallRequest {
    pub fn function(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self { kind: CallKind::Function, target: name.into(), object: None, args }
    }

    pub fn method(object: ObjectRef, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self { kind: CallKind::Method, target: name.into(), object: Some(object), args }
    }

    pub fn new_object(class: impl Into<String>, args: Vec<Value>) -> Self {
        Self { kind: CallKind::New, target: class.into(), object: None, args }
    }

    pub fn close(object: ObjectRef) -> Self {
        Self {
            kind: CallKind::Close,
            target: String::new(),
            object: Some(object),
            args: Vec::new(),
        }
    }
}

/// A frame queued for the writer.
enum Outgoing {
    /// Our call. A send failure resolves the pending entry for `seq`.
    Call { seq: u64, payload: Vec<u8> },
    /// Our answer to the other side's call `seq`.
    Reply { seq: u64, payload: Vec<u8> },
}

/// Both directions of one connection.
///
/// Each Peer owns its transport exclusively, so sequence numbers are scoped
/// to a single transport.
pub struct Peer {
    name: Arc<str>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    pending: Arc<PendingTable>,
    seq_gen: AtomicU64,
    closed: Arc<AtomicBool>,
    pump: AbortHandle,
    runtime: Handle,
    call_timeout: Option<Duration>,
}

/// State shared by the pump task and the blocking tasks it spawns.
struct PumpCtx {
    name: Arc<str>,
    pending: Arc<PendingTable>,
    dispatcher: Arc<Dispatcher>,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl Peer {
    /// Takes ownership of the transport and spawns the writer and pump tasks on `runtime`.
    pub fn spawn(
        name: impl Into<Arc<str>>,
        transport: Box<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        runtime: Handle,
        call_timeout: Option<Duration>,
    ) -> Self {
        let name = name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Arc<PendingTable> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (outbound, queue) = mpsc::unbounded_channel();

        runtime.spawn(Self::write_loop(name.clone(), transport.clone(), queue, pending.clone()));

        let ctx = PumpCtx {
            name: name.clone(),
            pending: pending.clone(),
            dispatcher,
            outbound: outbound.clone(),
        };
        let pump = runtime.spawn(Self::pump(ctx, transport, closed.clone())).abort_handle();

        Self {
            name,
            outbound,
            pending,
            seq_gen: AtomicU64::new(1),
            closed,
            pump,
            runtime,
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Whether the pump has stopped. Later submissions fail immediately.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queues one request. Never blocks.
    pub fn submit(&self, request: CallRequest) -> CallResult {
        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);

        let encoded =
            CallEncoder::new(seq, request.kind, &request.target, request.object, &request.args)
                .to_bytes();
        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(peer = %self.name, seq, error = %e, "failed to encode call");
                let outcome = Err(CallError::Encode(e.to_string()));
                return CallResult::resolved(outcome, self.runtime.clone());
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);

        tracing::trace!(
            peer = %self.name,
            seq,
            kind = request.kind.as_tag(),
            target = %request.target,
            "submit"
        );

        // the pump sets `closed` before draining the table, so either it sees
        // this entry or this check sees the flag
        if self.is_closed() {
            let lost = TransportError::ConnectionLost("peer closed".into());
            self.fail_pending(seq, CallError::Transport(lost));
        } else if self.outbound.send(Outgoing::Call { seq, payload }).is_err() {
            self.fail_pending(seq, CallError::ChannelClosed);
        }

        let table = self.pending.clone();
        CallResult::pending(seq, rx, table, self.runtime.clone(), self.call_timeout)
    }

    fn fail_pending(&self, seq: u64, error: CallError) {
        if let Some((_, tx)) = self.pending.remove(&seq) {
            let _ = tx.send(Err(error));
        }
    }

    async fn write_loop(
        name: Arc<str>,
        transport: Arc<dyn Transport>,
        mut queue: mpsc::UnboundedReceiver<Outgoing>,
        pending: Arc<PendingTable>,
    ) {
        while let Some(msg) = queue.recv().await {
            match msg {
                Outgoing::Call { seq, payload } => {
                    let Err(e) = transport.send(&payload).await else { continue };
                    // the caller sees the error; closes from Drop race teardown here
                    tracing::debug!(peer = %name, seq, error = %e, "call not sent");
                    if let Some((_, tx)) = pending.remove(&seq) {
                        let _ = tx.send(Err(CallError::Transport(e)));
                    }
                }
                Outgoing::Reply { seq, payload } => {
                    if let Err(e) = transport.send(&payload).await {
                        Self::report_unsent_reply(&*transport, &name, seq, e).await;
                    }
                }
            }
        }
        tracing::debug!(peer = %name, "writer stopped");
    }

    /// Tells the waiting caller that its reply could not be sent, with one
    /// small failure frame in its place.
    async fn report_unsent_reply(
        transport: &dyn Transport,
        name: &str,
        seq: u64,
        error: TransportError,
    ) {
        if matches!(error, TransportError::ConnectionLost(_)) {
            tracing::debug!(peer = %name, seq, %error, "reply not sent");
            return;
        }
        tracing::warn!(peer = %name, seq, %error, "reply not sent, reporting failure instead");

        let failure = Failure::new(FailureKind::Encode, format!("reply not sent: {}", error));
        let Some(payload) = encode_reply(seq, &Err(failure)) else { return };
        if let Err(e) = transport.send(&payload).await {
            tracing::warn!(peer = %name, seq, error = %e, "failure reply not sent either");
        }
    }

    async fn pump(ctx: PumpCtx, transport: Arc<dyn Transport>, closed: Arc<AtomicBool>) {
        let error = loop {
            match transport.recv().await {
                Ok(Some(msg)) => {
                    if let Err(e) = Self::handle_frame(&ctx, &msg) {
                        tracing::error!(
                            peer = %ctx.name,
                            error = %e,
                            "malformed frame, stopping pump"
                        );
                        break e;
                    }
                }
                Ok(None) => {
                    tracing::debug!(peer = %ctx.name, "stream closed");
                    let lost = TransportError::ConnectionLost("stream closed".into());
                    break CallError::Transport(lost);
                }
                Err(e) => {
                    tracing::warn!(peer = %ctx.name, error = %e, "transport error in pump");
                    break CallError::Transport(e);
                }
            }
        };

        closed.store(true, Ordering::SeqCst);
        Self::notify_all_pending(&ctx.pending, error);
    }

    /// Resolves every pending call with the given error.
    fn notify_all_pending(pending: &PendingTable, error: CallError) {
        let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    fn handle_frame(ctx: &PumpCtx, msg: &[u8]) -> Result<(), CallError> {
        let mut dec = Decoder::new(msg);
        match RpcFrame::decode(&mut dec) {
            Ok(RpcFrame::Reply(reply)) => {
                Self::route_reply(ctx, reply);
                Ok(())
            }
            Ok(RpcFrame::Call(call)) => {
                Self::serve_call(ctx, call);
                Ok(())
            }
            Err(e) => Self::reject_call(ctx, msg, e),
        }
    }

    fn route_reply(ctx: &PumpCtx, reply: ReplyDecoder) {
        let Some((_, tx)) = ctx.pending.remove(&reply.seq) else {
            // cancelled, timed out, or a duplicate
            tracing::debug!(peer = %ctx.name, seq = reply.seq, "reply for unknown call dropped");
            return;
        };

        let outcome = match reply.status {
            Ok(results) => decode_any_vals(results).map_err(|e| CallError::Decode(e.to_string())),
            Err(failure) => Err(CallError::from(failure)),
        };
        tracing::trace!(peer = %ctx.name, seq = reply.seq, ok = outcome.is_ok(), "reply routed");

        // the receiver may have been dropped
        let _ = tx.send(outcome);
    }

    fn serve_call(ctx: &PumpCtx, call: CallDecoder) {
        let seq = call.seq;
        let incoming = IncomingCall {
            kind: call.kind,
            target: call.target.to_string(),
            object: call.object,
            args: call.args.as_slice().to_vec(),
        };
        let name = ctx.name.clone();
        let dispatcher = ctx.dispatcher.clone();
        let outbound = ctx.outbound.clone();

        tokio::task::spawn_blocking(move || {
            let span = tracing::debug_span!(
                "dispatch",
                peer = %name,
                seq,
                kind = incoming.kind.as_tag(),
                target = %incoming.target
            );
            let _enter = span.enter();

            let response = crate::result::serving(|| dispatcher.on_incoming_call(&incoming));
            if let Err(failure) = &response {
                tracing::debug!(%failure, "call failed");
            }
            if let Some(payload) = encode_reply(seq, &response) {
                let _ = outbound.send(Outgoing::Reply { seq, payload });
            }
        });
    }

    /// A Call frame that does not decode is answered with a `Protocol` failure
    /// when its sequence number is readable. Anything else stops the pump.
    fn reject_call(ctx: &PumpCtx, msg: &[u8], error: duorpc::Error) -> Result<(), CallError> {
        let is_call = matches!(Decoder::new(msg).variant(), Ok(("Call", _)));
        match decode_seq(msg) {
            Ok(seq) if is_call => {
                tracing::warn!(peer = %ctx.name, seq, error = %error, "rejecting malformed call");
                let failure = Failure::new(FailureKind::Protocol, error.to_string());
                if let Some(payload) = encode_reply(seq, &Err(failure)) {
                    let _ = ctx.outbound.send(Outgoing::Reply { seq, payload });
                }
                Ok(())
            }
            _ => Err(CallError::Protocol(error.to_string())),
        }
    }
}

/// Stops reading. The writer drains what is queued and then releases the
/// transport, which closes the stream for the other side.
impl Drop for Peer {
    fn drop(&mut self) {
        self.pump.abort();
        self.closed.store(true, Ordering::SeqCst);
        Self::notify_all_pending(
            &self.pending,
            CallError::Transport(TransportError::ConnectionLost("peer dropped".into())),
        );
        tracing::debug!(peer = %self.name, "peer dropped");
    }
}

/// Encodes a reply. A success that cannot be encoded is answered with an
/// `Encode` failure instead.
fn encode_reply(seq: u64, response: &CallResponse) -> Option<Vec<u8>> {
    let encoded = match response {
        Ok(results) => ReplyOkEncoder::new(seq, results).to_bytes().or_else(|e| {
            let failure = Failure::new(FailureKind::Encode, e.to_string());
            ReplyErrEncoder::new(seq, &failure).to_bytes()
        }),
        Err(failure) => ReplyErrEncoder::new(seq, failure).to_bytes(),
    };
    match encoded {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(seq, error = %e, "failed to encode reply");
            None
        }
    }
}
