//! # Object Handle
//!
//! Owning wrapper around one reference to an object that lives on the other side.
//!
//! ## State Machine
//!
//! `Open` → `Closed` (terminal). Method calls are only sent while open. `close()`
//! sends exactly one Close request over the handle's lifetime; later calls are
//! local no-ops. Dropping an open handle sends the Close without waiting.
//!
//! A handle is not `Clone`: two copies could both close the same reference.
//! Wrap it in an `Arc` to share it; it is released when the last owner drops it.
//!
//! A handle does not keep its bridge alive, so a served object may own handles
//! into the other side. Once every `Bridge` clone is gone, calls through the
//! handle fail with `ConnectionLost`.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use duorpc::ObjectRef;
use duorpc::Value;
use tokio::runtime::Handle;

use crate::bridge::Bridge;
use crate::bridge::WeakBridge;
use crate::error::CallError;
use crate::peer::CallRequest;
use crate::result::CallResult;
use crate::transport::TransportError;

pub struct ObjectHandle {
    bridge: WeakBridge,
    runtime: Handle,
    object: ObjectRef,
    class: String,
    closed: AtomicBool,
}

impl ObjectHandle {
    pub(crate) fn new(bridge: &Bridge, object: ObjectRef, class: String) -> Self {
        Self {
            bridge: bridge.downgrade(),
            runtime: bridge.runtime().clone(),
            object,
            class,
            closed: AtomicBool::new(false),
        }
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Calls a method on the remote object. On a closed handle this resolves
    /// immediately with `HandleClosed` and nothing is sent.
    pub fn method_call(&self, method: &str, args: Vec<Value>) -> CallResult {
        if self.is_closed() {
            return self.failed(CallError::HandleClosed(self.object));
        }
        match self.bridge.upgrade() {
            Some(bridge) => bridge.call_method(self.object, method, args),
            None => self.failed(bridge_gone()),
        }
    }

    /// Releases the remote object and waits for the other side to confirm.
    ///
    /// The handle is closed afterwards whatever the outcome; a failed remote
    /// close is reported but does not reopen it. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), CallError> {
        match self.begin_close() {
            Some(result) => result.get_all().map(|_| ()),
            None => Ok(()),
        }
    }

    /// Async form of [`ObjectHandle::close`].
    pub async fn close_async(&self) -> Result<(), CallError> {
        match self.begin_close() {
            Some(result) => result.wait_all().await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Marks the handle closed and sends the Close request, once.
    fn begin_close(&self) -> Option<CallResult> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return Some(self.failed(bridge_gone()));
        };
        tracing::debug!(
            bridge = bridge.name(),
            object = %self.object,
            class = %self.class,
            "closing handle"
        );
        Some(bridge.submit(CallRequest::close(self.object)))
    }

    fn failed(&self, error: CallError) -> CallResult {
        CallResult::resolved(Err(error), self.runtime.clone())
    }
}

fn bridge_gone() -> CallError {
    CallError::Transport(TransportError::ConnectionLost("bridge dropped".into()))
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        // fire and forget; the result is dropped unread
        let _ = self.begin_close();
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("object", &self.object)
            .field("class", &self.class)
            .field("closed", &self.is_closed())
            .finish()
    }
}
