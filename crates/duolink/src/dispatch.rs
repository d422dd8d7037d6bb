//! # Inbound Dispatcher
//!
//! Executes calls the other runtime addresses to this side.
//!
//! ## Invariants
//! - **Boundary Catching**: user code runs inside `catch_unwind`; a panic becomes
//!   a `Panic` failure and never unwinds into the servicing thread.
//! - **No Lock Around User Code**: only the live-object table insert, lookup and
//!   remove are synchronized, and none of them is held while a callable runs.

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use duopack::Decoder;
use duorpc::CallKind;
use duorpc::CallResponse;
use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::ObjectRef;
use duorpc::Signature;
use duorpc::Value;
use duorpc::decode_vals;

use crate::objects::LiveObjects;
use crate::registry::Registry;

/// One inbound request, with its arguments still encoded.
///
/// Arguments stay raw until the target is known, because only the target's
/// signature says how to decode them.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub kind: CallKind,
    pub target: String,
    pub object: Option<ObjectRef>,
    /// A duopack List container.
    pub args: Vec<u8>,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    objects: Arc<LiveObjects>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, objects: Arc<LiveObjects>) -> Self {
        Self { registry, objects }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn objects(&self) -> &Arc<LiveObjects> {
        &self.objects
    }

    /// Serves one call. Every failure becomes a failure response.
    pub fn on_incoming_call(&self, call: &IncomingCall) -> CallResponse {
        match call.kind {
            CallKind::Function => {
                let function = self.registry.function(&call.target)?;
                let args = decode_args(&call.args, function.signature())?;
                guarded(|| function.call(args))
            }
            CallKind::New => {
                let constructor = self.registry.constructor(&call.target)?;
                let args = decode_args(&call.args, constructor.signature())?;
                let instance = guarded(|| constructor.construct(args))?;
                let r = self.objects.insert(instance);
                tracing::debug!(class = %call.target, object = %r, "object created");
                Ok(vec![Value::Object(r)])
            }
            CallKind::Method => {
                let r = require_object(call)?;
                let object = self.objects.get(r)?;
                let signature = object.signature(&call.target).ok_or_else(|| {
                    Failure::new(
                        FailureKind::NotFound,
                        format!("{} ({}) has no method '{}'", r, object.class_name(), call.target),
                    )
                })?;
                let args = decode_args(&call.args, signature)?;
                guarded(|| object.invoke(&call.target, args))
            }
            CallKind::Close => {
                let r = require_object(call)?;
                let object = self.objects.remove(r)?;
                tracing::debug!(object = %r, class = object.class_name(), "object closed");
                // user Drop impls run here, outside the table lock
                guarded(move || {
                    drop(object);
                    Ok(Vec::new())
                })
            }
        }
    }
}

fn require_object(call: &IncomingCall) -> Result<ObjectRef, Failure> {
    call.object.ok_or_else(|| {
        Failure::new(FailureKind::Protocol, format!("'{}' call without object", call.kind.as_tag()))
    })
}

fn decode_args(bytes: &[u8], signature: &Signature) -> Result<Vec<Value>, Failure> {
    decode_vals(Decoder::new(bytes), signature).map_err(|e| Failure::decode(&e))
}

/// Runs user code, turning a panic into a `Panic` failure.
fn guarded<T>(f: impl FnOnce() -> Result<T, Failure>) -> Result<T, Failure> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(%message, "callable panicked");
            Err(Failure::new(FailureKind::Panic, message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callable panicked".to_string()
    }
}
