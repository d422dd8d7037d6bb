//! # Call Result
//!
//! The caller's view of one outbound call: pending until the reply arrives,
//! then resolved exactly once and readable any number of times.
//!
//! ## Reading
//!
//! - `get()` / `get_all()` block the calling thread. Inside a task on a
//!   multi-thread runtime the worker is handed off first. On a current-thread
//!   runtime blocking would stall the reply it waits for, so they fail with
//!   `WouldBlock`; use `wait()` / `wait_all()` there.
//! - `get_as::<T>()` and the free function [`get`] convert the value with a
//!   tag check, failing with `TypeMismatch` instead of coercing.
//! - `must_get()` panics on failure. It is the only aborting accessor.

use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use duorpc::FromValue;
use duorpc::Value;
use tokio::runtime::Handle;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::CallError;
use crate::peer::Outcome;
use crate::peer::PendingTable;

thread_local! {
    static SERVING: Cell<bool> = const { Cell::new(false) };
}

/// Runs an inbound handler. Its thread is on the blocking pool, so nested
/// blocking reads are allowed on any runtime flavor.
pub(crate) fn serving<R>(f: impl FnOnce() -> R) -> R {
    struct Reset(bool);
    impl Drop for Reset {
        fn drop(&mut self) {
            SERVING.with(|s| s.set(self.0));
        }
    }
    let _reset = Reset(SERVING.with(|s| s.replace(true)));
    f()
}

enum Slot {
    Pending(oneshot::Receiver<Outcome>),
    Resolved(Outcome),
}

/// Registration of an in-flight call, kept so it can be withdrawn.
struct InFlight {
    seq: u64,
    table: Arc<PendingTable>,
}

impl InFlight {
    /// Withdraws the call and resolves it with `error`. Returns false if the
    /// reply was already routed.
    fn withdraw(&self, error: CallError) -> bool {
        match self.table.remove(&self.seq) {
            Some((_, tx)) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }
}

/// Single-resolution handle for one outbound call.
pub struct CallResult {
    slot: Mutex<Slot>,
    in_flight: Option<InFlight>,
    runtime: Handle,
    timeout: Option<Duration>,
}

impl CallResult {
    pub(crate) fn pending(
        seq: u64,
        rx: oneshot::Receiver<Outcome>,
        table: Arc<PendingTable>,
        runtime: Handle,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            slot: Mutex::new(Slot::Pending(rx)),
            in_flight: Some(InFlight { seq, table }),
            runtime,
            timeout,
        }
    }

    /// A result that never went on the wire.
    pub(crate) fn resolved(outcome: Outcome, runtime: Handle) -> Self {
        Self {
            slot: Mutex::new(Slot::Resolved(outcome)),
            in_flight: None,
            runtime,
            timeout: None,
        }
    }

    /// Sequence number of the call, if it was submitted.
    pub fn seq(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.seq)
    }

    /// Whether the outcome is already known. `false` while another reader is waiting.
    pub fn is_resolved(&self) -> bool {
        matches!(self.slot.try_lock().as_deref(), Ok(Slot::Resolved(_)))
    }

    /// Waits for every result value, in declared order.
    pub async fn wait_all(&self) -> Result<Vec<Value>, CallError> {
        let mut slot = self.slot.lock().await;
        let outcome = match &mut *slot {
            Slot::Resolved(outcome) => return outcome.clone(),
            Slot::Pending(rx) => self.receive(rx).await,
        };
        *slot = Slot::Resolved(outcome.clone());
        outcome
    }

    async fn receive(&self, rx: &mut oneshot::Receiver<Outcome>) -> Outcome {
        let Some(limit) = self.timeout else {
            return rx.await.unwrap_or(Err(CallError::ChannelClosed));
        };
        match tokio::time::timeout(limit, &mut *rx).await {
            Ok(received) => received.unwrap_or(Err(CallError::ChannelClosed)),
            Err(_) => {
                // a reply may have been routed in the meantime; it wins
                if self.in_flight.as_ref().is_some_and(|f| f.withdraw(CallError::Timeout)) {
                    tracing::debug!(seq = ?self.seq(), "call timed out");
                }
                rx.await.unwrap_or(Err(CallError::Timeout))
            }
        }
    }

    /// Waits for the result as one value: `Unit` for none, the value for one,
    /// and a `List` for several.
    pub async fn wait(&self) -> Result<Value, CallError> {
        self.wait_all().await.map(collapse)
    }

    /// Blocks until every result value is available.
    pub fn get_all(&self) -> Result<Vec<Value>, CallError> {
        if let Ok(slot) = self.slot.try_lock() {
            if let Slot::Resolved(outcome) = &*slot {
                return outcome.clone();
            }
        }
        self.block_on(self.wait_all())?
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, CallError> {
        let Ok(current) = Handle::try_current() else {
            return Ok(self.runtime.block_on(future));
        };
        match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                Ok(tokio::task::block_in_place(|| self.runtime.block_on(future)))
            }
            _ if SERVING.with(Cell::get) => Ok(self.runtime.block_on(future)),
            _ => Err(CallError::WouldBlock),
        }
    }

    /// Blocks until the result is available, as one value (see [`CallResult::wait`]).
    pub fn get(&self) -> Result<Value, CallError> {
        self.get_all().map(collapse)
    }

    /// Blocks, then converts the value to `T`.
    pub fn get_as<T: FromValue>(&self) -> Result<T, CallError> {
        get(self)
    }

    pub async fn wait_as<T: FromValue>(&self) -> Result<T, CallError> {
        Ok(T::from_value(self.wait().await?)?)
    }

    /// Blocks and returns the value, panicking if the call failed.
    pub fn must_get(&self) -> Value {
        match self.get() {
            Ok(value) => value,
            Err(e) => panic!("call failed: {}", e),
        }
    }

    /// Blocks and converts the value, panicking on failure or mismatch.
    pub fn must_get_as<T: FromValue>(&self) -> T {
        match self.get_as() {
            Ok(value) => value,
            Err(e) => panic!("call failed: {}", e),
        }
    }

    /// Best-effort cancellation. Returns `false` if the reply already arrived,
    /// in which case the result keeps the reply.
    pub fn cancel(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.withdraw(CallError::Cancelled))
    }
}

impl std::fmt::Debug for CallResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallResult")
            .field("seq", &self.seq())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Typed accessor: blocks on `result`, then converts the value to `T`.
///
/// Asking for an integer when the other side returned a string fails with
/// `CallError::TypeMismatch`.
pub fn get<T: FromValue>(result: &CallResult) -> Result<T, CallError> {
    Ok(T::from_value(result.get()?)?)
}

fn collapse(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Unit,
        1 => values.remove(0),
        _ => Value::List(values),
    }
}
