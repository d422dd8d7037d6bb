//! # Bridge
//!
//! One side of a connection: the registry this side serves, the objects it
//! keeps alive for the other side, and the outbound call API.
//!
//! ```no_run
//! use duolink::{Bridge, DuplexChannelTransport, Registry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rt = tokio::runtime::Runtime::new()?;
//! let (a, b) = DuplexChannelTransport::pair();
//!
//! let registry = Registry::builder().function("add", |x: i64, y: i64| x + y).build()?;
//! let _host = Bridge::builder("host")
//!     .registry(registry)
//!     .runtime(rt.handle().clone())
//!     .connect(Box::new(a))?;
//! let peer = Bridge::builder("peer").runtime(rt.handle().clone()).connect(Box::new(b))?;
//!
//! let sum: i64 = peer.call_function("add", duorpc::args![2, 3]).get_as()?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use duorpc::FromValue;
use duorpc::ObjectRef;
use duorpc::Value;
use tokio::runtime::Handle;

use crate::dispatch::Dispatcher;
use crate::error::BuildError;
use crate::error::CallError;
use crate::handle::ObjectHandle;
use crate::objects::LiveObjects;
use crate::peer::CallRequest;
use crate::peer::Peer;
use crate::registry::CallableKind;
use crate::registry::Exports;
use crate::registry::Registry;
use crate::registry::RegistryBuilder;
use crate::result::CallResult;
use crate::transport::Transport;

/// Where the bridge's registry comes from.
enum RegistrySource {
    Built(Arc<Registry>),
    Declared(RegistryBuilder),
}

/// Fluent configuration for a `Bridge`.
pub struct BridgeBuilder {
    name: String,
    registry: RegistrySource,
    call_timeout: Option<Duration>,
    runtime: Option<Handle>,
}

impl BridgeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: RegistrySource::Declared(RegistryBuilder::new()),
            call_timeout: None,
            runtime: None,
        }
    }

    /// Serves an already built registry.
    pub fn registry(mut self, registry: impl Into<Arc<Registry>>) -> Self {
        self.registry = RegistrySource::Built(registry.into());
        self
    }

    /// Declares exports to be built when connecting. Collisions fail `connect`.
    ///
    /// Replaces a registry set with [`BridgeBuilder::registry`].
    pub fn install(mut self, group: impl Exports) -> Self {
        let builder = match self.registry {
            RegistrySource::Declared(builder) => builder,
            RegistrySource::Built(_) => RegistryBuilder::new(),
        };
        self.registry = RegistrySource::Declared(builder.install(group));
        self
    }

    /// Resolves outbound calls with `Timeout` if no reply arrives in time.
    /// Without it, a call waits for as long as the connection lives.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Runtime for the connection tasks. Defaults to the runtime of the calling thread.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Starts serving the registry and returns the connected bridge.
    pub fn connect(self, transport: Box<dyn Transport>) -> Result<Bridge, BuildError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        let registry = match self.registry {
            RegistrySource::Built(registry) => registry,
            RegistrySource::Declared(builder) => Arc::new(builder.build()?),
        };

        let objects = Arc::new(LiveObjects::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), objects.clone()));
        let peer =
            Peer::spawn(self.name.as_str(), transport, dispatcher, runtime, self.call_timeout);

        tracing::info!(
            bridge = %self.name,
            functions = registry.names(CallableKind::Function).len(),
            constructors = registry.names(CallableKind::Constructor).len(),
            "bridge connected"
        );

        Ok(Bridge { inner: Arc::new(Inner { name: self.name, registry, objects, peer }) })
    }
}

struct Inner {
    name: String,
    registry: Arc<Registry>,
    objects: Arc<LiveObjects>,
    peer: Peer,
}

/// A connected side. Cheap to clone; clones share the connection, which
/// closes when the last clone is dropped.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    pub fn builder(name: impl Into<String>) -> BridgeBuilder {
        BridgeBuilder::new(name)
    }

    /// A reference that does not keep the connection open.
    ///
    /// Handlers that call back through the bridge serving them capture this.
    /// A `Bridge` captured by its own registry is never released.
    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge { inner: Arc::downgrade(&self.inner) }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// What this side serves.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Objects this side keeps alive for the other side.
    pub fn live_objects(&self) -> &Arc<LiveObjects> {
        &self.inner.objects
    }

    pub fn runtime(&self) -> &Handle {
        self.inner.peer.runtime()
    }

    /// Whether the connection has stopped.
    pub fn is_closed(&self) -> bool {
        self.inner.peer.is_closed()
    }

    /// Submits any request. Never blocks.
    pub fn submit(&self, request: CallRequest) -> CallResult {
        self.inner.peer.submit(request)
    }

    /// Calls a function registered on the other side. Never blocks.
    pub fn call_function(&self, name: &str, args: Vec<Value>) -> CallResult {
        self.submit(CallRequest::function(name, args))
    }

    /// Calls a method on an object by raw reference. Prefer [`ObjectHandle::method_call`].
    pub fn call_method(&self, object: ObjectRef, method: &str, args: Vec<Value>) -> CallResult {
        self.submit(CallRequest::method(object, method, args))
    }

    /// Constructs an object on the other side and blocks until it exists.
    ///
    /// A failed construction yields no handle.
    pub fn new_object(&self, class: &str, args: Vec<Value>) -> Result<ObjectHandle, CallError> {
        let value = self.submit(CallRequest::new_object(class, args)).get()?;
        self.adopt(class, value)
    }

    /// Async form of [`Bridge::new_object`].
    pub async fn new_object_async(
        &self,
        class: &str,
        args: Vec<Value>,
    ) -> Result<ObjectHandle, CallError> {
        let value = self.submit(CallRequest::new_object(class, args)).wait().await?;
        self.adopt(class, value)
    }

    fn adopt(&self, class: &str, value: Value) -> Result<ObjectHandle, CallError> {
        let object = ObjectRef::from_value(value).map_err(|e| {
            let message = format!("constructor '{}' replied without an object reference", class);
            CallError::Protocol(format!("{}: {}", message, e))
        })?;
        tracing::debug!(bridge = %self.inner.name, class, %object, "object handle opened");
        Ok(ObjectHandle::new(self, object, class.to_string()))
    }

    /// Releases an object by raw reference and blocks until the other side confirms.
    ///
    /// Closing a reference twice reports `StaleReference` from the other side.
    pub fn close_object(&self, object: ObjectRef) -> Result<(), CallError> {
        self.submit(CallRequest::close(object)).get_all().map(|_| ())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.inner.name)
            .field("registry", &self.inner.registry)
            .field("live_objects", &self.inner.objects.len())
            .finish()
    }
}

/// Non-owning form of [`Bridge`], from [`Bridge::downgrade`].
#[derive(Clone)]
pub struct WeakBridge {
    inner: Weak<Inner>,
}

impl WeakBridge {
    /// The bridge, if any clone of it is still alive.
    pub fn upgrade(&self) -> Option<Bridge> {
        self.inner.upgrade().map(|inner| Bridge { inner })
    }
}

impl std::fmt::Debug for WeakBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakBridge").field("alive", &(self.inner.strong_count() > 0)).finish()
    }
}
