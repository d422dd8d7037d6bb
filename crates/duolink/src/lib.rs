//! # Duolink
//!
//! A bidirectional call bridge between two runtimes. Each side registers
//! functions and classes under string names; the other side calls them by name,
//! constructs objects, and holds opaque handles to them until it closes them.
//!
//! ## Architecture
//!
//! - `registry`: named functions and classes this side serves.
//! - `dispatch`: executes inbound calls against the registry and live objects.
//! - `objects`: the table of objects kept alive for the other side.
//! - `peer`: owns a transport; correlates replies and serves calls concurrently.
//! - `result`: `CallResult`, the single-resolution view of one outbound call.
//! - `handle`: `ObjectHandle`, an owning reference to a remote object.
//! - `bridge`: ties the above together behind `Bridge` and `BridgeBuilder`.
//! - `transport`: the byte-frame seam, with an in-process channel transport.
//!
//! Values cross the boundary as `duorpc::Value`; see that crate for the codec.

pub mod bridge;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod objects;
pub mod peer;
pub mod registry;
pub mod result;
pub mod telemetry;
pub mod transport;

pub use bridge::Bridge;
pub use bridge::BridgeBuilder;
pub use bridge::WeakBridge;
pub use dispatch::Dispatcher;
pub use dispatch::IncomingCall;
pub use error::BuildError;
pub use error::CallError;
pub use error::RegistryError;
pub use handle::ObjectHandle;
pub use objects::LiveObjects;
pub use peer::CallRequest;
pub use peer::Peer;
pub use registry::CallableKind;
pub use registry::Exports;
pub use registry::Methods;
pub use registry::Registry;
pub use registry::RegistryBuilder;
pub use registry::RemoteObject;
pub use result::CallResult;
pub use result::get;
pub use transport::DuplexChannelTransport;
pub use transport::Transport;
pub use transport::TransportError;

pub use duorpc::Failure;
pub use duorpc::FailureKind;
pub use duorpc::FromValue;
pub use duorpc::IntoResults;
pub use duorpc::IntoValue;
pub use duorpc::ObjectRef;
pub use duorpc::Shape;
pub use duorpc::Signature;
pub use duorpc::Value;
pub use duorpc::args;

#[cfg(test)]
mod tests;
