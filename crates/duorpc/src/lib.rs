//! # DuoRPC
//!
//! The boundary-neutral half of a duolink bridge: the dynamic value domain both
//! runtimes agree on, the strict codec that moves it over `duopack`, and the
//! Call/Reply envelope.
//!
//! ## Architecture
//!
//! - `value`: `Value`, `Shape`, `Signature`, `ObjectRef`.
//! - `codec`: `Value` <-> `duopack`, checked against a `Shape` on the way in.
//! - `convert`: checked conversions between `Value` and Rust types.
//! - `frame`: Call and Reply frames with sequence numbers for correlation.
//! - `error`: local codec failures (`Error`) and remote failures (`Failure`).

pub mod codec;
pub mod convert;
pub mod error;
pub mod frame;
pub mod value;

pub use codec::decode_any;
pub use codec::decode_any_vals;
pub use codec::decode_val;
pub use codec::decode_vals;
pub use codec::encode_val;
pub use codec::encode_vals_to_bytes;
pub use convert::FromValue;
pub use convert::IntoResults;
pub use convert::IntoValue;
pub use error::Error;
pub use error::Failure;
pub use error::FailureKind;
pub use error::Result;
pub use frame::CallDecoder;
pub use frame::CallEncoder;
pub use frame::CallKind;
pub use frame::CallResponse;
pub use frame::ReplyDecoder;
pub use frame::ReplyErrEncoder;
pub use frame::ReplyOkEncoder;
pub use frame::RpcFrame;
pub use frame::decode_seq;
pub use value::ObjectRef;
pub use value::Shape;
pub use value::Signature;
pub use value::Value;

/// Builds an argument list from anything that converts into a `Value`.
///
/// ```
/// use duorpc::{args, Value};
/// assert_eq!(args![1, "two"], vec![Value::Int(1), Value::Str("two".into())]);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::IntoValue::into_value($arg)),+]
    };
}

#[cfg(test)]
mod tests;
