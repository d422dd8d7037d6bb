//! # Codec
//!
//! The translation layer between `Value` and the `duopack` wire format.
//!
//! ## Invariants
//! - **Recursion Safety**: All recursive operations are bounded by `MAX_RECURSION_DEPTH`.
//! - **Type Strictness**: Decoding verifies wire tags against the expected `Shape`.
//!   An integer never decodes as a float, and the reverse.

use crate::error::Error;
use crate::error::Result;
use crate::value::ObjectRef;
use crate::value::Shape;
use crate::value::Signature;
use crate::value::Value;

use duopack::Decoder;
use duopack::Encoder;
use duopack::Tag;

/// The maximum nesting depth for Values before failing.
pub const MAX_RECURSION_DEPTH: usize = 64;

/// Variant name under which an `ObjectRef` travels.
const OBJECT_VARIANT: &str = "ref";

/// Encodes a `Value` into the encoder stream.
///
/// # Errors
/// Returns `Error::RecursionLimitExceeded` if the value is too deeply nested.
pub fn encode_val(enc: &mut Encoder, val: &Value) -> Result<()> {
    encode_val_impl(enc, val, 0)
}

fn encode_val_impl(enc: &mut Encoder, val: &Value, depth: usize) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match val {
        Value::Unit => enc.unit()?,
        Value::Bool(b) => enc.bool(*b)?,
        Value::Int(v) => enc.s64(*v)?,
        Value::Float(v) => enc.f64(*v)?,
        Value::Str(v) => enc.str(v)?,
        Value::Bytes(v) => enc.bytes(v)?,
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_val_impl(enc, item, depth + 1)?;
            }
            enc.list_end()?;
        }
        Value::Map(fields) => {
            enc.map_begin()?;
            for (name, value) in fields {
                enc.variant_begin(name)?;
                encode_val_impl(enc, value, depth + 1)?;
                enc.variant_end()?;
            }
            enc.map_end()?;
        }
        Value::Object(r) => {
            enc.variant_begin(OBJECT_VARIANT)?;
            enc.u64(r.0)?;
            enc.variant_end()?;
        }
    }
    Ok(())
}

/// Encodes a slice of values as one List container and returns the bytes.
///
/// This is the shape of an argument or result list on the wire.
pub fn encode_vals_to_bytes(vals: &[Value]) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.list_begin()?;
    for val in vals {
        encode_val(&mut enc, val)?;
    }
    enc.list_end()?;
    Ok(enc.into_bytes()?)
}

/// Decodes an argument list against a callable's signature.
///
/// The decoder must point at a List container. The number of items is
/// checked before any item is decoded.
pub fn decode_vals(mut list_decoder: Decoder, sig: &Signature) -> Result<Vec<Value>> {
    let mut iter = list_decoder.list()?;
    let mut items = Vec::new();
    while let Some(item) = iter.next()? {
        items.push(item);
    }

    if !sig.accepts_count(items.len()) {
        return Err(Error::ArityMismatch { expected: sig.arity(), found: items.len() });
    }

    let mut vals = Vec::with_capacity(items.len());
    for (idx, mut item) in items.into_iter().enumerate() {
        let shape = sig
            .shape_at(idx)
            .ok_or_else(|| Error::ArityMismatch { expected: sig.arity(), found: idx + 1 })?;
        vals.push(decode_val_impl(&mut item, shape, 0)?);
    }
    Ok(vals)
}

/// Decodes a single Value based on the expected Shape.
pub fn decode_val(dec: &mut Decoder, shape: &Shape) -> Result<Value> {
    decode_val_impl(dec, shape, 0)
}

fn decode_val_impl(dec: &mut Decoder, shape: &Shape, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match shape {
        Shape::Any => decode_any_impl(dec, depth),
        Shape::Unit => {
            expect_tag(dec, &[Tag::Unit], shape)?;
            dec.unit()?;
            Ok(Value::Unit)
        }
        Shape::Bool => {
            expect_tag(dec, &[Tag::BoolTrue, Tag::BoolFalse], shape)?;
            Ok(Value::Bool(dec.bool()?))
        }
        Shape::Int => {
            expect_tag(dec, &[Tag::S64], shape)?;
            Ok(Value::Int(dec.s64()?))
        }
        Shape::Float => {
            expect_tag(dec, &[Tag::F64], shape)?;
            Ok(Value::Float(dec.f64()?))
        }
        Shape::Str => {
            expect_tag(dec, &[Tag::String], shape)?;
            Ok(Value::Str(dec.str()?.to_string()))
        }
        Shape::Bytes => {
            expect_tag(dec, &[Tag::Bytes], shape)?;
            Ok(Value::Bytes(dec.bytes()?.to_vec()))
        }
        Shape::List(inner) => {
            expect_tag(dec, &[Tag::List], shape)?;
            let mut iter = dec.list()?;
            let mut list = Vec::new();
            while let Some(mut item) = iter.next()? {
                list.push(decode_val_impl(&mut item, inner, depth + 1)?);
            }
            Ok(Value::List(list))
        }
        Shape::Map(inner) => {
            expect_tag(dec, &[Tag::Map], shape)?;
            let mut iter = dec.map()?;
            let mut fields = Vec::new();
            while let Some((k, mut v)) = iter.next()? {
                fields.push((k.to_string(), decode_val_impl(&mut v, inner, depth + 1)?));
            }
            Ok(Value::Map(fields))
        }
        Shape::Object => {
            expect_tag(dec, &[Tag::Variant], shape)?;
            decode_object(dec)
        }
        Shape::Optional(inner) => {
            if dec.peek_tag()? == Tag::Unit {
                dec.unit()?;
                Ok(Value::Unit)
            } else {
                decode_val_impl(dec, inner, depth + 1)
            }
        }
    }
}

/// Decodes a single Value without an expected shape.
pub fn decode_any(dec: &mut Decoder) -> Result<Value> {
    decode_any_impl(dec, 0)
}

/// Decodes every item of a List container without expected shapes.
///
/// Used for result lists, whose shapes the caller checks afterwards.
pub fn decode_any_vals(mut list_decoder: Decoder) -> Result<Vec<Value>> {
    let mut iter = list_decoder.list()?;
    let mut vals = Vec::new();
    while let Some(mut item) = iter.next()? {
        vals.push(decode_any_impl(&mut item, 0)?);
    }
    Ok(vals)
}

fn decode_any_impl(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match dec.peek_tag()? {
        Tag::Unit => {
            dec.unit()?;
            Ok(Value::Unit)
        }
        Tag::BoolTrue | Tag::BoolFalse => Ok(Value::Bool(dec.bool()?)),
        Tag::S64 => Ok(Value::Int(dec.s64()?)),
        Tag::F64 => Ok(Value::Float(dec.f64()?)),
        Tag::String => Ok(Value::Str(dec.str()?.to_string())),
        Tag::Bytes => Ok(Value::Bytes(dec.bytes()?.to_vec())),
        Tag::List => {
            let mut iter = dec.list()?;
            let mut list = Vec::new();
            while let Some(mut item) = iter.next()? {
                list.push(decode_any_impl(&mut item, depth + 1)?);
            }
            Ok(Value::List(list))
        }
        Tag::Map => {
            let mut iter = dec.map()?;
            let mut fields = Vec::new();
            while let Some((k, mut v)) = iter.next()? {
                fields.push((k.to_string(), decode_any_impl(&mut v, depth + 1)?));
            }
            Ok(Value::Map(fields))
        }
        Tag::Variant => decode_object(dec),
        found @ (Tag::U64 | Tag::ResultOk | Tag::ResultErr) => Err(Error::TypeMismatch {
            expected: "value".into(),
            found: tag_desc(found).into(),
        }),
    }
}

fn decode_object(dec: &mut Decoder) -> Result<Value> {
    let (name, mut body) = dec.variant()?;
    if name != OBJECT_VARIANT {
        return Err(Error::UnknownVariant(name.to_string()));
    }
    Ok(Value::Object(ObjectRef(body.u64()?)))
}

fn expect_tag(dec: &Decoder, allowed: &[Tag], shape: &Shape) -> Result<()> {
    let found = dec.peek_tag()?;
    if allowed.contains(&found) {
        Ok(())
    } else {
        Err(Error::TypeMismatch { expected: shape.to_string(), found: tag_desc(found).into() })
    }
}

/// Helper to get a string description of a wire tag for errors.
fn tag_desc(tag: Tag) -> &'static str {
    match tag {
        Tag::Unit => "unit",
        Tag::BoolTrue | Tag::BoolFalse => "bool",
        Tag::U64 => "u64",
        Tag::S64 => "int",
        Tag::F64 => "float",
        Tag::String => "str",
        Tag::Bytes => "bytes",
        Tag::List => "list",
        Tag::Map => "map",
        Tag::ResultOk | Tag::ResultErr => "result",
        Tag::Variant => "variant",
    }
}
