use crate::*;
use duopack::{Decoder, Encoder};
use std::collections::BTreeMap;

/// Encodes a value and decodes it back against `shape`.
fn roundtrip(val: &Value, shape: &Shape) -> Result<Value> {
    let mut enc = Encoder::new();
    encode_val(&mut enc, val)?;
    let bytes = enc.into_bytes()?;
    decode_val(&mut Decoder::new(&bytes), shape)
}

fn point(x: i64, y: i64) -> Value {
    Value::Map(vec![("x".into(), Value::Int(x)), ("y".into(), Value::Int(y))])
}

// ============================================================================
//  CODEC
// ============================================================================

#[test]
fn test_codec_preserves_nested_values() -> Result<()> {
    let val = Value::List(vec![
        Value::Unit,
        Value::Bool(true),
        Value::Float(2.5),
        Value::Bytes(vec![9, 8]),
        point(1, 2),
        Value::Object(ObjectRef(7)),
    ]);
    assert_eq!(roundtrip(&val, &Shape::Any)?, val);
    assert_eq!(roundtrip(&point(3, 4), &Shape::map(Shape::Int))?, point(3, 4));
    Ok(())
}

#[test]
fn test_codec_is_strict_about_numbers() {
    let err = roundtrip(&Value::Int(1), &Shape::Float).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { expected: "float".into(), found: "int".into() });

    let err = roundtrip(&Value::Float(1.0), &Shape::Int).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { expected: "int".into(), found: "float".into() });
}

#[test]
fn test_codec_checks_list_items() {
    let val = Value::List(vec![Value::Int(1), Value::Str("two".into())]);
    let err = roundtrip(&val, &Shape::list(Shape::Int)).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[test]
fn test_optional_shape_accepts_unit() -> Result<()> {
    let shape = Shape::optional(Shape::Str);
    assert_eq!(roundtrip(&Value::Unit, &shape)?, Value::Unit);
    assert_eq!(roundtrip(&Value::Str("s".into()), &shape)?, Value::Str("s".into()));
    assert!(roundtrip(&Value::Int(1), &shape).is_err());
    Ok(())
}

#[test]
fn test_recursion_limit() {
    let mut val = Value::Unit;
    for _ in 0..100 {
        val = Value::List(vec![val]);
    }
    let mut enc = Encoder::new();
    assert_eq!(encode_val(&mut enc, &val).unwrap_err(), Error::RecursionLimitExceeded);
}

#[test]
fn test_decode_vals_checks_arity() -> Result<()> {
    let sig = Signature::new([Shape::Int, Shape::Str]);

    let bytes = encode_vals_to_bytes(&[Value::Int(1), Value::Str("a".into())])?;
    assert_eq!(decode_vals(Decoder::new(&bytes), &sig)?.len(), 2);

    let bytes = encode_vals_to_bytes(&[Value::Int(1)])?;
    let err = decode_vals(Decoder::new(&bytes), &sig).unwrap_err();
    assert_eq!(err, Error::ArityMismatch { expected: "2".into(), found: 1 });

    let bytes = encode_vals_to_bytes(&[Value::Int(1), Value::Str("a".into()), Value::Unit])?;
    let err = decode_vals(Decoder::new(&bytes), &sig).unwrap_err();
    assert_eq!(err, Error::ArityMismatch { expected: "2".into(), found: 3 });
    Ok(())
}

#[test]
fn test_decode_vals_variadic_tail() -> Result<()> {
    let sig = Signature::new([Shape::Str]).variadic(Shape::Int);

    let bytes = encode_vals_to_bytes(&args!["sum", 1, 2, 3])?;
    let vals = decode_vals(Decoder::new(&bytes), &sig)?;
    assert_eq!(vals, args!["sum", 1, 2, 3]);

    let bytes = encode_vals_to_bytes(&args!["sum"])?;
    assert_eq!(decode_vals(Decoder::new(&bytes), &sig)?, args!["sum"]);

    let bytes = encode_vals_to_bytes(&args![])?;
    assert!(matches!(
        decode_vals(Decoder::new(&bytes), &sig),
        Err(Error::ArityMismatch { found: 0, .. })
    ));

    let bytes = encode_vals_to_bytes(&args!["sum", 1.5])?;
    assert!(matches!(decode_vals(Decoder::new(&bytes), &sig), Err(Error::TypeMismatch { .. })));
    Ok(())
}

// ============================================================================
//  CONVERSIONS
// ============================================================================

#[test]
fn test_from_value_inspects_tag() -> Result<()> {
    assert_eq!(i64::from_value(Value::Int(-3))?, -3);
    assert_eq!(String::from_value(Value::Str("x".into()))?, "x");
    assert!(bool::from_value(Value::Int(1)).is_err());
    assert!(f64::from_value(Value::Int(1)).is_err());
    Ok(())
}

#[test]
fn test_narrow_integers_are_range_checked() {
    assert_eq!(u8::from_value(Value::Int(255)), Ok(255));
    assert!(matches!(u8::from_value(Value::Int(256)), Err(Error::TypeMismatch { .. })));
    assert!(matches!(i32::from_value(Value::Int(i64::MAX)), Err(Error::TypeMismatch { .. })));
    assert!(matches!(u64::from_value(Value::Int(-1)), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_containers_convert() -> Result<()> {
    let list = vec![1i64, 2, 3].into_value();
    assert_eq!(Vec::<i64>::from_value(list)?, vec![1, 2, 3]);

    assert_eq!(Option::<i64>::from_value(Value::Unit)?, None);
    assert_eq!(Option::<i64>::from_value(Value::Int(4))?, Some(4));

    let fields = BTreeMap::<String, i64>::from_value(point(5, 6))?;
    assert_eq!(fields.get("y"), Some(&6));

    let (q, r) = <(i64, i64)>::from_value(Value::List(vec![Value::Int(3), Value::Int(1)]))?;
    assert_eq!((q, r), (3, 1));
    assert!(matches!(
        <(i64, i64)>::from_value(Value::List(vec![Value::Int(3)])),
        Err(Error::ArityMismatch { found: 1, .. })
    ));
    Ok(())
}

#[test]
fn test_shapes_follow_types() {
    assert_eq!(<Vec<Option<String>>>::shape(), Shape::list(Shape::optional(Shape::Str)));
    assert!(Shape::map(Shape::Int).accepts(&point(1, 2)));
    assert!(!Shape::map(Shape::Str).accepts(&point(1, 2)));
}

#[test]
fn test_into_results() {
    assert_eq!(().into_results(), Ok(vec![]));
    assert_eq!(7i64.into_results(), Ok(vec![Value::Int(7)]));
    assert_eq!((3i64, 1i64).into_results(), Ok(vec![Value::Int(3), Value::Int(1)]));

    let ok: std::result::Result<i64, String> = Ok(2);
    assert_eq!(ok.into_results(), Ok(vec![Value::Int(2)]));

    let err: std::result::Result<i64, String> = Err("divide by zero".into());
    assert_eq!(err.into_results(), Err(Failure::raised("divide by zero")));
}

// ============================================================================
//  FRAMES
// ============================================================================

#[test]
fn test_call_frame_roundtrip() -> Result<()> {
    let args = args![10, "x"];
    let call = CallEncoder::new(42, CallKind::Method, "add", Some(ObjectRef(3)), &args);
    let bytes = call.to_bytes()?;

    assert_eq!(decode_seq(&bytes)?, 42);

    let mut dec = Decoder::new(&bytes);
    let RpcFrame::Call(call) = RpcFrame::decode(&mut dec)? else {
        panic!("expected a call frame");
    };
    assert_eq!(call.seq, 42);
    assert_eq!(call.kind, CallKind::Method);
    assert_eq!(call.target, "add");
    assert_eq!(call.object, Some(ObjectRef(3)));
    assert_eq!(decode_any_vals(call.args)?, args);
    Ok(())
}

#[test]
fn test_object_field_must_match_kind() {
    let err = CallEncoder::new(1, CallKind::Method, "m", None, &[]).to_bytes().unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));

    let call = CallEncoder::new(1, CallKind::New, "C", Some(ObjectRef(1)), &[]);
    let err = call.to_bytes().unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
}

#[test]
fn test_call_decoder_rejects_close_without_object() -> Result<()> {
    // hand-built frame: a close that names no object
    let mut enc = Encoder::new();
    enc.variant_begin("Call")?;
    enc.map_begin()?;
    enc.variant_begin("seq")?;
    enc.u64(5)?;
    enc.variant_end()?;
    enc.variant_begin("kind")?;
    enc.variant_begin("close")?;
    enc.unit()?;
    enc.variant_end()?;
    enc.variant_end()?;
    enc.variant_begin("target")?;
    enc.str("")?;
    enc.variant_end()?;
    enc.variant_begin("args")?;
    enc.list_begin()?;
    enc.list_end()?;
    enc.variant_end()?;
    enc.map_end()?;
    enc.variant_end()?;
    let bytes = enc.into_bytes()?;

    let decoded = RpcFrame::decode(&mut Decoder::new(&bytes));
    assert!(matches!(decoded, Err(Error::ProtocolViolation(_))));
    // the sequence number is still recoverable for an error reply
    assert_eq!(decode_seq(&bytes)?, 5);
    Ok(())
}

#[test]
fn test_reply_frames() -> Result<()> {
    let results = args![3, 1];
    let ok = ReplyOkEncoder::new(9, &results).to_bytes()?;
    let RpcFrame::Reply(reply) = RpcFrame::decode(&mut Decoder::new(&ok))? else {
        panic!("expected a reply frame");
    };
    assert_eq!(reply.seq, 9);
    let body = reply.status.map_err(|f| Error::ProtocolViolation(f.to_string()))?;
    assert_eq!(decode_any_vals(body)?, results);

    let failure = Failure::new(FailureKind::Stale, "obj-4 is closed");
    let err = ReplyErrEncoder::new(10, &failure).to_bytes()?;
    let RpcFrame::Reply(reply) = RpcFrame::decode(&mut Decoder::new(&err))? else {
        panic!("expected a reply frame");
    };
    assert_eq!(reply.seq, 10);
    assert_eq!(reply.status.err(), Some(failure));
    Ok(())
}

#[test]
fn test_unknown_frame_type() -> Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Ping")?;
    enc.unit()?;
    enc.variant_end()?;
    let bytes = enc.into_bytes()?;
    assert!(matches!(RpcFrame::decode(&mut Decoder::new(&bytes)), Err(Error::UnknownVariant(_))));
    Ok(())
}

#[test]
fn test_failure_tags() -> Result<()> {
    for kind in [
        FailureKind::NotFound,
        FailureKind::Decode,
        FailureKind::Encode,
        FailureKind::Panic,
        FailureKind::Raised,
        FailureKind::Stale,
        FailureKind::Protocol,
    ] {
        assert_eq!(FailureKind::from_tag(kind.as_tag())?, kind);
    }
    assert!(FailureKind::from_tag("Bogus").is_err());
    Ok(())
}
