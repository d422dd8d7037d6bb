//! # Protocol Frames
//!
//! Defines the structure of the envelope (Call vs Reply).
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown header fields are safely skipped.
//! - **Object Field**: present exactly when the call kind addresses an existing object.

use crate::codec::encode_val;
use crate::error::Error;
use crate::error::Failure;
use crate::error::FailureKind;
use crate::error::Result;
use crate::value::ObjectRef;
use crate::value::Value;

use duopack::Decoder;
use duopack::Encoder;

/// Outcome of one call as seen by the side that served it.
pub type CallResponse = std::result::Result<Vec<Value>, Failure>;

/// What a Call frame asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Invoke a registered function by name.
    Function,
    /// Invoke a method on a live object.
    Method,
    /// Construct a registered class by name.
    New,
    /// Release a live object.
    Close,
}

impl CallKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Function => "func",
            Self::Method => "method",
            Self::New => "new",
            Self::Close => "close",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "func" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "new" => Ok(Self::New),
            "close" => Ok(Self::Close),
            other => Err(Error::UnknownVariant(other.to_string())),
        }
    }

    /// Whether frames of this kind carry an object reference.
    pub fn targets_object(&self) -> bool {
        matches!(self, Self::Method | Self::Close)
    }
}

/// Encodes an outbound Call frame.
pub struct CallEncoder<'a> {
    pub seq: u64,
    pub kind: CallKind,
    pub target: &'a str,
    pub object: Option<ObjectRef>,
    pub args: &'a [Value],
}

impl<'a> CallEncoder<'a> {
    pub fn new(
        seq: u64,
        kind: CallKind,
        target: &'a str,
        object: Option<ObjectRef>,
        args: &'a [Value],
    ) -> Self {
        Self { seq, kind, target, object, args }
    }

    /// Writes the frame into `enc`. Fails before writing anything if the
    /// object field does not match the call kind.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        check_object_field(self.kind, self.object.is_some())?;

        field(enc, "Call", |enc| {
            enc.map_begin()?;
            field(enc, "seq", |enc| Ok(enc.u64(self.seq)?))?;
            field(enc, "kind", |enc| unit_variant(enc, self.kind.as_tag()))?;
            field(enc, "target", |enc| Ok(enc.str(self.target)?))?;
            if let Some(object) = self.object {
                field(enc, "object", |enc| Ok(enc.u64(object.0)?))?;
            }
            field(enc, "args", |enc| value_list(enc, self.args))?;
            Ok(enc.map_end()?)
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        frame_bytes(|enc| self.encode(enc))
    }
}

/// Decodes an inbound Call frame.
///
/// **Invariant**: The `args` decoder points to a List container containing the arguments.
pub struct CallDecoder<'a> {
    pub seq: u64,
    pub kind: CallKind,
    pub target: &'a str,
    pub object: Option<ObjectRef>,
    /// Use `decode_vals` with this decoder and the callable's signature.
    pub args: Decoder<'a>,
}

impl<'a> CallDecoder<'a> {
    /// Decode a Call frame from the decoder.
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        let mut map = dec.map()?;
        let mut seq = None;
        let mut kind = None;
        let mut target = None;
        let mut object = None;
        let mut args_dec = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "kind" => kind = Some(CallKind::from_tag(decode_unit_variant(&mut val)?)?),
                "target" => target = Some(val.str()?),
                "object" => object = Some(ObjectRef(val.u64()?)),
                "args" => args_dec = Some(val),
                _ => val.skip()?,
            }
        }

        let kind = kind.ok_or(Error::ProtocolViolation("Missing kind".into()))?;
        check_object_field(kind, object.is_some())?;

        Ok(CallDecoder {
            seq: seq.ok_or(Error::ProtocolViolation("Missing seq".into()))?,
            kind,
            target: target.ok_or(Error::ProtocolViolation("Missing target".into()))?,
            object,
            args: args_dec.ok_or(Error::ProtocolViolation("Missing args".into()))?,
        })
    }
}

/// Encodes an outbound Reply frame (success).
pub struct ReplyOkEncoder<'a> {
    pub seq: u64,
    pub results: &'a [Value],
}

impl<'a> ReplyOkEncoder<'a> {
    pub fn new(seq: u64, results: &'a [Value]) -> Self {
        Self { seq, results }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        field(enc, "Reply", |enc| {
            enc.result_ok_begin()?;
            enc.map_begin()?;
            field(enc, "seq", |enc| Ok(enc.u64(self.seq)?))?;
            field(enc, "results", |enc| value_list(enc, self.results))?;
            enc.map_end()?;
            Ok(enc.result_ok_end()?)
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        frame_bytes(|enc| self.encode(enc))
    }
}

/// Encodes an outbound Reply frame (failure).
pub struct ReplyErrEncoder<'a> {
    pub seq: u64,
    pub failure: &'a Failure,
}

impl<'a> ReplyErrEncoder<'a> {
    pub fn new(seq: u64, failure: &'a Failure) -> Self {
        Self { seq, failure }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        let failure = self.failure;
        field(enc, "Reply", |enc| {
            enc.result_err_begin()?;
            enc.map_begin()?;
            field(enc, "seq", |enc| Ok(enc.u64(self.seq)?))?;
            field(enc, "failure", |enc| {
                enc.map_begin()?;
                field(enc, "kind", |enc| unit_variant(enc, failure.kind.as_tag()))?;
                field(enc, "message", |enc| Ok(enc.str(&failure.message)?))?;
                Ok(enc.map_end()?)
            })?;
            enc.map_end()?;
            Ok(enc.result_err_end()?)
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        frame_bytes(|enc| self.encode(enc))
    }
}

/// Decodes an inbound Reply frame.
pub struct ReplyDecoder<'a> {
    pub seq: u64,
    /// The result of the call.
    /// - `Ok(Decoder)`: Success. Points to a List container of results.
    /// - `Err(Failure)`: The call failed on the serving side.
    pub status: std::result::Result<Decoder<'a>, Failure>,
}

impl<'a> ReplyDecoder<'a> {
    /// Decode a Reply frame from the decoder.
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        match dec.result()? {
            Ok(ok_body) => Self::decode_success(ok_body),
            Err(err_body) => Self::decode_failure(err_body),
        }
    }

    fn decode_success(mut ok_body: Decoder<'a>) -> Result<Self> {
        let mut map = ok_body.map()?;
        let mut seq = None;
        let mut results_dec = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "results" => results_dec = Some(val),
                _ => val.skip()?,
            }
        }

        Ok(ReplyDecoder {
            seq: seq.ok_or(Error::ProtocolViolation("Missing seq".into()))?,
            status: Ok(results_dec.ok_or(Error::ProtocolViolation("Missing results".into()))?),
        })
    }

    fn decode_failure(mut err_body: Decoder<'a>) -> Result<Self> {
        let mut map = err_body.map()?;
        let mut seq = None;
        let mut failure = None;

        while let Some((key, mut val)) = map.next()? {
            match key {
                "seq" => seq = Some(val.u64()?),
                "failure" => failure = Some(decode_failure_body(&mut val)?),
                _ => val.skip()?,
            }
        }

        Ok(ReplyDecoder {
            seq: seq.ok_or(Error::ProtocolViolation("Missing seq".into()))?,
            status: Err(failure.ok_or(Error::ProtocolViolation("Missing failure".into()))?),
        })
    }
}

fn decode_failure_body(dec: &mut Decoder) -> Result<Failure> {
    let mut map = dec.map()?;
    let mut kind = None;
    let mut message = None;

    while let Some((key, mut val)) = map.next()? {
        match key {
            "kind" => kind = Some(FailureKind::from_tag(decode_unit_variant(&mut val)?)?),
            "message" => message = Some(val.str()?.to_string()),
            _ => val.skip()?,
        }
    }

    Ok(Failure {
        kind: kind.ok_or(Error::ProtocolViolation("Missing failure kind".into()))?,
        message: message.unwrap_or_default(),
    })
}

/// Top-level frame decoder.
pub enum RpcFrame<'a> {
    Call(CallDecoder<'a>),
    Reply(ReplyDecoder<'a>),
}

impl<'a> RpcFrame<'a> {
    /// Decode a frame from the decoder.
    pub fn decode(dec: &mut Decoder<'a>) -> Result<Self> {
        let (msg_type, body) = dec.variant()?;
        match msg_type {
            "Call" => Ok(RpcFrame::Call(CallDecoder::decode(body)?)),
            "Reply" => Ok(RpcFrame::Reply(ReplyDecoder::decode(body)?)),
            _ => Err(Error::UnknownVariant(format!("Top-level frame: {}", msg_type))),
        }
    }
}

/// Decodes just the sequence number from a raw frame.
///
/// Lets the receiver answer or route a frame whose remaining fields are malformed.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let (msg_type, mut body) = dec.variant()?;
    let mut map = match msg_type {
        "Call" => body.map()?,
        "Reply" => match body.result()? {
            Ok(mut ok_body) => ok_body.map()?,
            Err(mut err_body) => err_body.map()?,
        },
        _ => return Err(Error::UnknownVariant(format!("Top-level frame: {}", msg_type))),
    };

    while let Some((key, mut val)) = map.next()? {
        if key == "seq" {
            return Ok(val.u64()?);
        }
        val.skip()?;
    }

    Err(Error::ProtocolViolation("Missing seq".into()))
}

fn check_object_field(kind: CallKind, present: bool) -> Result<()> {
    let problem = match (kind.targets_object(), present) {
        (true, false) => "without",
        (false, true) => "with",
        _ => return Ok(()),
    };
    Err(Error::ProtocolViolation(format!("'{}' call {} object", kind.as_tag(), problem)))
}

/// Writes one named entry: a map field, or the frame's outer variant.
fn field(
    enc: &mut Encoder,
    name: &str,
    body: impl FnOnce(&mut Encoder) -> Result<()>,
) -> Result<()> {
    enc.variant_begin(name)?;
    body(enc)?;
    enc.variant_end()?;
    Ok(())
}

fn value_list(enc: &mut Encoder, values: &[Value]) -> Result<()> {
    enc.list_begin()?;
    for value in values {
        encode_val(enc, value)?;
    }
    enc.list_end()?;
    Ok(())
}

fn unit_variant(enc: &mut Encoder, tag: &str) -> Result<()> {
    field(enc, tag, |enc| Ok(enc.unit()?))
}

fn frame_bytes(encode: impl FnOnce(&mut Encoder) -> Result<()>) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    encode(&mut enc)?;
    Ok(enc.into_bytes()?)
}

/// Decode a unit variant and return its tag.
fn decode_unit_variant<'a>(dec: &mut Decoder<'a>) -> Result<&'a str> {
    let (tag, mut body) = dec.variant()?;
    body.unit()?;
    Ok(tag)
}
