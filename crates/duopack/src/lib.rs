//! # Duopack
//!
//! The byte layer under a duolink bridge: a small, bounded, self-describing
//! serialization format that both runtimes can read without sharing types.
//!
//! Every item is `[tag][len?][body]`, so a reader can step over anything it
//! does not understand. The encoder keeps open containers on a stack and fills
//! in their lengths when they close; decoders borrow the input and never copy.
//!
//! | kind | layout |
//! |---|---|
//! | scalar | 1-byte tag, then 0 or 8 data bytes |
//! | blob | 1-byte tag, u32 length, raw bytes |
//! | container | 1-byte tag, u32 length, nested items |
//!
//! Numbers and lengths are little-endian.


/// Everything that can go wrong while writing or reading a duopack buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A valid tag was found, but not the one the reader asked for.
    TagMismatch { expected: Tag, found: Tag },
    /// A string blob holds bytes that are not UTF-8.
    InvalidUtf8,
    /// `*_end` called for a different container than the innermost open one.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// `*_end` called with no container open.
    ScopeUnderflow,
    /// `into_bytes` called while a container is still open.
    ScopeStillOpen,
    /// The input ends in the middle of an item.
    UnexpectedEnd,
    /// A blob or container body does not fit the u32 length prefix.
    BlobTooLarge(usize),
    /// Wrote a second item into a scope that holds exactly one (Result/Variant).
    TooManyItems(Scope),
    /// Closed a scope that holds exactly one item (Result/Variant) without writing it.
    EmptyAdt(Scope),
    /// Wrote something other than a Variant directly into a Map.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "unassigned tag byte {:#04x}", b),
            Error::TagMismatch { expected, found } => {
                write!(f, "expected {:?}, found {:?}", expected, found)
            }
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "closing {:?} while {:?} is open", expected, actual)
            }
            Error::TooManyItems(s) => write!(f, "{:?} holds exactly one item", s),
            Error::EmptyAdt(s) => write!(f, "{:?} closed without its item", s),
            Error::BlobTooLarge(len) => write!(f, "blob of {} bytes exceeds u32::MAX", len),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// First byte of every item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    U64 = 0x04,
    S64 = 0x05,
    F64 = 0x06,

    // length-prefixed bytes
    String = 0x10,
    Bytes = 0x11,

    // length-prefixed nested items
    List = 0x20,
    Map = 0x21,

    // length-prefixed, exactly one nested item
    ResultOk = 0x30,
    ResultErr = 0x31,
    Variant = 0x32,
}

impl Tag {
    /// Parses a tag byte. Unassigned bytes give `None`.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::Unit),
            0x02 => Some(Tag::BoolTrue),
            0x03 => Some(Tag::BoolFalse),
            0x04 => Some(Tag::U64),
            0x05 => Some(Tag::S64),
            0x06 => Some(Tag::F64),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x30 => Some(Tag::ResultOk),
            0x31 => Some(Tag::ResultErr),
            0x32 => Some(Tag::Variant),
            _ => None,
        }
    }

    /// Width of the fixed payload following the tag, or `None` for length-prefixed items.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::BoolTrue | Tag::BoolFalse => Some(0),
            Tag::U64 | Tag::S64 | Tag::F64 => Some(8),
            _ => None,
        }
    }
}

/// Kind of container open on the encoder, reported in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Top level, outside every container.
    Root,
    /// Any number of items.
    List,
    /// Named entries only; each entry is a variant.
    Map,
    /// Ok or Err around exactly one item.
    Result,
    /// A name followed by exactly one payload item.
    Variant,
}

/// An open container on the `Encoder` stack.
struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A state-machine driven encoder.
///
/// Every write is validated against the innermost open scope:
///
/// 1.  **Map Scopes**: Only `Tag::Variant` items may be written.
/// 2.  **ADT Scopes (Result, Variant)**: Exactly one item must be written.
/// 3.  **Root Scope**: The encoder must be back at Root to finalize bytes.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Finishes encoding. Fails if a container is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.top();
        match frame.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag == Tag::Variant => Ok(()),
            Scope::Map => Err(Error::InvalidMapEntry),
            Scope::Result | Scope::Variant if frame.count >= 1 => {
                Err(Error::TooManyItems(frame.scope))
            }
            Scope::Result | Scope::Variant => Ok(()),
        }
    }

    fn scalar(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(data);
        self.top().count += 1;
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.top().count += 1;
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]); // patched in end_scope
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }

        let frame = self.top();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if matches!(frame.scope, Scope::Result | Scope::Variant) && frame.count == 0 {
            return Err(Error::EmptyAdt(frame.scope));
        }
        let start = frame.start;

        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[start - 4..start].copy_from_slice(&len.to_le_bytes());

        self.stack.pop();
        self.top().count += 1;
        Ok(())
    }

    /// Writes the unit value.
    pub fn unit(&mut self) -> Result<()> { self.scalar(Tag::Unit, &[]) }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.scalar(if v { Tag::BoolTrue } else { Tag::BoolFalse }, &[])
    }

    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn s64(&mut self, v: i64) -> Result<()> { self.scalar(Tag::S64, &v.to_le_bytes()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.scalar(Tag::F64, &v.to_le_bytes()) }

    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::String, v.as_bytes()) }
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.blob(Tag::Bytes, v) }

    /// Begins a List container. Allows any number of items.
    pub fn list_begin(&mut self) -> Result<()> { self.begin_scope(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end_scope(Scope::List) }

    /// Begins a Map container. Only `variant_begin()` (a key/value pair) may follow.
    pub fn map_begin(&mut self) -> Result<()> { self.begin_scope(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end_scope(Scope::Map) }

    /// Begins a `Result::Ok` container holding exactly one item.
    pub fn result_ok_begin(&mut self) -> Result<()> {
        self.begin_scope(Tag::ResultOk, Scope::Result)
    }
    pub fn result_ok_end(&mut self) -> Result<()> { self.end_scope(Scope::Result) }

    /// Begins a `Result::Err` container holding exactly one item.
    pub fn result_err_begin(&mut self) -> Result<()> {
        self.begin_scope(Tag::ResultErr, Scope::Result)
    }
    pub fn result_err_end(&mut self) -> Result<()> { self.end_scope(Scope::Result) }

    /// Begins a named Variant. Exactly one payload item must follow.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.begin_scope(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        // the name is metadata, not payload
        self.top().count = 0;
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.end_scope(Scope::Variant) }
}

/// Read cursor over borrowed bytes. Every read is bounds checked.
///
/// Reading advances the cursor. Container reads return new `Decoder`s
/// restricted to the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// The unread bytes, for callers that need to hold on to an encoded item.
    pub fn as_slice(&self) -> &'a [u8] {
        self.buf
    }

    /// Tag of the next item, without consuming it.
    pub fn peek_tag(&self) -> Result<Tag> {
        let &b = self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.read_array()?) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::TagMismatch { expected, found });
        }
        self.read_bytes(1)?;
        Ok(())
    }

    /// Steps over the next item, nested content included.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.read_bytes(1)?;
        let len = match tag.fixed_width() {
            Some(width) => width,
            None => self.read_len()?,
        };
        self.read_bytes(len)?;
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.expect_tag(Tag::Unit) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.read_bytes(1)?; Ok(true) }
            Tag::BoolFalse => { self.read_bytes(1)?; Ok(false) }
            found => Err(Error::TagMismatch { expected: Tag::BoolTrue, found }),
        }
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.expect_tag(Tag::U64)?;
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn s64(&mut self) -> Result<i64> {
        self.expect_tag(Tag::S64)?;
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.expect_tag(Tag::F64)?;
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Borrows a string straight out of the input.
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect_tag(Tag::String)?;
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect_tag(Tag::Bytes)?;
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    fn enter_container(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect_tag(expected)?;
        let len = self.read_len()?;
        Ok(Decoder::new(self.read_bytes(len)?))
    }

    /// Opens a list. Items are read through the returned iterator.
    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter_container(Tag::List)? })
    }

    /// Opens a map. Entries are read through the returned iterator.
    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter_container(Tag::Map)? })
    }

    /// Opens an Ok or Err container and returns a decoder over its item.
    pub fn result(&mut self) -> Result<std::result::Result<Decoder<'a>, Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::ResultOk => Ok(Ok(self.enter_container(Tag::ResultOk)?)),
            Tag::ResultErr => Ok(Err(self.enter_container(Tag::ResultErr)?)),
            found => Err(Error::TagMismatch { expected: Tag::ResultOk, found }),
        }
    }

    /// Opens a variant: its name, and a decoder positioned at the payload.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter_container(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Walks the items of a list, one sub-decoder per item.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a Decoder for the next item, `Ok(None)` at the end, or an
    /// error if the remaining bytes do not frame a complete item.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut ahead = self.dec.clone();
        ahead.skip()?;
        let len = self.dec.remaining() - ahead.remaining();
        Ok(Some(Decoder::new(self.dec.read_bytes(len)?)))
    }
}

/// Walks the entries of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// The next entry's key and a decoder over its value, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}
