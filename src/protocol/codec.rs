//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! Every multi-byte number is big-endian.
//!
//! ### Frame
//! ```text
//! ┌──────────┬──────────┬─────────────────┬──────────────────────────┐
//! │ Ver (1)  │ Type (1) │ Body size (6)   │ Body                     │
//! └──────────┴──────────┴─────────────────┴──────────────────────────┘
//! ```
//!
//! ### Body
//! ```text
//! ┌──────────────────────┬──────────────┬──────────────┐
//! │ Message header (22)  │ Fields ...   │ Ops ...      │
//! └──────────────────────┴──────────────┴──────────────┘
//!
//! header: hdr_sz(1) info1(1) info2(1) info3(1) unused(1) result(1)
//!         generation(4) record_ttl(4) transaction_ttl(4) n_fields(2) n_ops(2)
//! field:  size(4) type(1) payload          size counts type + payload
//! op:     size(4) op(1) particle(1) ver(1) name_len(1) name value
//!                                          size counts everything after itself
//! ```
//!
//! ### Integer values
//! Bin integers use the narrowest width of 1, 2, 4 or 8 bytes that keeps the
//! value non-negative when read back; negatives always take 8 bytes.

use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{AeroError, Result};

use super::command::{Command, CommandKind, Key, OpKind, Operation};
use super::digest::{key_payload_len, put_key_payload, Digest, DIGEST_SIZE};
use super::response::{ResultCode, Response};
use super::value::{check_bin_name, Bin, BlobKind, ParticleType, Value, BIN_NAME_MAX};

/// Frame header size: version + type + 48-bit size
pub const PROTO_HEADER_SIZE: usize = 8;

/// Fixed message header size
pub const MSG_HEADER_SIZE: usize = 22;

/// Field header: size (4) + type (1)
pub const FIELD_HEADER_SIZE: usize = 5;

/// Op header: size (4) + op + particle + version + name length
pub const OP_HEADER_SIZE: usize = 8;

pub const PROTO_VERSION: u8 = 2;
pub const PROTO_TYPE_MESSAGE: u8 = 3;

/// Longest namespace name (bytes)
pub const NAMESPACE_MAX: usize = 31;

/// Largest body size representable in the 48-bit size field
const MAX_FRAME_BODY: u64 = (1 << 48) - 1;

// info1 bits
pub const INFO1_READ: u8 = 1 << 0;
pub const INFO1_GET_ALL: u8 = 1 << 1;

// info2 bits
pub const INFO2_WRITE: u8 = 1 << 0;
pub const INFO2_DELETE: u8 = 1 << 1;
pub const INFO2_GENERATION: u8 = 1 << 2;

/// Field type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Namespace = 0,
    Set = 1,
    Key = 2,
    Digest = 4,
}

// =============================================================================
// Decoded Structures
// =============================================================================

/// The 8-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    pub version: u8,
    pub kind: u8,
    /// Body size in bytes
    pub size: usize,
}

impl ProtoHeader {
    /// Reject frames this client cannot consume
    pub fn validate(&self, max_size: usize) -> Result<()> {
        if self.version != PROTO_VERSION {
            return Err(AeroError::Protocol(format!(
                "unsupported protocol version {}",
                self.version
            )));
        }
        if self.kind != PROTO_TYPE_MESSAGE {
            return Err(AeroError::Protocol(format!(
                "unexpected frame type {}",
                self.kind
            )));
        }
        if self.size > max_size {
            return Err(AeroError::Protocol(format!(
                "Response body too large: {} bytes (max {})",
                self.size, max_size
            )));
        }
        Ok(())
    }
}

/// The fixed message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: u8,
    pub generation: u32,
    pub record_ttl: u32,
    pub transaction_ttl: u32,
    pub n_fields: u16,
    pub n_ops: u16,
}

/// A field as read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: u8,
    pub data: Bytes,
}

/// An op as read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub kind: u8,
    pub bin: Bin,
}

/// A fully decoded message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub fields: Vec<Field>,
    pub ops: Vec<Op>,
}

impl Message {
    /// First field of the given type
    pub fn field(&self, kind: FieldType) -> Option<&Field> {
        self.fields.iter().find(|f| f.kind == kind as u8)
    }
}

// =============================================================================
// Integer Encoding
// =============================================================================

/// Wire width of a bin integer
pub fn int_size(value: i64) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x7FFF => 2,
        0x8000..=0x7FFF_FFFF => 4,
        _ => 8,
    }
}

/// Write a bin integer at its wire width, returning the width
pub fn put_int<B: BufMut>(buf: &mut B, value: i64) -> usize {
    let size = int_size(value);
    match size {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(value as u16),
        4 => buf.put_u32(value as u32),
        _ => buf.put_i64(value),
    }
    size
}

/// Read a big-endian integer of 0 to 8 bytes, sign-extending from the first byte
pub fn read_int(bytes: &[u8]) -> Result<i64> {
    if bytes.len() > 8 {
        return Err(AeroError::Protocol(format!(
            "integer value of {} bytes (max 8)",
            bytes.len()
        )));
    }
    let Some(first) = bytes.first() else {
        return Ok(0);
    };
    let mut value: i64 = if first & 0x80 != 0 { -1 } else { 0 };
    for &byte in bytes {
        value = (value << 8) | i64::from(byte);
    }
    Ok(value)
}

// =============================================================================
// Command Encoding
// =============================================================================

/// Encode a command into a new buffer
///
/// Returns the frame and the digest that routes it.
pub fn encode_command(command: &Command) -> Result<(Bytes, Digest)> {
    let mut buf = BytesMut::new();
    let digest = encode_command_into(command, &mut buf)?;
    Ok((buf.freeze(), digest))
}

/// Append an encoded command to `buf`, growing it if it is too small
pub fn encode_command_into(command: &Command, buf: &mut BytesMut) -> Result<Digest> {
    let size = encoded_len(command)?;
    let digest = command.key.digest()?;

    buf.reserve(size);
    let start = buf.len();

    let (info1, info2) = header_flags(command);
    let params = command.write.unwrap_or_default();
    let n_fields = match &command.key {
        Key::Value { .. } => 3,
        Key::Digest(_) => 2,
    };

    put_proto_header(buf, size - PROTO_HEADER_SIZE);
    put_message_header(
        buf,
        &MessageHeader {
            info1,
            info2,
            info3: 0,
            result_code: 0,
            generation: params.generation.unwrap_or(0),
            record_ttl: params.expiration,
            transaction_ttl: command.timeout_ms,
            n_fields,
            n_ops: command.ops.len() as u16,
        },
    );

    // Fields: namespace, then set + key or the digest
    put_field(buf, FieldType::Namespace, command.namespace.as_bytes());
    match &command.key {
        Key::Value { set, value } => {
            put_field(buf, FieldType::Set, set.as_bytes());
            buf.put_u32((1 + key_payload_len(value)?) as u32);
            buf.put_u8(FieldType::Key as u8);
            put_key_payload(buf, value)?;
        }
        Key::Digest(digest) => {
            put_field(buf, FieldType::Digest, digest.as_bytes());
        }
    }

    for op in &command.ops {
        put_op(buf, op.kind as u8, &op.bin, op.kind != OpKind::Read);
    }

    debug_assert_eq!(buf.len() - start, size);
    Ok(digest)
}

/// Exact encoded size of a command, validating it on the way
pub fn encoded_len(command: &Command) -> Result<usize> {
    command.validate()?;
    if command.namespace.len() > NAMESPACE_MAX {
        return Err(AeroError::Encoding(format!(
            "namespace '{}' is {} bytes (max {})",
            command.namespace,
            command.namespace.len(),
            NAMESPACE_MAX
        )));
    }
    if command.ops.len() > usize::from(u16::MAX) {
        return Err(AeroError::Encoding(format!(
            "{} operations in one command (max {})",
            command.ops.len(),
            u16::MAX
        )));
    }

    let mut size = PROTO_HEADER_SIZE + MSG_HEADER_SIZE;
    size += FIELD_HEADER_SIZE + command.namespace.len();
    match &command.key {
        Key::Value { set, value } => {
            let key_len = key_payload_len(value)?;
            check_size_word(1 + set.len(), "set field")?;
            check_size_word(1 + key_len, "key field")?;
            size += FIELD_HEADER_SIZE + set.len();
            size += FIELD_HEADER_SIZE + key_len;
        }
        Key::Digest(_) => size += FIELD_HEADER_SIZE + DIGEST_SIZE,
    }
    for op in &command.ops {
        check_bin_name(&op.bin.name)?;
        let value_size = op_value_len(op);
        check_size_word(4 + op.bin.name.len() + value_size, "op")?;
        size += OP_HEADER_SIZE + op.bin.name.len() + value_size;
    }

    if size as u64 - PROTO_HEADER_SIZE as u64 > MAX_FRAME_BODY {
        return Err(AeroError::Encoding(format!("command of {} bytes", size)));
    }
    Ok(size)
}

/// Field and op sizes are written as 32-bit words
fn check_size_word(size: usize, what: &str) -> Result<()> {
    if u32::try_from(size).is_err() {
        return Err(AeroError::Encoding(format!(
            "{} of {} bytes does not fit a 32-bit size",
            what, size
        )));
    }
    Ok(())
}

fn header_flags(command: &Command) -> (u8, u8) {
    let (info1, mut info2) = match command.kind {
        CommandKind::Get => (INFO1_READ, 0),
        CommandKind::GetAll => (INFO1_READ | INFO1_GET_ALL, 0),
        CommandKind::Put => (0, INFO2_WRITE),
        CommandKind::Delete => (0, INFO2_WRITE | INFO2_DELETE),
        CommandKind::Operate => command.ops.iter().fold((0, 0), |(info1, info2), op| {
            if op.kind == OpKind::Read {
                (info1 | INFO1_READ, info2)
            } else {
                (info1, info2 | INFO2_WRITE)
            }
        }),
    };
    if matches!(command.write, Some(params) if params.generation.is_some()) {
        info2 |= INFO2_GENERATION;
    }
    (info1, info2)
}

fn op_value_len(op: &Operation) -> usize {
    if op.kind == OpKind::Read {
        0
    } else {
        value_len(&op.bin.value)
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Int(v) => int_size(*v),
        Value::Str(s) => s.len(),
        Value::Blob(_, data) => data.len(),
    }
}

fn put_proto_header<B: BufMut>(buf: &mut B, body_size: usize) {
    let word = (u64::from(PROTO_VERSION) << 56)
        | (u64::from(PROTO_TYPE_MESSAGE) << 48)
        | (body_size as u64 & MAX_FRAME_BODY);
    buf.put_u64(word);
}

fn put_message_header<B: BufMut>(buf: &mut B, header: &MessageHeader) {
    buf.put_u8(MSG_HEADER_SIZE as u8);
    buf.put_u8(header.info1);
    buf.put_u8(header.info2);
    buf.put_u8(header.info3);
    buf.put_u8(0); // unused
    buf.put_u8(header.result_code);
    buf.put_u32(header.generation);
    buf.put_u32(header.record_ttl);
    buf.put_u32(header.transaction_ttl);
    buf.put_u16(header.n_fields);
    buf.put_u16(header.n_ops);
}

fn put_field<B: BufMut>(buf: &mut B, kind: FieldType, payload: &[u8]) {
    buf.put_u32((1 + payload.len()) as u32);
    buf.put_u8(kind as u8);
    buf.put_slice(payload);
}

fn put_op<B: BufMut>(buf: &mut B, kind: u8, bin: &Bin, with_value: bool) {
    let value_size = if with_value { value_len(&bin.value) } else { 0 };
    let particle = if with_value {
        bin.value.particle_type()
    } else {
        ParticleType::Null
    };

    buf.put_u32((4 + bin.name.len() + value_size) as u32);
    buf.put_u8(kind);
    buf.put_u8(particle as u8);
    buf.put_u8(0); // version
    buf.put_u8(bin.name.len() as u8);
    buf.put_slice(bin.name.as_bytes());

    if with_value {
        match &bin.value {
            Value::Null => {}
            Value::Int(v) => {
                put_int(buf, *v);
            }
            Value::Str(s) => buf.put_slice(s.as_bytes()),
            Value::Blob(_, data) => buf.put_slice(data),
        }
    }
}

// =============================================================================
// Response Encoding
// =============================================================================

/// Encode a response frame, as a server would send it
pub fn encode_response(response: &Response) -> Result<BytesMut> {
    let result_code = response.result_code.server_byte().ok_or_else(|| {
        AeroError::Encoding(format!(
            "{:?} is a client-side result code",
            response.result_code
        ))
    })?;
    if response.bins.len() > usize::from(u16::MAX) {
        return Err(AeroError::Encoding(format!(
            "{} bins in one response",
            response.bins.len()
        )));
    }

    let mut size = PROTO_HEADER_SIZE + MSG_HEADER_SIZE;
    for bin in &response.bins {
        check_bin_name(&bin.name)?;
        let value_size = value_len(&bin.value);
        check_size_word(4 + bin.name.len() + value_size, "op")?;
        size += OP_HEADER_SIZE + bin.name.len() + value_size;
    }

    let mut buf = BytesMut::with_capacity(size);
    put_proto_header(&mut buf, size - PROTO_HEADER_SIZE);
    put_message_header(
        &mut buf,
        &MessageHeader {
            result_code,
            generation: response.generation,
            n_ops: response.bins.len() as u16,
            ..MessageHeader::default()
        },
    );
    for bin in &response.bins {
        put_op(&mut buf, OpKind::Read as u8, bin, true);
    }
    Ok(buf)
}

// =============================================================================
// Decoding
// =============================================================================

/// Parse the 8-byte frame header
pub fn decode_proto_header(bytes: &[u8]) -> Result<ProtoHeader> {
    if bytes.len() < PROTO_HEADER_SIZE {
        return Err(AeroError::Protocol(format!(
            "Incomplete frame header: expected {} bytes, got {}",
            PROTO_HEADER_SIZE,
            bytes.len()
        )));
    }
    let mut word = [0u8; PROTO_HEADER_SIZE];
    word.copy_from_slice(&bytes[..PROTO_HEADER_SIZE]);
    let word = u64::from_be_bytes(word);

    Ok(ProtoHeader {
        version: (word >> 56) as u8,
        kind: (word >> 48) as u8,
        size: (word & MAX_FRAME_BODY) as usize,
    })
}

/// Decode a whole frame (header included)
pub fn decode_frame(frame: &Bytes) -> Result<Message> {
    let header = decode_proto_header(frame)?;
    let end = PROTO_HEADER_SIZE + header.size;
    if frame.len() < end {
        return Err(AeroError::Protocol(format!(
            "Incomplete frame body: expected {} bytes, got {}",
            header.size,
            frame.len() - PROTO_HEADER_SIZE
        )));
    }
    decode_message(&frame.slice(PROTO_HEADER_SIZE..end))
}

/// Decode a message body (everything after the frame header)
///
/// Every cursor move is checked against the end of `body`; malformed or
/// truncated input is a protocol error.
pub fn decode_message(body: &Bytes) -> Result<Message> {
    let mut reader = Reader::new(body);

    let header_size = usize::from(reader.u8("header size")?);
    if header_size < MSG_HEADER_SIZE {
        return Err(AeroError::Protocol(format!(
            "message header size {} (min {})",
            header_size, MSG_HEADER_SIZE
        )));
    }
    let info1 = reader.u8("info1")?;
    let info2 = reader.u8("info2")?;
    let info3 = reader.u8("info3")?;
    reader.u8("unused")?;
    let header = MessageHeader {
        info1,
        info2,
        info3,
        result_code: reader.u8("result code")?,
        generation: reader.u32("generation")?,
        record_ttl: reader.u32("record ttl")?,
        transaction_ttl: reader.u32("transaction ttl")?,
        n_fields: reader.u16("field count")?,
        n_ops: reader.u16("op count")?,
    };
    reader.take(header_size - MSG_HEADER_SIZE, "header extension")?;

    let mut fields = Vec::with_capacity(usize::from(header.n_fields).min(8));
    for _ in 0..header.n_fields {
        let size = reader.u32("field size")? as usize;
        if size == 0 {
            return Err(AeroError::Protocol("empty field".to_string()));
        }
        let field = reader.take(size, "field")?;
        fields.push(Field {
            kind: field[0],
            data: field.slice(1..),
        });
    }

    let mut ops = Vec::with_capacity(usize::from(header.n_ops).min(64));
    for _ in 0..header.n_ops {
        ops.push(decode_op(&mut reader)?);
    }

    Ok(Message {
        header,
        fields,
        ops,
    })
}

/// Decode a response body into result code, generation and bins
pub fn decode_response(body: &Bytes) -> Result<Response> {
    let message = decode_message(body)?;
    Ok(Response {
        result_code: ResultCode::from_server(message.header.result_code),
        generation: message.header.generation,
        bins: message.ops.into_iter().map(|op| op.bin).collect(),
    })
}

fn decode_op(reader: &mut Reader<'_>) -> Result<Op> {
    let size = reader.u32("op size")? as usize;
    if size < OP_HEADER_SIZE - 4 {
        return Err(AeroError::Protocol(format!("op size {} too small", size)));
    }
    let op = reader.take(size, "op")?;

    let kind = op[0];
    let particle = op[1];
    let name_len = usize::from(op[3]);
    if name_len > BIN_NAME_MAX {
        return Err(AeroError::Protocol(format!(
            "bin name of {} bytes (max {})",
            name_len, BIN_NAME_MAX
        )));
    }
    if 4 + name_len > size {
        return Err(AeroError::Protocol(format!(
            "bin name of {} bytes overruns op of {} bytes",
            name_len, size
        )));
    }

    let name = String::from_utf8_lossy(&op[4..4 + name_len]).into_owned();
    let value = decode_value(particle, op.slice(4 + name_len..))?;
    Ok(Op {
        kind,
        bin: Bin { name, value },
    })
}

fn decode_value(particle: u8, data: Bytes) -> Result<Value> {
    let particle = ParticleType::from_u8(particle).ok_or_else(|| {
        AeroError::Protocol(format!("unknown particle type {}", particle))
    })?;

    match particle {
        ParticleType::Null => Ok(Value::Null),
        ParticleType::Integer => Ok(Value::Int(read_int(&data)?)),
        ParticleType::String => Ok(Value::Str(String::from_utf8_lossy(&data).into_owned())),
        other => match BlobKind::from_particle_type(other) {
            Some(kind) => Ok(Value::Blob(kind, data)),
            None => Err(AeroError::Protocol(format!(
                "unsupported particle type {:?}",
                other
            ))),
        },
    }
}

/// Bounds-checked cursor over a message body
struct Reader<'a> {
    buf: &'a Bytes,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<Bytes> {
        let remaining = self.buf.len() - self.pos;
        if len > remaining {
            return Err(AeroError::Protocol(format!(
                "truncated {} at offset {}: need {} bytes, have {}",
                what, self.pos, len, remaining
            )));
        }
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame body from a blocking stream
pub fn read_frame<R: Read>(reader: &mut R, max_size: usize) -> Result<Bytes> {
    let mut header = [0u8; PROTO_HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let proto = decode_proto_header(&header)?;
    proto.validate(max_size)?;

    let mut body = vec![0u8; proto.size];
    reader.read_exact(&mut body)?;
    Ok(Bytes::from(body))
}
