//! Protocol Module
//!
//! Defines the binary message protocol spoken with database nodes.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────┬──────────────────────────┐
//! │ Ver (1)  │ Type (1) │ Body size (6)   │ Body                     │
//! └──────────┴──────────┴─────────────────┴──────────────────────────┘
//! ```
//!
//! The body is a 22-byte message header, then fields (namespace, set, key or
//! digest), then one op per bin. See [`codec`] for the byte-level layout.
//!
//! ### Commands
//! - GET      - info1 READ, one read op per requested bin
//! - GET_ALL  - info1 READ | GET_ALL, no ops
//! - PUT      - info2 WRITE, one write op per bin
//! - DELETE   - info2 WRITE | DELETE, no ops
//! - OPERATE  - any mix of read, write and add ops
//!
//! ### Result Codes
//! - 0..=14: server codes (9 is reported as a timeout)
//! - negative: produced by the client (client error, timeout, network, parse)

mod command;
mod response;
mod value;

pub mod codec;
pub mod digest;

pub use codec::{
    decode_frame, decode_message, decode_proto_header, decode_response, encode_command,
    encode_command_into, encode_response, encoded_len, Message, ProtoHeader,
};
pub use command::{Command, CommandKind, Key, OpKind, Operation, WriteParams, WritePolicy};
pub use digest::Digest;
pub use response::{Response, ResultCode};
pub use value::{Bin, BlobKind, ParticleType, Value, BIN_NAME_MAX};
