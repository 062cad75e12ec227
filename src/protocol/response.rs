//! Response definitions
//!
//! Result codes and decoded responses.

use super::value::Bin;

/// Outcome of a request
///
/// Server codes come straight from the message header. Negative codes are
/// produced locally. A server-side timeout is reported as [`ResultCode::Timeout`]
/// so callers only handle one timeout case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Unknown,
    NotFound,
    Generation,
    Parameter,
    KeyExists,
    BinExists,
    ClusterKeyMismatch,
    PartitionOutOfSpace,
    NoXds,
    Unavailable,
    IncompatibleType,
    RecordTooBig,
    KeyBusy,
    /// A server code this client does not name
    Server(u8),

    // -------------------------------------------------------------------------
    // Client-side codes
    // -------------------------------------------------------------------------
    /// Internal client failure
    Client,
    /// Deadline elapsed, locally or on the server
    Timeout,
    /// Network failure on a one-shot request
    Network,
    /// The response could not be decoded
    Parse,
}

/// Server code for a transaction that timed out on the server
pub const SERVER_TIMEOUT: u8 = 9;

impl ResultCode {
    pub fn from_server(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Unknown,
            2 => Self::NotFound,
            3 => Self::Generation,
            4 => Self::Parameter,
            5 => Self::KeyExists,
            6 => Self::BinExists,
            7 => Self::ClusterKeyMismatch,
            8 => Self::PartitionOutOfSpace,
            SERVER_TIMEOUT => Self::Timeout,
            10 => Self::NoXds,
            11 => Self::Unavailable,
            12 => Self::IncompatibleType,
            13 => Self::RecordTooBig,
            14 => Self::KeyBusy,
            other => Self::Server(other),
        }
    }

    /// Numeric code, negative for client-side outcomes
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Unknown => 1,
            Self::NotFound => 2,
            Self::Generation => 3,
            Self::Parameter => 4,
            Self::KeyExists => 5,
            Self::BinExists => 6,
            Self::ClusterKeyMismatch => 7,
            Self::PartitionOutOfSpace => 8,
            Self::NoXds => 10,
            Self::Unavailable => 11,
            Self::IncompatibleType => 12,
            Self::RecordTooBig => 13,
            Self::KeyBusy => 14,
            Self::Server(code) => i32::from(code),
            Self::Client => -1,
            Self::Timeout => -2,
            Self::Network => -3,
            Self::Parse => -4,
        }
    }

    /// The byte a server would put in the header, if this is a server code
    pub fn server_byte(self) -> Option<u8> {
        match self {
            Self::Timeout => Some(SERVER_TIMEOUT),
            other => u8::try_from(other.code()).ok(),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// A decoded response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result_code: ResultCode,
    pub generation: u32,
    pub bins: Vec<Bin>,
}

impl Response {
    /// Create an OK response
    pub fn ok(generation: u32, bins: Vec<Bin>) -> Self {
        Self {
            result_code: ResultCode::Ok,
            generation,
            bins,
        }
    }

    /// Create a response carrying only a result code
    pub fn status(result_code: ResultCode) -> Self {
        Self {
            result_code,
            generation: 0,
            bins: Vec::new(),
        }
    }
}
