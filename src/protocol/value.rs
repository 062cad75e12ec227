//! Value definitions
//!
//! Values, bins and the particle types that tag them on the wire.

use bytes::Bytes;

use crate::error::{AeroError, Result};

/// Longest bin name the server accepts (bytes)
pub const BIN_NAME_MAX: usize = 14;

/// Wire-level type tag of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParticleType {
    Null = 0,
    Integer = 1,
    /// Reserved, never produced by this client
    Float = 2,
    String = 3,
    Blob = 4,
    Timestamp = 5,
    Digest = 6,
    JavaBlob = 7,
    CSharpBlob = 8,
    PythonBlob = 9,
    RubyBlob = 10,
}

impl ParticleType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        let particle = match byte {
            0 => Self::Null,
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::String,
            4 => Self::Blob,
            5 => Self::Timestamp,
            6 => Self::Digest,
            7 => Self::JavaBlob,
            8 => Self::CSharpBlob,
            9 => Self::PythonBlob,
            10 => Self::RubyBlob,
            _ => return None,
        };
        Some(particle)
    }
}

/// Which language runtime serialized a blob
///
/// Only the wire type byte differs between kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobKind {
    #[default]
    Generic,
    Java,
    CSharp,
    Python,
    Ruby,
}

impl BlobKind {
    pub fn particle_type(self) -> ParticleType {
        match self {
            BlobKind::Generic => ParticleType::Blob,
            BlobKind::Java => ParticleType::JavaBlob,
            BlobKind::CSharp => ParticleType::CSharpBlob,
            BlobKind::Python => ParticleType::PythonBlob,
            BlobKind::Ruby => ParticleType::RubyBlob,
        }
    }

    pub fn from_particle_type(particle: ParticleType) -> Option<Self> {
        match particle {
            ParticleType::Blob => Some(BlobKind::Generic),
            ParticleType::JavaBlob => Some(BlobKind::Java),
            ParticleType::CSharpBlob => Some(BlobKind::CSharp),
            ParticleType::PythonBlob => Some(BlobKind::Python),
            ParticleType::RubyBlob => Some(BlobKind::Ruby),
            _ => None,
        }
    }
}

/// A single datum exchanged with the server
///
/// Blob payloads are `Bytes`, so a decoded blob may be a view into the
/// response buffer rather than a copy of it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Str(String),
    Blob(BlobKind, Bytes),
}

impl Value {
    /// Create a generic blob value
    pub fn blob(data: impl Into<Bytes>) -> Self {
        Value::Blob(BlobKind::Generic, data.into())
    }

    pub fn particle_type(&self) -> ParticleType {
        match self {
            Value::Null => ParticleType::Null,
            Value::Int(_) => ParticleType::Integer,
            Value::Str(_) => ParticleType::String,
            Value::Blob(kind, _) => kind.particle_type(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(_, data) => Some(data),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Value::blob(data)
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::blob(data)
    }
}

/// A named value within a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Reject bin names the wire format cannot carry
pub(crate) fn check_bin_name(name: &str) -> Result<()> {
    if name.len() > BIN_NAME_MAX {
        return Err(AeroError::Encoding(format!(
            "bin name '{}' is {} bytes (max {})",
            name,
            name.len(),
            BIN_NAME_MAX
        )));
    }
    Ok(())
}
