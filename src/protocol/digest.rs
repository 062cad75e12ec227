//! Record digests
//!
//! A digest is RIPEMD-160 over the set name followed by the type-tagged key
//! bytes. The tagged key bytes are exactly the payload of the key field, so
//! both are produced by [`put_key_payload`].

use std::fmt;

use bytes::BufMut;
use ripemd::{Digest as _, Ripemd160};

use crate::error::{AeroError, Result};

use super::value::Value;

/// Digest length in bytes
pub const DIGEST_SIZE: usize = 20;

/// Number of partitions a namespace is split into
pub const PARTITIONS: u16 = 4096;

/// Fixed-size identifier of a record
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    /// Compute the digest of a (set, key) pair
    pub fn compute(set: &str, key: &Value) -> Result<Self> {
        let payload = key_payload(key)?;
        Ok(Self::from_parts(set.as_bytes(), &payload))
    }

    /// Hash an already tagged key payload
    pub fn from_parts(set: &[u8], key_payload: &[u8]) -> Self {
        let mut hasher = Ripemd160::new();
        hasher.update(set);
        hasher.update(key_payload);
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; DIGEST_SIZE] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Partition the record lives in (low 12 bits of the first two bytes)
    pub fn partition_id(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]]) % PARTITIONS
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Length of the tagged key payload
pub fn key_payload_len(key: &Value) -> Result<usize> {
    let raw = match key {
        Value::Int(_) => 8,
        Value::Str(s) => s.len(),
        Value::Blob(_, data) => data.len(),
        Value::Null => return Err(unsupported_key()),
    };
    Ok(1 + raw)
}

/// Write `[particle type][raw key bytes]`
///
/// Integers are always eight big-endian bytes here, unlike bin values.
pub fn put_key_payload<B: BufMut>(buf: &mut B, key: &Value) -> Result<()> {
    match key {
        Value::Int(v) => {
            buf.put_u8(key.particle_type() as u8);
            buf.put_i64(*v);
        }
        Value::Str(s) => {
            buf.put_u8(key.particle_type() as u8);
            buf.put_slice(s.as_bytes());
        }
        Value::Blob(kind, data) => {
            buf.put_u8(kind.particle_type() as u8);
            buf.put_slice(data);
        }
        Value::Null => return Err(unsupported_key()),
    }
    Ok(())
}

/// The tagged key payload as an owned buffer
pub fn key_payload(key: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(key_payload_len(key)?);
    put_key_payload(&mut buf, key)?;
    Ok(buf)
}

fn unsupported_key() -> AeroError {
    AeroError::Encoding("null is not a valid key type".to_string())
}
