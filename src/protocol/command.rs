//! Command definitions
//!
//! The logical shape of a request before it is laid out on the wire.

use crate::error::{AeroError, Result};

use super::digest::Digest;
use super::value::{Bin, Value};

/// Identifies a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// A user key; the digest is derived from (set, value)
    Value { set: String, value: Value },

    /// A digest computed earlier, sent as-is
    Digest(Digest),
}

impl Key {
    /// Create a key from a set name and a user key value
    pub fn new(set: impl Into<String>, value: impl Into<Value>) -> Self {
        Key::Value {
            set: set.into(),
            value: value.into(),
        }
    }

    pub fn from_digest(digest: Digest) -> Self {
        Key::Digest(digest)
    }

    /// The digest that routes this key
    pub fn digest(&self) -> Result<Digest> {
        match self {
            Key::Value { set, value } => Digest::compute(set, value),
            Key::Digest(digest) => Ok(*digest),
        }
    }
}

/// What to do when a write loses its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Retry on another connection until the deadline
    #[default]
    Retry,
    /// Fail on the first network error
    OneShot,
}

/// Optional write parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteParams {
    /// Expected record generation; the write fails if it does not match
    pub generation: Option<u32>,

    /// Record TTL in seconds (0 = server default)
    pub expiration: u32,

    pub policy: WritePolicy,
}

impl WriteParams {
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_expiration(mut self, seconds: u32) -> Self {
        self.expiration = seconds;
        self
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Per-bin operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    Read = 1,
    Write = 2,
    Add = 5,
}

impl OpKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(OpKind::Read),
            2 => Some(OpKind::Write),
            5 => Some(OpKind::Add),
            _ => None,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, OpKind::Write | OpKind::Add)
    }
}

/// One bin operation
///
/// The value of a read operation is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub bin: Bin,
}

impl Operation {
    pub fn read(name: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Read,
            bin: Bin::new(name, Value::Null),
        }
    }

    pub fn write(bin: Bin) -> Self {
        Self {
            kind: OpKind::Write,
            bin,
        }
    }

    pub fn add(name: impl Into<String>, delta: i64) -> Self {
        Self {
            kind: OpKind::Add,
            bin: Bin::new(name, delta),
        }
    }
}

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Read the named bins
    Get,
    /// Read every bin of the record
    GetAll,
    /// Write bins
    Put,
    /// Remove the record
    Delete,
    /// A mix of reads, writes and adds
    Operate,
}

/// A request ready to be encoded
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub namespace: String,
    pub key: Key,
    pub ops: Vec<Operation>,
    pub write: Option<WriteParams>,
    /// Server-side transaction timeout (0 = none)
    pub timeout_ms: u32,
}

impl Command {
    pub fn get_all(namespace: impl Into<String>, key: Key) -> Self {
        Self::new(CommandKind::GetAll, namespace, key, Vec::new())
    }

    pub fn get<S: AsRef<str>>(namespace: impl Into<String>, key: Key, bin_names: &[S]) -> Self {
        let ops = bin_names
            .iter()
            .map(|name| Operation::read(name.as_ref()))
            .collect();
        Self::new(CommandKind::Get, namespace, key, ops)
    }

    pub fn put(namespace: impl Into<String>, key: Key, bins: Vec<Bin>) -> Self {
        let ops = bins.into_iter().map(Operation::write).collect();
        Self::new(CommandKind::Put, namespace, key, ops)
    }

    pub fn delete(namespace: impl Into<String>, key: Key) -> Self {
        Self::new(CommandKind::Delete, namespace, key, Vec::new())
    }

    pub fn operate(namespace: impl Into<String>, key: Key, ops: Vec<Operation>) -> Self {
        Self::new(CommandKind::Operate, namespace, key, ops)
    }

    fn new(kind: CommandKind, namespace: impl Into<String>, key: Key, ops: Vec<Operation>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            key,
            ops,
            write: None,
            timeout_ms: 0,
        }
    }

    pub fn with_write_params(mut self, params: WriteParams) -> Self {
        self.write = Some(params);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Whether the command mutates the record (routes to the write master)
    pub fn is_write(&self) -> bool {
        match self.kind {
            CommandKind::Get | CommandKind::GetAll => false,
            CommandKind::Put | CommandKind::Delete => true,
            CommandKind::Operate => self.ops.iter().any(|op| op.kind.is_write()),
        }
    }

    /// Policy on network failure; reads always retry
    pub fn write_policy(&self) -> WritePolicy {
        self.write.map(|params| params.policy).unwrap_or_default()
    }

    /// Check that each operation agrees with the command kind
    pub(crate) fn validate(&self) -> Result<()> {
        for op in &self.ops {
            let allowed = match self.kind {
                CommandKind::Get => op.kind == OpKind::Read,
                CommandKind::Put => op.kind == OpKind::Write,
                CommandKind::GetAll | CommandKind::Delete => false,
                CommandKind::Operate => true,
            };
            if !allowed {
                return Err(AeroError::Encoding(format!(
                    "{:?} operation on bin '{}' not allowed in a {:?} command",
                    op.kind, op.bin.name, self.kind
                )));
            }
            if op.kind == OpKind::Add && !matches!(op.bin.value, Value::Int(_)) {
                return Err(AeroError::Encoding(format!(
                    "add on bin '{}' needs an integer value",
                    op.bin.name
                )));
            }
        }
        Ok(())
    }
}
